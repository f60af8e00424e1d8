use crate::{
    dataset::Sample,
    env::{Action, Observation},
    policies::ActionSample,
};
use candle_core::Tensor;

/// Everything one episode produced. Owned by the worker that collected it and dropped once its
/// gradients have been proposed.
#[derive(Debug, Default)]
pub struct RolloutBuffer {
    /// Policy input in effect before each step.
    pub inputs: Vec<Tensor>,
    pub samples: Vec<ActionSample>,
    pub actions: Vec<Action>,
    /// Observation returned by each step.
    pub observations: Vec<Observation>,
    pub env_rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub condition: Option<Sample>,
}

impl RolloutBuffer {
    pub fn with_condition(condition: Option<Sample>) -> Self {
        Self {
            condition,
            ..Default::default()
        }
    }

    pub fn push_step(
        &mut self,
        input: Tensor,
        sample: ActionSample,
        action: Action,
        observation: Observation,
        env_reward: f32,
        done: bool,
    ) {
        self.inputs.push(input);
        self.samples.push(sample);
        self.actions.push(action);
        self.observations.push(observation);
        self.env_rewards.push(env_reward);
        self.dones.push(done);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The canvas the discriminator judges.
    pub fn final_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn ended_by_env(&self) -> bool {
        self.dones.last().copied().unwrap_or(false)
    }
}
