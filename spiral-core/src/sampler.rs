use crate::{
    dataset::Dataset,
    env::{Env, Observation},
    error::Result,
    policies::{Exploration, Policy},
    strategies::Strategies,
    utils::rollout_buffer::RolloutBuffer,
};
use candle_core::{Device, Tensor};
use tracing::debug;

/// Builds the policy input for `observation`, appending the condition when there is one.
pub fn policy_input(
    strategies: &Strategies,
    observation: &Observation,
    condition: Option<&Tensor>,
    device: &Device,
) -> Result<Tensor> {
    let features = strategies.observation_input(observation, device)?;
    match condition {
        Some(condition) => Ok(Tensor::cat(&[&features, condition], 0)?),
        None => Ok(features),
    }
}

/// Drives one environment for a single fixed-length episode.
pub struct RolloutCollector<'a> {
    pub strategies: &'a Strategies,
    pub timestep_limit: usize,
    pub exploration: Exploration,
    pub device: &'a Device,
}

impl RolloutCollector<'_> {
    /// Collects one rollout. When `dataset` is given it is sampled exactly once, up front, and
    /// the sample conditions every step of the episode.
    pub fn collect<P, E>(
        &self,
        policy: &P,
        env: &mut E,
        dataset: Option<&dyn Dataset>,
    ) -> Result<RolloutBuffer>
    where
        P: Policy + ?Sized,
        E: Env + ?Sized,
    {
        let condition = dataset.map(|dataset| dataset.sample()).transpose()?;
        let condition_input = condition
            .as_ref()
            .map(|sample| Tensor::new(sample.condition.as_slice(), self.device))
            .transpose()?;
        let mut buffer = RolloutBuffer::with_condition(condition);
        let mut observation = env.reset()?;
        for timestep in 0..self.timestep_limit {
            let input = policy_input(
                self.strategies,
                &observation,
                condition_input.as_ref(),
                self.device,
            )?;
            let sample = policy.sample_action(&input, self.exploration)?;
            let action = self.strategies.pack_action.pack(&sample)?;
            let outcome = env.step(&action)?;
            buffer.push_step(
                input,
                sample,
                action,
                outcome.observation.clone(),
                outcome.reward,
                outcome.done,
            );
            observation = outcome.observation;
            if outcome.done {
                debug!(timestep, "environment ended the episode early");
                break;
            }
        }
        Ok(buffer)
    }
}
