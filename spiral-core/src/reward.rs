//! Turns a finished rollout into per-step rewards.

use crate::{
    error::Result,
    strategies::Strategies,
    utils::rollout_buffer::RolloutBuffer,
};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

/// Anything that can judge a canvas. The discriminator is the usual implementor.
pub trait Critic {
    /// Raw realness logit of a single preprocessed image, optionally conditioned.
    fn logit(&self, image: &Tensor, condition: Option<&Tensor>) -> Result<f32>;
}

/// How the discriminator logit becomes the adversarial reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdversarialScore {
    Logit,
    Probability,
    #[default]
    LogProbability,
}

pub fn log_sigmoid(x: f32) -> f32 {
    if x >= 0. {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

impl AdversarialScore {
    pub fn apply(self, logit: f32) -> f32 {
        match self {
            Self::Logit => logit,
            Self::Probability => 1. / (1. + (-logit).exp()),
            Self::LogProbability => log_sigmoid(logit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub adversarial_weight: f32,
    pub auxiliary_weight: f32,
    pub score: AdversarialScore,
    /// Subtract the score the critic gives the real target. Only used when conditional.
    pub real_baseline: bool,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            adversarial_weight: 1.,
            auxiliary_weight: 1.,
            score: AdversarialScore::default(),
            real_baseline: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloutRewards {
    pub per_step: Vec<f32>,
    /// Weighted adversarial term that was added to the last step.
    pub adversarial: f32,
    pub auxiliary_total: f32,
}

impl RolloutRewards {
    pub fn total(&self) -> f32 {
        self.per_step.iter().sum()
    }
}

pub struct RewardComposer<'a> {
    pub config: &'a RewardConfig,
    pub strategies: &'a Strategies,
    pub device: &'a Device,
}

impl RewardComposer<'_> {
    /// The adversarial term lands on the final transition only; auxiliary shaping, when
    /// configured, is added on every transition.
    pub fn compose(&self, rollout: &RolloutBuffer, critic: &dyn Critic) -> Result<RolloutRewards> {
        let mut rewards = RolloutRewards {
            per_step: vec![0.; rollout.len()],
            ..Default::default()
        };
        let Some(last) = rollout.final_observation() else {
            return Ok(rewards);
        };

        if let Some(auxiliary) = &self.strategies.auxiliary_reward {
            for (timestep, observation) in rollout.observations.iter().enumerate() {
                let r = self.config.auxiliary_weight
                    * auxiliary.reward(timestep, observation, rollout.condition.as_ref())?;
                rewards.per_step[timestep] += r;
                rewards.auxiliary_total += r;
            }
        }

        let condition = rollout
            .condition
            .as_ref()
            .map(|sample| Tensor::new(sample.condition.as_slice(), self.device))
            .transpose()?;
        let canvas = self.strategies.image_input(&last.image, self.device)?;
        let mut score = self
            .config
            .score
            .apply(critic.logit(&canvas, condition.as_ref())?);
        if let (true, Some(sample)) = (self.config.real_baseline, rollout.condition.as_ref()) {
            let target = self.strategies.image_input(&sample.target, self.device)?;
            score -= self
                .config
                .score
                .apply(critic.logit(&target, condition.as_ref())?);
        }
        rewards.adversarial = self.config.adversarial_weight * score;
        if let Some(r) = rewards.per_step.last_mut() {
            *r += rewards.adversarial;
        }
        Ok(rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sigmoid_is_stable() {
        assert!((log_sigmoid(0.) - (0.5f32).ln()).abs() < 1e-6);
        assert!(log_sigmoid(100.).abs() < 1e-6);
        assert!((log_sigmoid(-100.) + 100.).abs() < 1e-3);
        assert!(log_sigmoid(-1000.).is_finite());
    }

    #[test]
    fn scores() {
        assert_eq!(AdversarialScore::Logit.apply(2.), 2.);
        assert!((AdversarialScore::Probability.apply(0.) - 0.5).abs() < 1e-6);
    }
}
