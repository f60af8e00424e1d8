use serde::{Deserialize, Serialize};
use spiral_core::{Result, SpiralError, policies::Exploration, reward::RewardConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiralConfig {
    /// Steps per episode.
    pub timestep_limit: usize,
    /// Rollouts collected for every update.
    pub rollout_n: usize,
    /// Sample a conditioning target per rollout and feed it to both networks.
    pub conditional: bool,
    pub gamma: f32,
    pub entropy_coef: f32,
    pub value_coef: f32,
    pub max_grad_norm: Option<f32>,
    /// Discriminator gradient norms below this are reported as saturation.
    pub saturation_threshold: f32,
    pub exploration: Exploration,
    pub reward: RewardConfig,
    /// Take a snapshot every this many steps while training with a snapshot directory.
    pub snapshot_interval: Option<usize>,
}

impl Default for SpiralConfig {
    fn default() -> Self {
        Self {
            timestep_limit: 20,
            rollout_n: 1,
            conditional: false,
            gamma: 0.99,
            entropy_coef: 0.01,
            value_coef: 0.5,
            max_grad_norm: Some(40.),
            saturation_threshold: 1e-8,
            exploration: Exploration::Sample,
            reward: RewardConfig::default(),
            snapshot_interval: None,
        }
    }
}

impl SpiralConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timestep_limit == 0 {
            return Err(SpiralError::InvalidConfig("timestep_limit must be positive".into()));
        }
        if self.rollout_n == 0 {
            return Err(SpiralError::InvalidConfig("rollout_n must be positive".into()));
        }
        if !(0. ..=1.).contains(&self.gamma) {
            return Err(SpiralError::InvalidConfig(format!(
                "gamma must lie in [0, 1], got {}",
                self.gamma
            )));
        }
        if let Some(max_norm) = self.max_grad_norm {
            if !(max_norm > 0.) {
                return Err(SpiralError::InvalidConfig(format!(
                    "max_grad_norm must be positive, got {max_norm}"
                )));
            }
        }
        if self.snapshot_interval == Some(0) {
            return Err(SpiralError::InvalidConfig("snapshot_interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_configs_fill_in_defaults() -> Result<()> {
        let config: SpiralConfig =
            serde_json::from_str(r#"{"timestep_limit": 3, "conditional": true}"#)?;
        assert_eq!(config.timestep_limit, 3);
        assert!(config.conditional);
        assert_eq!(config.rollout_n, 1);
        config.validate()
    }

    #[test]
    fn degenerate_configs_are_rejected() {
        for config in [
            SpiralConfig {
                timestep_limit: 0,
                ..Default::default()
            },
            SpiralConfig {
                rollout_n: 0,
                ..Default::default()
            },
            SpiralConfig {
                gamma: 1.5,
                ..Default::default()
            },
            SpiralConfig {
                max_grad_norm: Some(f32::NAN),
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }
}
