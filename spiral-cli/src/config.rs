use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spiral_api::builders::spiral::SpiralBuilder;
use spiral_env::ToyDataset;
use std::path::Path;

/// Everything a training run reads from its TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub agent: SpiralBuilder,
    /// Training targets, each a list of row-major cells painted black.
    pub patterns: Vec<Vec<usize>>,
    /// Held-out targets, scored once training ends.
    pub test_patterns: Vec<Vec<usize>>,
    /// When set, only this many snapshots are kept after training.
    pub keep_snapshots: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let mut agent = SpiralBuilder {
            imsize: 4,
            generator_layers: vec![64, 64],
            discriminator_layers: vec![64, 32],
            ..Default::default()
        };
        agent.config.timestep_limit = 4;
        Self {
            agent,
            patterns: vec![vec![0, 5, 10, 15], vec![3, 6, 9, 12]],
            test_patterns: vec![vec![1, 5, 9, 13]],
            keep_snapshots: None,
        }
    }
}

impl RunConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn dataset(&self) -> Result<ToyDataset> {
        Ok(ToyDataset::new(
            self.agent.imsize,
            self.patterns.clone(),
            self.test_patterns.clone(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_dataset() -> Result<()> {
        let config = RunConfig::default();
        config.dataset()?;
        Ok(())
    }

    #[test]
    fn partial_files_keep_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            "patterns = [[0, 1]]\n\n[agent]\nimsize = 2\n\n[agent.config]\nrollout_n = 2\n",
        )?;
        let config = RunConfig::load(Some(&path))?;
        assert_eq!(config.agent.imsize, 2);
        assert_eq!(config.agent.config.rollout_n, 2);
        assert_eq!(config.agent.generator_layers, vec![128, 128]);
        assert_eq!(config.patterns, vec![vec![0, 1]]);
        assert_eq!(config.keep_snapshots, None);
        Ok(())
    }
}
