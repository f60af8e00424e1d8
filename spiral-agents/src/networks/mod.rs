pub mod discriminator;
pub mod generator;
pub mod mlp;

use candle_core::Var;
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use spiral_core::{Result, SpiralError};
use std::{collections::BTreeMap, fmt};

/// Which trainable network a parameter set belongs to. Also names its files in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRole {
    Generator,
    Discriminator,
}

impl NetworkRole {
    pub fn name(self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Discriminator => "discriminator",
        }
    }
}

impl fmt::Display for NetworkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A network whose parameters live in a [`VarMap`].
pub trait Parameterized {
    fn role(&self) -> NetworkRole;

    fn varmap(&self) -> &VarMap;

    /// Parameters by name, sorted.
    fn named_vars(&self) -> Result<BTreeMap<String, Var>> {
        let data = self
            .varmap()
            .data()
            .lock()
            .map_err(|_| SpiralError::Poisoned("varmap"))?;
        Ok(data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect())
    }
}
