use crate::error::Result;
use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// Raw discrete choice of the generator, before it is packed into an [`crate::env::Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionSample {
    /// Row-major canvas cell the pen moves to.
    pub position: usize,
    /// 1 draws, 0 lifts the pen.
    pub prob: usize,
    pub pressure: usize,
    /// Index into the generator palette.
    pub color: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exploration {
    /// Sample every head from its categorical distribution.
    #[default]
    Sample,
    /// Take the most likely class of every head.
    Greedy,
}

pub trait Policy {
    /// `input` is a single flattened policy input, without batch dimension.
    fn sample_action(&self, input: &Tensor, exploration: Exploration) -> Result<ActionSample>;
}
