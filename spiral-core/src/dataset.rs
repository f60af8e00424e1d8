use crate::{env::Image, error::Result};

/// A conditioning sample: what the generator is asked to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub condition: Vec<f32>,
    pub target: Image,
}

/// Read-only source of targets. Implementations are shared between workers without locking, so
/// `sample` takes `&self` and draws independently on every call.
pub trait Dataset: Send + Sync {
    fn sample(&self) -> Result<Sample>;

    /// Length of every `Sample::condition` this dataset returns.
    fn condition_dim(&self) -> usize;
}
