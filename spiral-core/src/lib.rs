pub mod dataset;
pub mod env;
pub mod error;
pub mod policies;
pub mod reward;
pub mod rng;
pub mod sampler;
pub mod strategies;
pub mod tensors;
pub mod utils;

pub use error::{Result, SpiralError};
