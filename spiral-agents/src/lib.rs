pub mod networks;
pub mod optim;
pub mod snapshot;
pub mod spiral;
pub mod trainer;

pub use spiral::{Spiral, SpiralParts, TrainStats, config::SpiralConfig};
