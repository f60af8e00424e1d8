pub mod brush;
pub mod toy_dataset;
pub mod toy_env;
pub mod viewer;

pub use brush::BrushInfo;
pub use toy_dataset::ToyDataset;
pub use toy_env::ToyEnv;
