use crate::builders::spiral::SpiralBuilder;
use candle_core::Device;
use spiral_agents::Spiral;
use spiral_core::{
    Result,
    dataset::{Dataset, Sample},
};
use spiral_env::ToyDataset;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Wraps a dataset and counts how often it is sampled.
pub struct CountingDataset<D> {
    inner: D,
    draws: AtomicUsize,
}

impl<D: Dataset> CountingDataset<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            draws: AtomicUsize::new(0),
        }
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }
}

impl<D: Dataset> Dataset for CountingDataset<D> {
    fn sample(&self) -> Result<Sample> {
        self.draws.fetch_add(1, Ordering::SeqCst);
        self.inner.sample()
    }

    fn condition_dim(&self) -> usize {
        self.inner.condition_dim()
    }
}

/// Returns the same sample on every draw.
pub struct FixedDataset(pub Sample);

impl Dataset for FixedDataset {
    fn sample(&self) -> Result<Sample> {
        Ok(self.0.clone())
    }

    fn condition_dim(&self) -> usize {
        self.0.condition.len()
    }
}

/// The toy problem: a 3x3 canvas and a dataset holding the single pattern `(1, 4, 7)`.
pub fn toy_builder(conditional: bool) -> SpiralBuilder {
    let mut builder = SpiralBuilder {
        imsize: 3,
        generator_layers: vec![16],
        discriminator_layers: vec![16],
        pressure_levels: 2,
        ..Default::default()
    };
    builder.config.timestep_limit = 3;
    builder.config.rollout_n = 1;
    builder.config.conditional = conditional;
    builder
}

pub fn toy_dataset() -> Result<CountingDataset<ToyDataset>> {
    let patterns = vec![vec![1, 4, 7]];
    Ok(CountingDataset::new(ToyDataset::new(
        3,
        patterns.clone(),
        patterns,
    )?))
}

pub fn toy_agent(builder: &SpiralBuilder) -> Result<(Spiral, Arc<CountingDataset<ToyDataset>>)> {
    let dataset = Arc::new(toy_dataset()?);
    let agent = builder.build(dataset.clone(), None, &Device::Cpu)?;
    Ok((agent, dataset))
}
