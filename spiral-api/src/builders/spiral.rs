use super::optimizer::OptimizerBuilder;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use spiral_agents::{
    Spiral, SpiralConfig, SpiralParts,
    networks::{
        discriminator::{Discriminator, DiscriminatorArch},
        generator::{Generator, GeneratorArch},
    },
};
use spiral_core::{Result, dataset::Dataset, strategies::Strategies};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiralBuilder {
    pub imsize: usize,
    pub generator_layers: Vec<usize>,
    pub discriminator_layers: Vec<usize>,
    pub pressure_levels: usize,
    pub palette: Vec<[f32; 3]>,
    /// Feed the condition to the discriminator too when the agent is conditional.
    pub conditional_discriminator: bool,
    pub gen_optimizer: OptimizerBuilder,
    pub dis_optimizer: OptimizerBuilder,
    pub config: SpiralConfig,
}

impl Default for SpiralBuilder {
    fn default() -> Self {
        SpiralBuilder {
            imsize: 16,
            generator_layers: vec![128, 128],
            discriminator_layers: vec![128, 64],
            pressure_levels: 4,
            palette: vec![[0., 0., 0.]],
            conditional_discriminator: true,
            gen_optimizer: OptimizerBuilder::default(),
            dis_optimizer: OptimizerBuilder::default(),
            config: SpiralConfig::default(),
        }
    }
}

impl SpiralBuilder {
    pub fn generator_arch(&self, dataset: &dyn Dataset) -> GeneratorArch {
        GeneratorArch {
            imsize: self.imsize,
            condition_dim: if self.config.conditional {
                dataset.condition_dim()
            } else {
                0
            },
            hidden_layers: self.generator_layers.clone(),
            pressure_levels: self.pressure_levels,
            palette: self.palette.clone(),
        }
    }

    pub fn discriminator_arch(&self, dataset: &dyn Dataset) -> DiscriminatorArch {
        DiscriminatorArch {
            imsize: self.imsize,
            condition_dim: if self.config.conditional && self.conditional_discriminator {
                dataset.condition_dim()
            } else {
                0
            },
            hidden_layers: self.discriminator_layers.clone(),
        }
    }

    /// Default strategies for this builder's action grid.
    pub fn default_strategies(&self, dataset: &dyn Dataset) -> Strategies {
        Strategies::new(self.generator_arch(dataset).packer())
    }

    pub fn build(
        &self,
        dataset: Arc<dyn Dataset>,
        strategies: Option<Strategies>,
        device: &Device,
    ) -> Result<Spiral> {
        let generator = Generator::new(self.generator_arch(dataset.as_ref()), device)?;
        let discriminator = Discriminator::new(self.discriminator_arch(dataset.as_ref()), device)?;
        let gen_optimizer = self.gen_optimizer.build(&generator)?;
        let dis_optimizer = self.dis_optimizer.build(&discriminator)?;
        let strategies =
            strategies.unwrap_or_else(|| self.default_strategies(dataset.as_ref()));
        debug!(imsize = self.imsize, conditional = self.config.conditional, "building agent");
        Spiral::new(SpiralParts {
            generator,
            discriminator,
            gen_optimizer,
            dis_optimizer,
            dataset,
            strategies,
            config: self.config.clone(),
        })
    }
}
