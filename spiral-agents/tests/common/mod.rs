#![allow(dead_code)]

use candle_core::{Device, Tensor};
use spiral_agents::{
    Spiral, SpiralConfig, SpiralParts,
    networks::{
        Parameterized,
        discriminator::{Discriminator, DiscriminatorArch},
        generator::{Generator, GeneratorArch},
    },
    optim::{AsyncOptimizer, rules::UpdateRuleKind},
};
use spiral_core::{Result, SpiralError, strategies::Strategies};
use spiral_env::ToyDataset;
use std::{collections::BTreeMap, sync::Arc};

pub const IMSIZE: usize = 3;

pub fn toy_agent(conditional: bool, hidden_layers: Vec<usize>) -> Result<Spiral> {
    let condition_dim = if conditional { 3 } else { 0 };
    let generator_arch = GeneratorArch {
        imsize: IMSIZE,
        condition_dim,
        hidden_layers: hidden_layers.clone(),
        pressure_levels: 2,
        palette: vec![[0., 0., 0.]],
    };
    let generator = Generator::new(generator_arch.clone(), &Device::Cpu)?;
    let discriminator = Discriminator::new(
        DiscriminatorArch {
            imsize: IMSIZE,
            condition_dim,
            hidden_layers,
        },
        &Device::Cpu,
    )?;
    let mut gen_optimizer = AsyncOptimizer::new(UpdateRuleKind::default());
    let mut dis_optimizer = AsyncOptimizer::new(UpdateRuleKind::default());
    gen_optimizer.setup(&generator)?;
    dis_optimizer.setup(&discriminator)?;
    let patterns = vec![vec![1, 4, 7]];
    Spiral::new(SpiralParts {
        generator,
        discriminator,
        gen_optimizer,
        dis_optimizer,
        dataset: Arc::new(ToyDataset::new(IMSIZE, patterns.clone(), patterns)?),
        strategies: Strategies::new(generator_arch.packer()),
        config: SpiralConfig {
            timestep_limit: 3,
            rollout_n: 1,
            conditional,
            ..Default::default()
        },
    })
}

/// Raw bit patterns of every parameter, for exact comparisons.
pub fn parameter_bits(network: &impl Parameterized) -> Result<BTreeMap<String, Vec<u32>>> {
    network
        .named_vars()?
        .into_iter()
        .map(|(name, var)| -> Result<(String, Vec<u32>)> {
            let values: Vec<f32> = var.as_tensor().flatten_all()?.to_vec1()?;
            Ok((name, values.into_iter().map(f32::to_bits).collect()))
        })
        .collect()
}

pub fn tempdir() -> Result<tempfile::TempDir> {
    tempfile::tempdir().map_err(|err| SpiralError::io("tempdir", err))
}

pub fn zeros_like_all(network: &impl Parameterized) -> Result<std::collections::HashMap<String, Tensor>> {
    network
        .named_vars()?
        .into_iter()
        .map(|(name, var)| -> Result<(String, Tensor)> {
            Ok((name, var.as_tensor().zeros_like()?))
        })
        .collect()
}
