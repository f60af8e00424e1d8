//! The drawing policy: one shared trunk, one categorical head per action component and a
//! value head used as the policy-gradient baseline.

use super::{NetworkRole, Parameterized, mlp::Mlp};
use candle_core::{DType, Device, Tensor};
use candle_nn::{
    Linear, Module, VarBuilder, VarMap, linear,
    ops::{log_softmax, softmax},
};
use rand::distr::{Distribution, weighted::WeightedIndex};
use serde::{Deserialize, Serialize};
use spiral_core::{
    Result, SpiralError,
    policies::{ActionSample, Exploration, Policy},
    rng::with_rng,
    strategies::GridActionPacker,
    tensors::Logp,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorArch {
    /// Side of the square canvas; the position head has `imsize * imsize` cells.
    pub imsize: usize,
    /// Zero for an unconditional generator.
    pub condition_dim: usize,
    pub hidden_layers: Vec<usize>,
    pub pressure_levels: usize,
    pub palette: Vec<[f32; 3]>,
}

impl Default for GeneratorArch {
    fn default() -> Self {
        Self {
            imsize: 16,
            condition_dim: 0,
            hidden_layers: vec![128, 128],
            pressure_levels: 4,
            palette: vec![[0., 0., 0.]],
        }
    }
}

impl GeneratorArch {
    /// Flattened canvas, pen position and condition.
    pub fn input_dim(&self) -> usize {
        self.imsize * self.imsize * 3 + 2 + self.condition_dim
    }

    /// The packer that interprets this generator's samples.
    pub fn packer(&self) -> GridActionPacker {
        GridActionPacker {
            imsize: self.imsize,
            pressure_levels: self.pressure_levels,
            palette: self.palette.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.imsize == 0 || self.pressure_levels == 0 || self.palette.is_empty() {
            return Err(SpiralError::InvalidConfig(format!(
                "generator needs a non-empty canvas, pressure levels and palette: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Logits of every head, `[batch, classes]`, and the value estimate, `[batch]`.
#[derive(Debug)]
pub struct PolicyHeads {
    pub position: Tensor,
    pub prob: Tensor,
    pub pressure: Tensor,
    pub color: Tensor,
    pub value: Tensor,
}

impl PolicyHeads {
    fn logits(&self) -> [&Tensor; 4] {
        [&self.position, &self.prob, &self.pressure, &self.color]
    }
}

fn component(sample: &ActionSample, head: usize) -> usize {
    match head {
        0 => sample.position,
        1 => sample.prob,
        2 => sample.pressure,
        _ => sample.color,
    }
}

fn choose(probs: &[f32], exploration: Exploration) -> Result<usize> {
    match exploration {
        Exploration::Sample => {
            let distribution = WeightedIndex::new(probs)
                .map_err(|err| SpiralError::InvalidAction(format!("bad action distribution: {err}")))?;
            Ok(with_rng(|rng| distribution.sample(rng)))
        }
        Exploration::Greedy => probs
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (idx, p)| match best {
                Some((_, best_p)) if best_p >= *p => best,
                _ => Some((idx, *p)),
            })
            .map(|(idx, _)| idx)
            .ok_or_else(|| SpiralError::InvalidAction("empty action head".into())),
    }
}

pub struct Generator {
    arch: GeneratorArch,
    varmap: VarMap,
    device: Device,
    trunk: Mlp,
    position: Linear,
    prob: Linear,
    pressure: Linear,
    color: Linear,
    value: Linear,
}

impl Generator {
    pub fn new(arch: GeneratorArch, device: &Device) -> Result<Self> {
        arch.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let (trunk, hidden) = Mlp::build(arch.input_dim(), &arch.hidden_layers, true, &vb, "trunk")?;
        let position = linear(hidden, arch.imsize * arch.imsize, vb.pp("position"))?;
        let prob = linear(hidden, 2, vb.pp("prob"))?;
        let pressure = linear(hidden, arch.pressure_levels, vb.pp("pressure"))?;
        let color = linear(hidden, arch.palette.len(), vb.pp("color"))?;
        let value = linear(hidden, 1, vb.pp("value"))?;
        Ok(Self {
            arch,
            varmap,
            device: device.clone(),
            trunk,
            position,
            prob,
            pressure,
            color,
            value,
        })
    }

    pub fn arch(&self) -> &GeneratorArch {
        &self.arch
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// `inputs` is `[batch, input_dim]`.
    pub fn forward(&self, inputs: &Tensor) -> Result<PolicyHeads> {
        let hidden = self.trunk.forward(inputs)?;
        Ok(PolicyHeads {
            position: self.position.forward(&hidden)?,
            prob: self.prob.forward(&hidden)?,
            pressure: self.pressure.forward(&hidden)?,
            color: self.color.forward(&hidden)?,
            value: self.value.forward(&hidden)?.squeeze(1)?,
        })
    }

    /// Joint log probability of `samples` under `heads` and the summed entropy of the heads,
    /// both `[batch]`.
    pub fn log_probs_and_entropy(
        &self,
        heads: &PolicyHeads,
        samples: &[ActionSample],
    ) -> Result<(Logp, Tensor)> {
        let batch = samples.len();
        let mut logp = Tensor::zeros(batch, DType::F32, &self.device)?;
        let mut entropy = Tensor::zeros(batch, DType::F32, &self.device)?;
        for (head, logits) in heads.logits().into_iter().enumerate() {
            let classes = logits.dim(1)?;
            let mut mask = vec![0f32; batch * classes];
            for (row, sample) in samples.iter().enumerate() {
                let class = component(sample, head);
                if class >= classes {
                    return Err(SpiralError::InvalidAction(format!(
                        "class {class} outside a head of {classes}"
                    )));
                }
                mask[row * classes + class] = 1.;
            }
            let mask = Tensor::from_vec(mask, (batch, classes), &self.device)?;
            let log_probs = log_softmax(logits, 1)?;
            logp = logp.add(&mask.mul(&log_probs)?.sum(1)?)?;
            let head_entropy = softmax(logits, 1)?.mul(&log_probs)?.sum(1)?.neg()?;
            entropy = entropy.add(&head_entropy)?;
        }
        Ok((Logp(logp), entropy))
    }
}

impl Policy for Generator {
    fn sample_action(&self, input: &Tensor, exploration: Exploration) -> Result<ActionSample> {
        if input.rank() != 1 {
            return Err(SpiralError::InvalidConfig(format!(
                "policy input should be a flattened tensor, got {:?}",
                input.dims()
            )));
        }
        let heads = self.forward(&input.unsqueeze(0)?.detach())?;
        let mut choices = [0usize; 4];
        for (choice, logits) in choices.iter_mut().zip(heads.logits()) {
            let probs: Vec<f32> = softmax(logits, 1)?.squeeze(0)?.to_vec1()?;
            *choice = choose(&probs, exploration)?;
        }
        let [position, prob, pressure, color] = choices;
        Ok(ActionSample {
            position,
            prob,
            pressure,
            color,
        })
    }
}

impl Parameterized for Generator {
    fn role(&self) -> NetworkRole {
        NetworkRole::Generator
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiral_core::strategies::PackAction;

    fn arch() -> GeneratorArch {
        GeneratorArch {
            imsize: 3,
            condition_dim: 3,
            hidden_layers: vec![16],
            pressure_levels: 2,
            palette: vec![[0., 0., 0.], [1., 1., 1.]],
        }
    }

    #[test]
    fn heads_have_the_action_shapes() -> Result<()> {
        let generator = Generator::new(arch(), &Device::Cpu)?;
        let inputs = Tensor::zeros((5, arch().input_dim()), DType::F32, &Device::Cpu)?;
        let heads = generator.forward(&inputs)?;
        assert_eq!(heads.position.dims(), &[5, 9]);
        assert_eq!(heads.prob.dims(), &[5, 2]);
        assert_eq!(heads.pressure.dims(), &[5, 2]);
        assert_eq!(heads.color.dims(), &[5, 2]);
        assert_eq!(heads.value.dims(), &[5]);
        Ok(())
    }

    #[test]
    fn samples_stay_inside_the_heads() -> Result<()> {
        let generator = Generator::new(arch(), &Device::Cpu)?;
        let input = Tensor::ones(arch().input_dim(), DType::F32, &Device::Cpu)?;
        for exploration in [Exploration::Sample, Exploration::Greedy] {
            for _ in 0..20 {
                let sample = generator.sample_action(&input, exploration)?;
                assert!(sample.position < 9);
                assert!(sample.prob < 2);
                assert!(sample.pressure < 2);
                assert!(sample.color < 2);
                arch().packer().pack(&sample)?;
            }
        }
        Ok(())
    }

    #[test]
    fn log_probs_are_negative_and_entropy_positive() -> Result<()> {
        let generator = Generator::new(arch(), &Device::Cpu)?;
        let inputs = Tensor::ones((2, arch().input_dim()), DType::F32, &Device::Cpu)?;
        let heads = generator.forward(&inputs)?;
        let samples = [
            ActionSample {
                position: 0,
                prob: 1,
                pressure: 0,
                color: 1,
            },
            ActionSample {
                position: 8,
                prob: 0,
                pressure: 1,
                color: 0,
            },
        ];
        let (logp, entropy) = generator.log_probs_and_entropy(&heads, &samples)?;
        let logp: Vec<f32> = logp.to_vec1()?;
        let entropy: Vec<f32> = entropy.to_vec1()?;
        assert!(logp.iter().all(|l| *l < 0.));
        assert!(entropy.iter().all(|e| *e > 0.));
        Ok(())
    }

    #[test]
    fn greedy_takes_the_most_likely_class() -> Result<()> {
        assert_eq!(choose(&[0.1, 0.7, 0.2], Exploration::Greedy)?, 1);
        assert_eq!(choose(&[0., 1., 0.], Exploration::Sample)?, 1);
        assert!(choose(&[], Exploration::Greedy).is_err());
        Ok(())
    }
}
