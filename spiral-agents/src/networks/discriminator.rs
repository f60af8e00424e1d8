use super::{NetworkRole, Parameterized, mlp::Mlp};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use spiral_core::{Result, SpiralError, reward::Critic, tensors::DiscriminatorLoss};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscriminatorArch {
    pub imsize: usize,
    /// Zero for an unconditional discriminator.
    pub condition_dim: usize,
    pub hidden_layers: Vec<usize>,
}

impl Default for DiscriminatorArch {
    fn default() -> Self {
        Self {
            imsize: 16,
            condition_dim: 0,
            hidden_layers: vec![128, 64],
        }
    }
}

impl DiscriminatorArch {
    pub fn input_dim(&self) -> usize {
        self.imsize * self.imsize * 3 + self.condition_dim
    }
}

/// softplus(-|x|), the numerically safe tail of the logistic loss.
fn softplus_neg_abs(logits: &Tensor) -> Result<Tensor> {
    Ok(logits.abs()?.neg()?.exp()?.affine(1., 1.)?.log()?)
}

/// Real/fake classifier over flattened canvases.
pub struct Discriminator {
    arch: DiscriminatorArch,
    varmap: VarMap,
    device: Device,
    net: Mlp,
}

impl Discriminator {
    pub fn new(arch: DiscriminatorArch, device: &Device) -> Result<Self> {
        if arch.imsize == 0 {
            return Err(SpiralError::InvalidConfig(
                "discriminator canvas size must be positive".into(),
            ));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let mut layers = arch.hidden_layers.clone();
        layers.push(1);
        let (net, _) = Mlp::build(arch.input_dim(), &layers, false, &vb, "layer")?;
        Ok(Self {
            arch,
            varmap,
            device: device.clone(),
            net,
        })
    }

    pub fn arch(&self) -> &DiscriminatorArch {
        &self.arch
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_conditional(&self) -> bool {
        self.arch.condition_dim > 0
    }

    /// `images` is `[batch, imsize * imsize * 3]`, `conditions` `[batch, condition_dim]`.
    /// Returns one logit per row.
    pub fn logits(&self, images: &Tensor, conditions: Option<&Tensor>) -> Result<Tensor> {
        let inputs = match (self.is_conditional(), conditions) {
            (false, _) => images.clone(),
            (true, Some(conditions)) => Tensor::cat(&[images, conditions], 1)?,
            (true, None) => {
                return Err(SpiralError::InvalidConfig(
                    "conditional discriminator called without a condition".into(),
                ));
            }
        };
        Ok(self.net.forward(&inputs)?.squeeze(1)?)
    }

    /// Binary cross entropy of real rows labelled 1 and fake rows labelled 0.
    pub fn loss(
        &self,
        real: &Tensor,
        fake: &Tensor,
        conditions: Option<&Tensor>,
    ) -> Result<DiscriminatorLoss> {
        let real_logits = self.logits(real, conditions)?;
        let fake_logits = self.logits(fake, conditions)?;
        // max(x, 0) - x * y + log(1 + exp(-|x|))
        let real_terms = real_logits
            .relu()?
            .sub(&real_logits)?
            .add(&softplus_neg_abs(&real_logits)?)?;
        let fake_terms = fake_logits.relu()?.add(&softplus_neg_abs(&fake_logits)?)?;
        let loss = Tensor::cat(&[&real_terms, &fake_terms], 0)?.mean_all()?;
        Ok(DiscriminatorLoss(loss))
    }
}

impl Critic for Discriminator {
    fn logit(&self, image: &Tensor, condition: Option<&Tensor>) -> Result<f32> {
        let condition = condition.map(|c| c.unsqueeze(0)).transpose()?;
        let logits = self.logits(&image.unsqueeze(0)?.detach(), condition.as_ref())?;
        Ok(logits.squeeze(0)?.to_scalar::<f32>()?)
    }
}

impl Parameterized for Discriminator {
    fn role(&self) -> NetworkRole {
        NetworkRole::Discriminator
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logistic_loss_matches_the_closed_form() -> Result<()> {
        let arch = DiscriminatorArch {
            imsize: 1,
            condition_dim: 0,
            hidden_layers: vec![],
        };
        let discriminator = Discriminator::new(arch, &Device::Cpu)?;
        let real = Tensor::new(&[[0.2f32, 0.4, 0.6]], &Device::Cpu)?;
        let fake = Tensor::new(&[[0.9f32, 0.1, 0.3]], &Device::Cpu)?;
        let x_real = discriminator.logits(&real, None)?.to_vec1::<f32>()?[0];
        let x_fake = discriminator.logits(&fake, None)?.to_vec1::<f32>()?[0];
        let expected = (-(1. / (1. + (-x_real).exp())).ln() - (1. - 1. / (1. + (-x_fake).exp())).ln()) / 2.;
        let loss = discriminator.loss(&real, &fake, None)?.to_scalar::<f32>()?;
        assert!((loss - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn conditional_discriminator_requires_a_condition() -> Result<()> {
        let arch = DiscriminatorArch {
            imsize: 2,
            condition_dim: 3,
            hidden_layers: vec![4],
        };
        let discriminator = Discriminator::new(arch, &Device::Cpu)?;
        let image = Tensor::zeros(12, DType::F32, &Device::Cpu)?;
        assert!(discriminator.logit(&image, None).is_err());
        let condition = Tensor::new(&[0.1f32, 0.2, 0.3], &Device::Cpu)?;
        assert!(discriminator.logit(&image, Some(&condition))?.is_finite());
        Ok(())
    }
}
