use crate::networks::Parameterized;
use candle_core::Tensor;
use derive_more::{Deref, DerefMut};
use spiral_core::Result;
use std::collections::BTreeMap;

/// Gradients keyed by parameter name: the unit a worker proposes to a shared optimizer.
#[derive(Debug, Default, Clone, Deref, DerefMut)]
pub struct NamedGrads(pub BTreeMap<String, Tensor>);

impl NamedGrads {
    /// Back-propagates `loss` and keeps the gradient of every parameter of `net` it reached.
    pub fn from_loss(loss: &Tensor, net: &impl Parameterized) -> Result<Self> {
        let grad_store = loss.backward()?;
        let grads = net
            .named_vars()?
            .into_iter()
            .filter_map(|(name, var)| {
                grad_store
                    .get(var.as_tensor())
                    .map(|grad| (name, grad.detach()))
            })
            .collect();
        Ok(Self(grads))
    }

    pub fn global_norm(&self) -> Result<f32> {
        let mut total_norm_squared = 0f32;
        for grad in self.values() {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
        Ok(total_norm_squared.sqrt())
    }

    /// Rescales every gradient so that the global norm is at most `max_norm`. `norm` is the
    /// current global norm.
    pub fn clip_to_norm(&mut self, max_norm: f32, norm: f32) -> Result<()> {
        if norm <= max_norm {
            return Ok(());
        }
        let clip_coef = (max_norm / (norm + 1e-6)) as f64;
        for grad in self.values_mut() {
            *grad = grad.affine(clip_coef, 0.)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn grads() -> Result<NamedGrads> {
        let mut grads = NamedGrads::default();
        grads.insert("a".into(), Tensor::new(&[3f32, 0.], &Device::Cpu)?);
        grads.insert("b".into(), Tensor::new(&[4f32], &Device::Cpu)?);
        Ok(grads)
    }

    #[test]
    fn norm_spans_every_tensor() -> Result<()> {
        assert_eq!(grads()?.global_norm()?, 5.);
        Ok(())
    }

    #[test]
    fn clipping_bounds_the_norm() -> Result<()> {
        let mut grads = grads()?;
        grads.clip_to_norm(1., 5.)?;
        assert!((grads.global_norm()? - 1.).abs() < 1e-4);

        let mut untouched = self::grads()?;
        untouched.clip_to_norm(10., 5.)?;
        assert_eq!(untouched.global_norm()?, 5.);
        Ok(())
    }
}
