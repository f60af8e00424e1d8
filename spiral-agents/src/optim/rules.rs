use candle_core::Tensor;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use spiral_core::Result;

/// How one parameter tensor moves given its gradient. The per-parameter state is owned by the
/// optimizer table and handed in under the parameter's lock.
#[enum_dispatch]
pub trait UpdateRule {
    /// Names of the per-parameter state tensors, in the order `update` expects them.
    fn state_names(&self) -> &'static [&'static str];

    fn init_state(&self, param: &Tensor) -> Result<Vec<Tensor>> {
        Ok(self
            .state_names()
            .iter()
            .map(|_| param.zeros_like())
            .collect::<candle_core::Result<Vec<_>>>()?)
    }

    /// Returns the new value of `param`, replacing `state` in place.
    fn update(&self, param: &Tensor, grad: &Tensor, state: &mut [Tensor]) -> Result<Tensor>;
}

/// RMSprop whose squared-gradient averages are shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RmsPropAsync {
    pub lr: f64,
    pub alpha: f64,
    pub eps: f64,
}

impl Default for RmsPropAsync {
    fn default() -> Self {
        Self {
            lr: 7e-4,
            alpha: 0.99,
            eps: 1e-8,
        }
    }
}

impl UpdateRule for RmsPropAsync {
    fn state_names(&self) -> &'static [&'static str] {
        &["ms"]
    }

    fn update(&self, param: &Tensor, grad: &Tensor, state: &mut [Tensor]) -> Result<Tensor> {
        let ms = &mut state[0];
        *ms = ms
            .affine(self.alpha, 0.)?
            .add(&grad.sqr()?.affine(1. - self.alpha, 0.)?)?;
        let step = grad.div(&ms.affine(1., self.eps)?.sqrt()?)?;
        Ok(param.sub(&step.affine(self.lr, 0.)?)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sgd {
    pub lr: f64,
}

impl Default for Sgd {
    fn default() -> Self {
        Self { lr: 1e-2 }
    }
}

impl UpdateRule for Sgd {
    fn state_names(&self) -> &'static [&'static str] {
        &[]
    }

    fn update(&self, param: &Tensor, grad: &Tensor, _state: &mut [Tensor]) -> Result<Tensor> {
        Ok(param.sub(&grad.affine(self.lr, 0.)?)?)
    }
}

#[enum_dispatch(UpdateRule)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateRuleKind {
    RmsPropAsync(RmsPropAsync),
    Sgd(Sgd),
}

impl Default for UpdateRuleKind {
    fn default() -> Self {
        Self::RmsPropAsync(RmsPropAsync::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn rmsprop_follows_the_shared_average() -> Result<()> {
        let rule = RmsPropAsync {
            lr: 0.1,
            alpha: 0.5,
            eps: 0.,
        };
        let param = Tensor::new(&[1f32, 1.], &Device::Cpu)?;
        let grad = Tensor::new(&[2f32, -2.], &Device::Cpu)?;
        let mut state = rule.init_state(&param)?;
        let param = rule.update(&param, &grad, &mut state)?;
        // ms = 0.5 * 4, step = 2 / sqrt(2)
        let expected = 1. - 0.1 * 2. / 2f32.sqrt();
        let values: Vec<f32> = param.to_vec1()?;
        assert!((values[0] - expected).abs() < 1e-6);
        assert!((values[1] - (2. - expected)).abs() < 1e-6);
        assert_eq!(state[0].to_vec1::<f32>()?, vec![2., 2.]);
        Ok(())
    }

    #[test]
    fn rule_kind_is_tagged_by_name() -> Result<()> {
        let rule: UpdateRuleKind = serde_json::from_str(r#"{"kind": "sgd", "lr": 0.5}"#)?;
        assert_eq!(rule, UpdateRuleKind::Sgd(Sgd { lr: 0.5 }));
        assert!(rule.state_names().is_empty());
        Ok(())
    }
}
