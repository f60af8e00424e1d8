//! One training step's worth of computation, from fresh rollouts to gradient proposals.
//! Nothing here writes shared state: the caller decides where the proposals go.

use super::config::SpiralConfig;
use crate::{
    networks::{Parameterized, discriminator::Discriminator, generator::Generator},
    optim::grads::NamedGrads,
};
use candle_core::{Device, Tensor};
use spiral_core::{
    Result,
    dataset::{Dataset, Sample},
    env::Env,
    reward::{RewardComposer, RolloutRewards},
    sampler::RolloutCollector,
    strategies::Strategies,
    tensors::{Advantages, PolicyLoss, Returns, ValueLoss},
    utils::rollout_buffer::RolloutBuffer,
};
use tracing::warn;

/// Discounted returns with a zero bootstrap after the last step.
pub fn discounted_returns(rewards: &[f32], gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.; rewards.len()];
    let mut running = 0.;
    for (idx, reward) in rewards.iter().enumerate().rev() {
        running = reward + gamma * running;
        returns[idx] = running;
    }
    returns
}

/// Shifts and scales `values` to zero mean and unit variance.
pub fn normalize(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
    for v in values.iter_mut() {
        *v = (*v - mean) / (std + 1e-8);
    }
}

#[derive(Debug)]
pub struct GradientProposal {
    pub grads: NamedGrads,
    pub loss: f32,
    /// Global norm before clipping.
    pub grad_norm: f32,
}

/// Back-propagates `loss` into `network`. Non-finite losses or gradients are reported and
/// yield no proposal.
pub fn propose(
    loss: &Tensor,
    network: &impl Parameterized,
    max_grad_norm: Option<f32>,
) -> Result<Option<GradientProposal>> {
    let loss_value = loss.to_scalar::<f32>()?;
    if !loss_value.is_finite() {
        warn!(network = %network.role(), loss = loss_value, "non-finite loss, skipping update");
        return Ok(None);
    }
    let mut grads = NamedGrads::from_loss(loss, network)?;
    let grad_norm = grads.global_norm()?;
    if !grad_norm.is_finite() {
        warn!(network = %network.role(), grad_norm, "non-finite gradients, skipping update");
        return Ok(None);
    }
    if let Some(max_norm) = max_grad_norm {
        grads.clip_to_norm(max_norm, grad_norm)?;
    }
    Ok(Some(GradientProposal {
        grads,
        loss: loss_value,
        grad_norm,
    }))
}

#[derive(Debug)]
pub struct StepOutput {
    pub transitions: usize,
    pub rewards: Vec<RolloutRewards>,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub generator: Option<GradientProposal>,
    pub discriminator: Option<GradientProposal>,
}

pub struct StepLearner<'a> {
    pub generator: &'a Generator,
    pub discriminator: &'a Discriminator,
    pub dataset: &'a dyn Dataset,
    pub strategies: &'a Strategies,
    pub config: &'a SpiralConfig,
}

struct GeneratorLosses {
    total: Tensor,
    policy: PolicyLoss,
    value: ValueLoss,
    entropy: Tensor,
}

impl StepLearner<'_> {
    fn device(&self) -> &Device {
        self.generator.device()
    }

    /// Collects `rollout_n` rollouts, scores them with the current discriminator and proposes
    /// an update for both networks.
    pub fn run<E: Env + ?Sized>(&self, env: &mut E) -> Result<StepOutput> {
        let collector = RolloutCollector {
            strategies: self.strategies,
            timestep_limit: self.config.timestep_limit,
            exploration: self.config.exploration,
            device: self.device(),
        };
        let conditioning = self.config.conditional.then_some(self.dataset);
        let rollouts = (0..self.config.rollout_n)
            .map(|_| collector.collect(self.generator, env, conditioning))
            .collect::<Result<Vec<_>>>()?;

        let composer = RewardComposer {
            config: &self.config.reward,
            strategies: self.strategies,
            device: self.device(),
        };
        let rewards = rollouts
            .iter()
            .map(|rollout| composer.compose(rollout, self.discriminator))
            .collect::<Result<Vec<_>>>()?;

        let transitions = rollouts.iter().map(RolloutBuffer::len).sum();
        let mut output = StepOutput {
            transitions,
            rewards,
            policy_loss: 0.,
            value_loss: 0.,
            entropy: 0.,
            generator: None,
            discriminator: None,
        };
        if transitions == 0 {
            return Ok(output);
        }

        let losses = self.generator_losses(&rollouts, &output.rewards)?;
        output.policy_loss = losses.policy.to_scalar::<f32>()?;
        output.value_loss = losses.value.to_scalar::<f32>()?;
        output.entropy = losses.entropy.to_scalar::<f32>()?;
        output.generator = propose(&losses.total, self.generator, self.config.max_grad_norm)?;
        output.discriminator = self.discriminator_proposal(&rollouts)?;
        Ok(output)
    }

    fn generator_losses(
        &self,
        rollouts: &[RolloutBuffer],
        rewards: &[RolloutRewards],
    ) -> Result<GeneratorLosses> {
        let mut inputs = vec![];
        let mut samples = vec![];
        let mut returns = vec![];
        for (rollout, rewards) in rollouts.iter().zip(rewards) {
            inputs.extend(rollout.inputs.iter().cloned());
            samples.extend_from_slice(&rollout.samples);
            returns.extend(discounted_returns(&rewards.per_step, self.config.gamma));
        }
        let inputs = Tensor::stack(&inputs, 0)?;
        let heads = self.generator.forward(&inputs)?;
        let (logp, entropy) = self.generator.log_probs_and_entropy(&heads, &samples)?;

        let values: Vec<f32> = heads.value.detach().to_vec1()?;
        let mut advantages: Vec<f32> = returns.iter().zip(&values).map(|(r, v)| r - v).collect();
        normalize(&mut advantages);
        let batch = advantages.len();
        let advantages = Advantages(Tensor::from_vec(advantages, batch, self.device())?);
        let returns = Returns(Tensor::from_vec(returns, batch, self.device())?);

        let policy = PolicyLoss(advantages.mul(&logp)?.mean_all()?.neg()?);
        let value = ValueLoss(returns.sub(&heads.value)?.sqr()?.mean_all()?);
        let entropy = entropy.mean_all()?;
        let total = policy
            .add(&value.affine(self.config.value_coef as f64, 0.)?)?
            .sub(&entropy.affine(self.config.entropy_coef as f64, 0.)?)?;
        Ok(GeneratorLosses {
            total,
            policy,
            value,
            entropy,
        })
    }

    /// Real targets are the rollouts' own conditioning samples when conditional, otherwise one
    /// fresh dataset sample per rollout. Fakes are the final canvases.
    fn discriminator_proposal(&self, rollouts: &[RolloutBuffer]) -> Result<Option<GradientProposal>> {
        let real_samples: Vec<Sample> = if self.config.conditional {
            rollouts.iter().filter_map(|r| r.condition.clone()).collect()
        } else {
            (0..rollouts.len())
                .map(|_| self.dataset.sample())
                .collect::<Result<_>>()?
        };
        let fakes = rollouts
            .iter()
            .filter_map(RolloutBuffer::final_observation)
            .map(|observation| self.strategies.image_input(&observation.image, self.device()))
            .collect::<Result<Vec<_>>>()?;
        if fakes.is_empty() || real_samples.len() != fakes.len() {
            return Ok(None);
        }
        let reals = real_samples
            .iter()
            .map(|sample| self.strategies.image_input(&sample.target, self.device()))
            .collect::<Result<Vec<_>>>()?;
        let conditions = if self.discriminator.is_conditional() {
            let rows = real_samples
                .iter()
                .map(|sample| Tensor::new(sample.condition.as_slice(), self.device()))
                .collect::<candle_core::Result<Vec<_>>>()?;
            Some(Tensor::stack(&rows, 0)?)
        } else {
            None
        };

        let loss = self.discriminator.loss(
            &Tensor::stack(&reals, 0)?,
            &Tensor::stack(&fakes, 0)?,
            conditions.as_ref(),
        )?;
        let proposal = propose(&loss, self.discriminator, self.config.max_grad_norm)?;
        if let Some(proposal) = &proposal {
            if proposal.grad_norm < self.config.saturation_threshold {
                warn!(
                    grad_norm = proposal.grad_norm,
                    loss = proposal.loss,
                    "discriminator gradients vanished, it may have saturated"
                );
            }
        }
        Ok(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_discount_from_the_end() {
        let returns = discounted_returns(&[0., 0., 1.], 0.5);
        assert_eq!(returns, vec![0.25, 0.5, 1.]);
    }

    #[test]
    fn normalized_values_have_zero_mean() {
        let mut values = vec![1., 2., 3., 4.];
        normalize(&mut values);
        assert!(values.iter().sum::<f32>().abs() < 1e-5);
        let var = values.iter().map(|v| v * v).sum::<f32>() / 4.;
        assert!((var - 1.).abs() < 1e-4);

        let mut constant = vec![2., 2.];
        normalize(&mut constant);
        assert_eq!(constant, vec![0., 0.]);
    }
}
