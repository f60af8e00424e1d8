pub mod config;
pub mod hooks;
pub mod learning;

use crate::{
    networks::{
        NetworkRole, Parameterized,
        discriminator::Discriminator,
        generator::Generator,
    },
    optim::AsyncOptimizer,
    snapshot::{self, LoadedNetwork, NetworkSnapshot},
};
use candle_core::Tensor;
use config::SpiralConfig;
use hooks::{HookResult, SpiralHooks};
use learning::{StepLearner, StepOutput};
use serde::Serialize;
use spiral_core::{
    Result, SpiralError,
    dataset::{Dataset, Sample},
    env::{Action, Env, Observation},
    policies::Policy,
    sampler::policy_input,
    strategies::Strategies,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

/// What one training step did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainStats {
    pub step: usize,
    pub transitions: usize,
    /// Mean over rollouts of the summed per-step reward.
    pub mean_reward: f32,
    pub mean_adversarial: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    /// `None` when the update was skipped.
    pub generator_grad_norm: Option<f32>,
    pub discriminator_loss: Option<f32>,
    pub discriminator_grad_norm: Option<f32>,
}

impl TrainStats {
    pub fn from_output(step: usize, output: &StepOutput) -> Self {
        let rollouts = output.rewards.len().max(1) as f32;
        Self {
            step,
            transitions: output.transitions,
            mean_reward: output.rewards.iter().map(|r| r.total()).sum::<f32>() / rollouts,
            mean_adversarial: output.rewards.iter().map(|r| r.adversarial).sum::<f32>() / rollouts,
            policy_loss: output.policy_loss,
            value_loss: output.value_loss,
            entropy: output.entropy,
            generator_grad_norm: output.generator.as_ref().map(|p| p.grad_norm),
            discriminator_loss: output.discriminator.as_ref().map(|p| p.loss),
            discriminator_grad_norm: output.discriminator.as_ref().map(|p| p.grad_norm),
        }
    }
}

/// Everything needed to assemble an agent. Both optimizers must already be bound to their
/// networks with [`AsyncOptimizer::setup`].
pub struct SpiralParts {
    pub generator: Generator,
    pub discriminator: Discriminator,
    pub gen_optimizer: AsyncOptimizer,
    pub dis_optimizer: AsyncOptimizer,
    pub dataset: Arc<dyn Dataset>,
    pub strategies: Strategies,
    pub config: SpiralConfig,
}

fn check_binding(optimizer: &AsyncOptimizer, network: &impl Parameterized) -> Result<()> {
    if !optimizer.is_bound() {
        return Err(SpiralError::OptimizerNotBound(network.role().to_string()));
    }
    if !optimizer.is_bound_to(network)? {
        return Err(SpiralError::OptimizerBindingMismatch(network.role().to_string()));
    }
    Ok(())
}

/// Saved moving averages are only reused by the rule that wrote them.
fn restorable_state<'a>(
    optimizer: &AsyncOptimizer,
    network: &'a LoadedNetwork,
) -> Option<&'a HashMap<String, Tensor>> {
    if network.update_rule == optimizer.rule_name() {
        network.optimizer_state.as_ref()
    } else {
        None
    }
}

pub struct Spiral {
    generator: Generator,
    discriminator: Discriminator,
    gen_optimizer: Arc<AsyncOptimizer>,
    dis_optimizer: Arc<AsyncOptimizer>,
    dataset: Arc<dyn Dataset>,
    strategies: Strategies,
    config: SpiralConfig,
    hooks: SpiralHooks,
    step: usize,
}

impl Spiral {
    pub fn new(parts: SpiralParts) -> Result<Self> {
        let SpiralParts {
            generator,
            discriminator,
            gen_optimizer,
            dis_optimizer,
            dataset,
            strategies,
            config,
        } = parts;
        config.validate()?;
        let condition_dim = if config.conditional {
            dataset.condition_dim()
        } else {
            0
        };
        if generator.arch().condition_dim != condition_dim {
            return Err(SpiralError::InvalidConfig(format!(
                "generator expects a condition of {} values, the agent provides {condition_dim}",
                generator.arch().condition_dim
            )));
        }
        let dis_condition_dim = discriminator.arch().condition_dim;
        if dis_condition_dim != 0 && dis_condition_dim != condition_dim {
            return Err(SpiralError::InvalidConfig(format!(
                "discriminator expects a condition of {dis_condition_dim} values, the agent provides {condition_dim}"
            )));
        }
        if generator.arch().imsize != discriminator.arch().imsize {
            return Err(SpiralError::InvalidConfig(
                "generator and discriminator disagree on the canvas size".into(),
            ));
        }
        check_binding(&gen_optimizer, &generator)?;
        check_binding(&dis_optimizer, &discriminator)?;
        Ok(Self {
            generator,
            discriminator,
            gen_optimizer: Arc::new(gen_optimizer),
            dis_optimizer: Arc::new(dis_optimizer),
            dataset,
            strategies,
            config,
            hooks: SpiralHooks::empty(),
            step: 0,
        })
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    pub fn gen_optimizer(&self) -> &Arc<AsyncOptimizer> {
        &self.gen_optimizer
    }

    pub fn dis_optimizer(&self) -> &Arc<AsyncOptimizer> {
        &self.dis_optimizer
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    pub fn strategies(&self) -> &Strategies {
        &self.strategies
    }

    pub fn config(&self) -> &SpiralConfig {
        &self.config
    }

    pub fn hooks_mut(&mut self) -> &mut SpiralHooks {
        &mut self.hooks
    }

    /// Completed training steps, restored by [`Spiral::load`].
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn learner(&self) -> StepLearner<'_> {
        StepLearner {
            generator: &self.generator,
            discriminator: &self.discriminator,
            dataset: self.dataset.as_ref(),
            strategies: &self.strategies,
            config: &self.config,
        }
    }

    /// Fresh copies of both networks holding the current shared parameters.
    pub fn local_networks(&self) -> Result<(Generator, Discriminator)> {
        let generator = Generator::new(self.generator.arch().clone(), self.generator.device())?;
        let discriminator =
            Discriminator::new(self.discriminator.arch().clone(), self.discriminator.device())?;
        self.gen_optimizer.pull_into(&generator)?;
        self.dis_optimizer.pull_into(&discriminator)?;
        Ok((generator, discriminator))
    }

    /// Picks one action for `observation` with the configured exploration mode.
    pub fn act(&self, observation: &Observation, condition: Option<&Sample>) -> Result<Action> {
        let device = self.generator.device();
        let condition = condition
            .map(|sample| Tensor::new(sample.condition.as_slice(), device))
            .transpose()?;
        let input = policy_input(&self.strategies, observation, condition.as_ref(), device)?;
        let sample = self
            .generator
            .sample_action(&input, self.config.exploration)?;
        self.strategies.pack_action.pack(&sample)
    }

    /// Rollouts, rewards from the current discriminator, then one update of each network.
    pub fn train_step<E: Env + ?Sized>(&mut self, env: &mut E) -> Result<TrainStats> {
        let output = self.learner().run(env)?;
        if let Some(proposal) = &output.generator {
            self.gen_optimizer.apply(&proposal.grads)?;
        }
        if let Some(proposal) = &output.discriminator {
            self.dis_optimizer.apply(&proposal.grads)?;
        }
        self.step += 1;
        let stats = TrainStats::from_output(self.step, &output);
        debug!(
            step = stats.step,
            reward = stats.mean_reward,
            policy_loss = stats.policy_loss,
            discriminator_loss = ?stats.discriminator_loss,
            "training step"
        );
        Ok(stats)
    }

    /// Runs `steps` training steps, snapshotting into `snapshot_dir` at the configured
    /// interval. Stops early when the after-step hook asks to.
    pub fn train<E: Env + ?Sized>(
        &mut self,
        env: &mut E,
        steps: usize,
        snapshot_dir: Option<&Path>,
    ) -> Result<Option<TrainStats>> {
        let mut last = None;
        for _ in 0..steps {
            let stats = self.train_step(env)?;
            if let (Some(dir), Some(interval)) = (snapshot_dir, self.config.snapshot_interval) {
                if self.step % interval == 0 {
                    self.snapshot(self.step, dir)?;
                }
            }
            let hook_result = self.hooks.call_after_step_hook(&stats)?;
            last = Some(stats);
            if let HookResult::Break = hook_result {
                info!(step = self.step, "training stopped by hook");
                break;
            }
        }
        Ok(last)
    }

    /// Publishes every network's parameters and optimizer state as `dir/<step>`.
    pub fn snapshot(&self, step: usize, dir: &Path) -> Result<PathBuf> {
        let networks = [
            NetworkSnapshot {
                role: NetworkRole::Generator,
                update_rule: self.gen_optimizer.rule_name(),
                export: self.gen_optimizer.export()?,
            },
            NetworkSnapshot {
                role: NetworkRole::Discriminator,
                update_rule: self.dis_optimizer.rule_name(),
                export: self.dis_optimizer.export()?,
            },
        ];
        snapshot::write_snapshot(dir, step, &networks)
    }

    /// Restores the snapshot at `path` in place and returns its step. Both networks are checked
    /// before either is written.
    pub fn load(&mut self, path: &Path) -> Result<usize> {
        let loaded = snapshot::read_snapshot(path, self.generator.device())?;
        let generator = loaded.network(NetworkRole::Generator, path)?;
        let discriminator = loaded.network(NetworkRole::Discriminator, path)?;
        let targets = [
            (self.gen_optimizer.as_ref(), generator),
            (self.dis_optimizer.as_ref(), discriminator),
        ];
        for (optimizer, network) in targets {
            optimizer.validate_import(&network.parameters, restorable_state(optimizer, network))?;
        }
        for (optimizer, network) in targets {
            optimizer.import(&network.parameters, restorable_state(optimizer, network))?;
        }
        self.step = loaded.step;
        info!(step = self.step, path = %path.display(), "snapshot restored");
        Ok(self.step)
    }

    /// Loads the newest snapshot under `dir`, if there is one.
    pub fn resume_latest(&mut self, dir: &Path) -> Result<Option<usize>> {
        match snapshot::latest_snapshot(dir)? {
            Some(path) => self.load(&path).map(Some),
            None => Ok(None),
        }
    }
}
