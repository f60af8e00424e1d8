mod common;

use common::{IMSIZE, parameter_bits, tempdir, toy_agent};
use spiral_agents::trainer::{AsyncTrainer, EnvFactory};
use spiral_core::{
    Result, SpiralError,
    env::{Action, Env, Image, Observation, RenderMode, StepOutcome},
};
use spiral_env::ToyEnv;
use std::sync::Arc;

/// A toy canvas whose `step` panics when `explodes` is set.
struct VolatileEnv {
    inner: ToyEnv,
    explodes: bool,
}

impl Env for VolatileEnv {
    fn reset(&mut self) -> Result<Observation> {
        self.inner.reset()
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        if self.explodes {
            panic!("brush snapped");
        }
        self.inner.step(action)
    }

    fn render(&mut self, mode: RenderMode) -> Result<Option<Image>> {
        self.inner.render(mode)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

fn toy_envs() -> EnvFactory<ToyEnv> {
    Arc::new(|_worker: usize| ToyEnv::new(IMSIZE))
}

#[test]
fn workers_share_one_set_of_parameters() -> Result<()> {
    let agent = toy_agent(true, vec![8])?;
    let generator_before = parameter_bits(agent.generator())?;
    let trainer = AsyncTrainer::spawn(&agent, 3, toy_envs())?;
    assert_eq!(trainer.workers(), 3);

    let stats = trainer.train(2)?;
    assert_eq!(stats.len(), 6);
    assert!(stats.iter().all(|s| s.transitions == 3));
    assert_eq!(trainer.completed_steps(), 6);
    assert_eq!(trainer.failed_updates(), 0);
    assert_eq!(agent.gen_optimizer().applied(), 6);
    assert_eq!(agent.dis_optimizer().applied(), 6);
    assert_ne!(parameter_bits(agent.generator())?, generator_before);

    // Training can be resumed with the same workers.
    assert_eq!(trainer.train(1)?.len(), 3);
    assert_eq!(trainer.completed_steps(), 9);
    Ok(())
}

#[test]
fn snapshot_while_workers_are_idle() -> Result<()> {
    let dir = tempdir()?;
    let agent = toy_agent(false, vec![8])?;
    let trainer = AsyncTrainer::spawn(&agent, 2, toy_envs())?;
    trainer.train(1)?;
    let path = agent.snapshot(trainer.completed_steps(), dir.path())?;
    let mut restored = toy_agent(false, vec![8])?;
    restored.load(&path)?;
    assert_eq!(
        parameter_bits(restored.generator())?,
        parameter_bits(agent.generator())?
    );
    Ok(())
}

#[test]
fn failing_environment_is_reported_per_worker() -> Result<()> {
    let agent = toy_agent(false, vec![8])?;
    let factory: EnvFactory<ToyEnv> = Arc::new(|worker: usize| {
        if worker == 1 {
            Err(SpiralError::MissingConfig("BRUSHINFO".into()))
        } else {
            ToyEnv::new(IMSIZE)
        }
    });
    let trainer = AsyncTrainer::spawn(&agent, 2, factory)?;
    let err = trainer.train(1).unwrap_err();
    assert!(matches!(err, SpiralError::Worker { worker: 1, .. }), "{err}");
    Ok(())
}

#[test]
fn panicking_environment_is_reported_instead_of_hanging() -> Result<()> {
    let agent = toy_agent(false, vec![8])?;
    let factory: EnvFactory<VolatileEnv> = Arc::new(|worker: usize| {
        Ok(VolatileEnv {
            inner: ToyEnv::new(IMSIZE)?,
            explodes: worker == 1,
        })
    });
    let trainer = AsyncTrainer::spawn(&agent, 2, factory)?;
    let err = trainer.train(1).unwrap_err();
    match err {
        SpiralError::Worker { worker, message } => {
            assert_eq!(worker, 1);
            assert!(message.contains("brush snapped"), "{message}");
        }
        other => panic!("unexpected error {other}"),
    }
    // The healthy worker kept training and the broken one keeps reporting.
    assert_eq!(agent.gen_optimizer().applied(), 1);
    assert!(matches!(
        trainer.train(1),
        Err(SpiralError::Worker { worker: 1, .. })
    ));
    assert_eq!(agent.gen_optimizer().applied(), 2);
    Ok(())
}

#[test]
fn zero_workers_is_a_configuration_error() -> Result<()> {
    let agent = toy_agent(false, vec![8])?;
    assert!(matches!(
        AsyncTrainer::spawn(&agent, 0, toy_envs()),
        Err(SpiralError::InvalidConfig(_))
    ));
    Ok(())
}
