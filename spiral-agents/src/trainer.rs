//! Hogwild-style training: every worker thread owns an environment and local copies of both
//! networks, pulls the shared parameters before each step and hands its gradient proposals to
//! the shared optimizers' update queues.

use crate::{
    networks::{
        discriminator::{Discriminator, DiscriminatorArch},
        generator::{Generator, GeneratorArch},
    },
    optim::{
        AsyncOptimizer,
        queue::{GradientSender, UpdateQueue},
    },
    spiral::{Spiral, TrainStats, config::SpiralConfig, learning::StepLearner},
};
use candle_core::Device;
use crossbeam::channel::{Receiver, Sender, unbounded};
use spiral_core::{Result, SpiralError, dataset::Dataset, env::Env, rng, strategies::Strategies};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};
use tracing::{debug, info, warn};

/// Builds the environment of worker `idx`. Runs on the worker thread.
pub type EnvFactory<E> = Arc<dyn Fn(usize) -> Result<E> + Send + Sync>;

enum WorkerTask {
    Train { steps: usize },
    Shutdown,
}

pub struct WorkerReport {
    pub worker: usize,
    pub result: Result<Vec<TrainStats>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".into())
}

struct WorkerContext {
    worker: usize,
    generator_arch: GeneratorArch,
    discriminator_arch: DiscriminatorArch,
    device: Device,
    gen_optimizer: Arc<AsyncOptimizer>,
    dis_optimizer: Arc<AsyncOptimizer>,
    gen_queue: GradientSender,
    dis_queue: GradientSender,
    dataset: Arc<dyn Dataset>,
    strategies: Strategies,
    config: SpiralConfig,
    completed: Arc<AtomicUsize>,
}

struct WorkerState<E> {
    env: E,
    generator: Generator,
    discriminator: Discriminator,
}

impl WorkerContext {
    fn build_state<E: Env>(&self, make_env: &EnvFactory<E>) -> Result<WorkerState<E>> {
        Ok(WorkerState {
            env: make_env(self.worker)?,
            generator: Generator::new(self.generator_arch.clone(), &self.device)?,
            discriminator: Discriminator::new(self.discriminator_arch.clone(), &self.device)?,
        })
    }

    fn train<E: Env>(&self, state: &mut WorkerState<E>, steps: usize) -> Result<Vec<TrainStats>> {
        let mut stats = Vec::with_capacity(steps);
        for _ in 0..steps {
            self.gen_optimizer.pull_into(&state.generator)?;
            self.dis_optimizer.pull_into(&state.discriminator)?;
            let learner = StepLearner {
                generator: &state.generator,
                discriminator: &state.discriminator,
                dataset: self.dataset.as_ref(),
                strategies: &self.strategies,
                config: &self.config,
            };
            let output = learner.run(&mut state.env)?;
            let step = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
            stats.push(TrainStats::from_output(step, &output));
            if let Some(proposal) = output.generator {
                self.gen_queue.propose(proposal.grads)?;
            }
            if let Some(proposal) = output.discriminator {
                self.dis_queue.propose(proposal.grads)?;
            }
        }
        Ok(stats)
    }

    fn run<E: Env>(
        self,
        make_env: EnvFactory<E>,
        task_rx: Receiver<WorkerTask>,
        report_tx: Sender<WorkerReport>,
    ) {
        let worker = self.worker;
        rng::seed(worker as u64);
        let mut state = self.build_state(&make_env);
        if let Err(err) = &state {
            warn!(worker, %err, "worker could not start");
        }
        while let Ok(task) = task_rx.recv() {
            match task {
                WorkerTask::Train { steps } => {
                    let (result, panicked) = match &mut state {
                        Ok(state) => {
                            match panic::catch_unwind(AssertUnwindSafe(|| self.train(state, steps))) {
                                Ok(result) => (result, false),
                                Err(payload) => {
                                    let message = panic_message(payload.as_ref());
                                    warn!(worker, %message, "worker panicked");
                                    (Err(SpiralError::Worker { worker, message }), true)
                                }
                            }
                        }
                        Err(err) => (
                            Err(SpiralError::Worker {
                                worker,
                                message: err.to_string(),
                            }),
                            false,
                        ),
                    };
                    if panicked {
                        state = Err(SpiralError::Worker {
                            worker,
                            message: "environment or networks lost in an earlier panic".into(),
                        });
                    }
                    if report_tx.send(WorkerReport { worker, result }).is_err() {
                        break;
                    }
                }
                WorkerTask::Shutdown => break,
            }
        }
        if let Ok(state) = &mut state {
            if let Err(err) = state.env.close() {
                warn!(worker, %err, "failed to close environment");
            }
        }
        debug!(worker, "worker stopped");
    }
}

pub struct AsyncTrainer {
    worker_txs: Vec<Sender<WorkerTask>>,
    report_rx: Receiver<WorkerReport>,
    handles: Vec<JoinHandle<()>>,
    gen_queue: UpdateQueue,
    dis_queue: UpdateQueue,
    completed: Arc<AtomicUsize>,
}

impl AsyncTrainer {
    /// Starts `workers` threads training the shared networks of `agent`.
    pub fn spawn<E: Env + 'static>(
        agent: &Spiral,
        workers: usize,
        make_env: EnvFactory<E>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(SpiralError::InvalidConfig("at least one worker is needed".into()));
        }
        let gen_queue = UpdateQueue::spawn("generator", agent.gen_optimizer().clone())?;
        let dis_queue = UpdateQueue::spawn("discriminator", agent.dis_optimizer().clone())?;
        let completed = Arc::new(AtomicUsize::new(0));
        let (report_tx, report_rx) = unbounded();
        let mut worker_txs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (task_tx, task_rx) = unbounded();
            let context = WorkerContext {
                worker,
                generator_arch: agent.generator().arch().clone(),
                discriminator_arch: agent.discriminator().arch().clone(),
                device: agent.generator().device().clone(),
                gen_optimizer: agent.gen_optimizer().clone(),
                dis_optimizer: agent.dis_optimizer().clone(),
                gen_queue: gen_queue.sender(),
                dis_queue: dis_queue.sender(),
                dataset: agent.dataset().clone(),
                strategies: agent.strategies().clone(),
                config: agent.config().clone(),
                completed: completed.clone(),
            };
            let make_env = make_env.clone();
            let report_tx = report_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("spiral-worker-{worker}"))
                .spawn(move || context.run(make_env, task_rx, report_tx))
                .map_err(|err| SpiralError::Worker {
                    worker,
                    message: err.to_string(),
                })?;
            worker_txs.push(task_tx);
            handles.push(handle);
        }
        info!(workers, "async trainer started");
        Ok(Self {
            worker_txs,
            report_rx,
            handles,
            gen_queue,
            dis_queue,
            completed,
        })
    }

    pub fn workers(&self) -> usize {
        self.worker_txs.len()
    }

    /// Training steps completed by all workers so far.
    pub fn completed_steps(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Proposals the applier threads had to drop.
    pub fn failed_updates(&self) -> usize {
        self.gen_queue.failed() + self.dis_queue.failed()
    }

    /// Has every worker run `steps_per_worker` steps and waits until their proposals are
    /// applied. Returns the stats of all workers ordered by completion.
    pub fn train(&self, steps_per_worker: usize) -> Result<Vec<TrainStats>> {
        for tx in &self.worker_txs {
            tx.send(WorkerTask::Train {
                steps: steps_per_worker,
            })
            .map_err(|_| SpiralError::ChannelClosed("worker task"))?;
        }
        let mut stats = vec![];
        let mut first_error = None;
        for _ in 0..self.worker_txs.len() {
            let report = self
                .report_rx
                .recv()
                .map_err(|_| SpiralError::ChannelClosed("worker report"))?;
            match report.result {
                Ok(worker_stats) => stats.extend(worker_stats),
                Err(err) => {
                    warn!(worker = report.worker, %err, "worker failed");
                    first_error.get_or_insert(SpiralError::Worker {
                        worker: report.worker,
                        message: err.to_string(),
                    });
                }
            }
        }
        self.gen_queue.flush()?;
        self.dis_queue.flush()?;
        match first_error {
            Some(err) => Err(err),
            None => {
                stats.sort_by_key(|s| s.step);
                Ok(stats)
            }
        }
    }
}

impl Drop for AsyncTrainer {
    fn drop(&mut self) {
        for tx in &self.worker_txs {
            let _ = tx.send(WorkerTask::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}
