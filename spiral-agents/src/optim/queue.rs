use super::{AsyncOptimizer, grads::NamedGrads};
use crossbeam::channel::{Sender, bounded, unbounded};
use spiral_core::{Result, SpiralError};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};
use tracing::{debug, warn};

enum QueueCommand {
    Apply(NamedGrads),
    Flush(Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct QueueStats {
    applied: AtomicUsize,
    failed: AtomicUsize,
}

/// Handle workers use to hand gradient proposals to an [`UpdateQueue`].
#[derive(Clone)]
pub struct GradientSender(Sender<QueueCommand>);

impl GradientSender {
    pub fn propose(&self, grads: NamedGrads) -> Result<()> {
        self.0
            .send(QueueCommand::Apply(grads))
            .map_err(|_| SpiralError::ChannelClosed("gradient queue"))
    }
}

/// Serves one shared optimizer from a dedicated applier thread. Proposals are applied in the
/// order they arrive; a proposal that fails is logged and dropped.
pub struct UpdateQueue {
    tx: Sender<QueueCommand>,
    stats: Arc<QueueStats>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateQueue {
    pub fn spawn(name: &str, optimizer: Arc<AsyncOptimizer>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let stats = Arc::new(QueueStats::default());
        let thread_stats = stats.clone();
        let thread_name = format!("{name}-applier");
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        QueueCommand::Apply(grads) => match optimizer.apply(&grads) {
                            Ok(()) => {
                                thread_stats.applied.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                thread_stats.failed.fetch_add(1, Ordering::Relaxed);
                                warn!(queue = %thread_name, %err, "dropping gradient proposal");
                            }
                        },
                        QueueCommand::Flush(done) => {
                            let _ = done.send(());
                        }
                        QueueCommand::Shutdown => break,
                    }
                }
                debug!(queue = %thread_name, "applier stopped");
            })
            .map_err(|err| SpiralError::io(name, err))?;
        Ok(Self {
            tx,
            stats,
            handle: Some(handle),
        })
    }

    pub fn sender(&self) -> GradientSender {
        GradientSender(self.tx.clone())
    }

    /// Blocks until every proposal sent before this call has been applied or dropped.
    pub fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = bounded(1);
        self.tx
            .send(QueueCommand::Flush(done_tx))
            .map_err(|_| SpiralError::ChannelClosed("gradient queue"))?;
        done_rx
            .recv()
            .map_err(|_| SpiralError::ChannelClosed("gradient queue"))
    }

    pub fn applied(&self) -> usize {
        self.stats.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.stats.failed.load(Ordering::Relaxed)
    }
}

impl Drop for UpdateQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(QueueCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("gradient applier panicked");
            }
        }
    }
}
