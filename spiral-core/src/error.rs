use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SpiralError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("dataset failure: {0}")]
    Dataset(String),

    #[error("{0} optimizer is not bound to a parameter set, call setup first")]
    OptimizerNotBound(String),

    #[error("{0} optimizer is bound to a different parameter set")]
    OptimizerBindingMismatch(String),

    #[error("gradient proposal for {network} does not match its parameters: {detail}")]
    GradientMismatch { network: String, detail: String },

    #[error("snapshot of {network} does not match the network: {detail}")]
    SnapshotMismatch { network: String, detail: String },

    #[error("snapshot already exists at {0}")]
    SnapshotExists(PathBuf),

    #[error("malformed snapshot at {path}: {detail}")]
    MalformedSnapshot { path: PathBuf, detail: String },

    #[error("worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl SpiralError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpiralError>;
