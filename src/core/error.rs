//! Error types for parbrick

use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("load balance must sum up to 1 (got {sum}, {count} weights)")]
    InvalidLoadBalance { sum: f32, count: usize },

    #[error("no leaves requested")]
    NoLeaves,

    #[error("unknown renderer type: {0}")]
    UnknownRenderer(String),

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("worker startup failed: {0}")]
    WorkerStartup(String),

    #[error("barrier wait timed out after {0} ms")]
    BarrierTimeout(u64),

    #[error("barrier broken: all other participants left")]
    BarrierBroken,

    #[error("barrier cycle {0} was already passed")]
    BarrierStale(u64),

    #[error("worker {0} is gone")]
    WorkerGone(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("remote error: {0}")]
    Remote(#[from] parbrick_remote::RemoteError),
}
