//! Worker threads, frame barrier and the parallel brick renderer

pub mod barrier;
pub mod coordinator;
pub mod event;
pub mod pool;
pub mod worker;

pub use barrier::{BarrierLease, FrameBarrier, Phase, STARTUP_KEY, frame_key};
pub use coordinator::ParallelBrickRenderer;
pub use event::{StartupReport, WorkerEvent, WorkerState};
pub use pool::{PoolTimeouts, WorkerPool};
pub use worker::{LocalWorker, WorkerHandle, WorkerShared, WorkerSpec, WorkerStats};
