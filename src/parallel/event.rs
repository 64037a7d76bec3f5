//! Messages between the coordinator and its workers

use std::sync::atomic::{AtomicU8, Ordering};

use crate::core::camera::CameraState;
use crate::render::params::{ParamValue, ParameterId, TransferFunction};

/// Work item in a worker's FIFO queue
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// Render frame `frame` for `camera` between two barrier phases
    Render { camera: CameraState, frame: u64 },
    Resize { width: u32, height: u32 },
    NewParameter(ParameterId, ParamValue),
    UpdateTransferFunction(TransferFunction),
    /// Release the renderer and end the thread
    Exit,
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Render { .. } => "Render",
            WorkerEvent::Resize { .. } => "Resize",
            WorkerEvent::NewParameter(..) => "NewParameter",
            WorkerEvent::UpdateTransferFunction(_) => "UpdateTransferFunction",
            WorkerEvent::Exit => "Exit",
        }
    }
}

/// Lifecycle of a worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Idle = 1,
    Rendering = 2,
    Exited = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Starting,
            1 => WorkerState::Idle,
            2 => WorkerState::Rendering,
            _ => WorkerState::Exited,
        }
    }
}

/// Worker state readable from the coordinator thread
#[derive(Debug)]
pub struct AtomicWorkerState(AtomicU8);

impl Default for AtomicWorkerState {
    fn default() -> Self {
        Self(AtomicU8::new(WorkerState::Starting as u8))
    }
}

impl AtomicWorkerState {
    pub fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Sent once by every worker thread after renderer setup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartupReport {
    Ready(usize),
    Failed(usize, String),
}

impl StartupReport {
    pub fn worker(&self) -> usize {
        match self {
            StartupReport::Ready(id) | StartupReport::Failed(id, _) => *id,
        }
    }
}
