//! One render worker per BSP leaf

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::camera::CameraState;
use crate::core::{Error, Result};
use crate::math::Aabb;
use crate::parallel::barrier::{BarrierLease, FrameBarrier, Phase, STARTUP_KEY, frame_key};
use crate::parallel::event::{AtomicWorkerState, StartupReport, WorkerEvent, WorkerState};
use crate::render::factory::{RendererContext, RendererFactory, RendererOptions};
use crate::render::frame::Tile;
use crate::render::renderer::BrickRenderer;

/// What a worker needs to create its renderer
#[derive(Clone, Debug)]
pub struct WorkerSpec {
    /// Leaf id; also the worker's index
    pub id: usize,
    pub renderer_type: String,
    pub options: RendererOptions,
    pub context: RendererContext,
    /// Object-space bounds of the leaf, used for the tile rectangle
    pub leaf_bounds: Aabb,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub frames: AtomicU64,
    pub render_failures: AtomicU64,
    pub events: AtomicU64,
}

impl WorkerStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn render_failures(&self) -> u64 {
        self.render_failures.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

/// State shared between a worker and the coordinator
#[derive(Debug, Default)]
pub struct WorkerShared {
    tile: Mutex<Tile>,
    pub state: AtomicWorkerState,
    pub stats: WorkerStats,
}

impl WorkerShared {
    pub fn lock_tile(&self) -> MutexGuard<'_, Tile> {
        self.tile.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkerState {
        self.state.load()
    }
}

/// Renderer plus the per-frame protocol, independent of the thread driving it
struct WorkerCore {
    id: usize,
    renderer: Box<dyn BrickRenderer>,
    leaf_bounds: Aabb,
    shared: Arc<WorkerShared>,
}

impl WorkerCore {
    fn create(spec: &WorkerSpec, factory: &RendererFactory, shared: Arc<WorkerShared>) -> Result<Self> {
        let renderer = factory.create(&spec.renderer_type, &spec.context, &spec.options)?;
        Ok(Self {
            id: spec.id,
            renderer,
            leaf_bounds: spec.leaf_bounds,
            shared,
        })
    }

    /// Apply one event. Returns false on `Exit`.
    fn handle(&mut self, event: WorkerEvent, barrier: &FrameBarrier, timeout: Duration) -> bool {
        self.shared.stats.events.fetch_add(1, Ordering::Relaxed);
        let result = match event {
            WorkerEvent::Render { camera, frame } => self.render(&camera, frame, barrier, timeout),
            WorkerEvent::Resize { width, height } => self.renderer.resize(width, height),
            WorkerEvent::NewParameter(id, value) => self.renderer.set_parameter(id, &value),
            WorkerEvent::UpdateTransferFunction(tf) => self.renderer.update_transfer_function(&tf),
            WorkerEvent::Exit => return false,
        };
        if let Err(e) = result {
            log::warn!("Worker {}: {}", self.id, e);
        }
        true
    }

    /// Start-phase wait, render into the tile, finish-phase wait
    fn render(&mut self, camera: &CameraState, frame: u64, barrier: &FrameBarrier, timeout: Duration) -> Result<()> {
        barrier.wait_for(frame_key(frame, Phase::Start), Some(timeout))?;
        self.shared.state.store(WorkerState::Rendering);

        let rect = camera.bounding_rect(&self.leaf_bounds).intersect(&camera.viewport);
        {
            let mut tile = self.shared.lock_tile();
            tile.reset(rect);
            if !rect.is_empty() {
                if let Err(e) = self.renderer.render_volume(camera, &mut tile) {
                    log::warn!("Worker {} failed to render frame {}: {}", self.id, frame, e);
                    self.shared.stats.render_failures.fetch_add(1, Ordering::Relaxed);
                    tile.clear();
                }
            }
            tile.frame = frame;
        }
        self.shared.stats.frames.fetch_add(1, Ordering::Relaxed);
        log::trace!("Worker {} rendered frame {} into {:?}", self.id, frame, rect);

        self.shared.state.store(WorkerState::Idle);
        barrier.wait_for(frame_key(frame, Phase::Finish), Some(timeout))?;
        Ok(())
    }
}

/// Worker driven synchronously on the coordinator thread
pub struct LocalWorker {
    core: WorkerCore,
}

impl LocalWorker {
    pub fn new(spec: &WorkerSpec, factory: &RendererFactory, shared: Arc<WorkerShared>) -> Result<Self> {
        let core = WorkerCore::create(spec, factory, shared)?;
        core.shared.state.store(WorkerState::Idle);
        log::info!("Worker {} renders on the main context", spec.id);
        Ok(Self { core })
    }

    pub fn id(&self) -> usize {
        self.core.id
    }

    /// Take part in both barrier phases and render in between
    pub fn render(&mut self, camera: &CameraState, frame: u64, barrier: &FrameBarrier, timeout: Duration) -> Result<()> {
        self.core.shared.stats.events.fetch_add(1, Ordering::Relaxed);
        self.core.render(camera, frame, barrier, timeout)
    }

    /// Apply a non-render event directly
    pub fn apply(&mut self, event: WorkerEvent, barrier: &FrameBarrier, timeout: Duration) {
        if !self.core.handle(event, barrier, timeout) {
            self.core.shared.state.store(WorkerState::Exited);
        }
    }
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        self.core.shared.state.store(WorkerState::Exited);
    }
}

/// Coordinator-side handle of a worker thread
pub struct WorkerHandle {
    id: usize,
    tx: Sender<WorkerEvent>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the worker thread. It creates its renderer, reports through
    /// `reports`, then waits on the barrier for the startup rendezvous.
    pub fn spawn(
        spec: WorkerSpec,
        factory: Arc<RendererFactory>,
        barrier: Arc<FrameBarrier>,
        shared: Arc<WorkerShared>,
        reports: Sender<StartupReport>,
        startup_timeout: Duration,
        frame_timeout: Duration,
    ) -> Result<Self> {
        let id = spec.id;
        let (tx, rx) = std::sync::mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(format!("parbrick-worker-{id}"))
            .spawn(move || {
                run_worker(spec, factory, barrier, shared, reports, rx, startup_timeout, frame_timeout);
            })
            .map_err(|e| Error::WorkerStartup(format!("cannot spawn worker {id}: {e}")))?;
        Ok(Self {
            id,
            tx,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn send(&self, event: WorkerEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::WorkerGone(self.id))
    }

    /// True once the thread has returned
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the thread to end. Call after sending `Exit`.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Worker {} panicked", self.id);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    spec: WorkerSpec,
    factory: Arc<RendererFactory>,
    barrier: Arc<FrameBarrier>,
    shared: Arc<WorkerShared>,
    reports: Sender<StartupReport>,
    rx: Receiver<WorkerEvent>,
    startup_timeout: Duration,
    frame_timeout: Duration,
) {
    let id = spec.id;
    let mut core = match WorkerCore::create(&spec, &factory, shared.clone()) {
        Ok(core) => core,
        Err(e) => {
            log::error!("Worker {} could not create '{}' renderer: {}", id, spec.renderer_type, e);
            shared.lock_tile().clear();
            shared.state.store(WorkerState::Exited);
            barrier.leave();
            let _ = reports.send(StartupReport::Failed(id, e.to_string()));
            return;
        }
    };
    drop(spec);

    let lease = BarrierLease::new(barrier);
    shared.state.store(WorkerState::Idle);
    let _ = reports.send(StartupReport::Ready(id));
    drop(reports);

    if let Err(e) = lease.barrier().wait_for(STARTUP_KEY, Some(startup_timeout)) {
        log::error!("Worker {} missed the startup rendezvous: {}", id, e);
        shared.state.store(WorkerState::Exited);
        return;
    }
    log::debug!("Worker {} running", id);

    while let Ok(event) = rx.recv() {
        log::trace!("Worker {} <- {}", id, event.name());
        if !core.handle(event, lease.barrier(), frame_timeout) {
            break;
        }
    }

    drop(core);
    shared.state.store(WorkerState::Exited);
    log::debug!("Worker {} exited", id);
}
