//! Worker startup, event broadcast and frame synchronization

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::camera::CameraState;
use crate::core::{Error, Result};
use crate::parallel::barrier::{FrameBarrier, Phase, STARTUP_KEY, frame_key};
use crate::parallel::event::{StartupReport, WorkerEvent, WorkerState};
use crate::parallel::worker::{LocalWorker, WorkerHandle, WorkerShared, WorkerSpec};
use crate::render::factory::RendererFactory;
use crate::render::frame::Tile;

/// Polling interval while waiting for startup reports
const STARTUP_POLL: Duration = Duration::from_millis(25);

/// Timeouts applied by the pool
#[derive(Clone, Copy, Debug)]
pub struct PoolTimeouts {
    pub startup: Duration,
    pub frame: Duration,
}

impl Default for PoolTimeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(5),
            frame: Duration::from_secs(5),
        }
    }
}

/// All workers of one parallel renderer, indexed by leaf id
pub struct WorkerPool {
    shared: Vec<Arc<WorkerShared>>,
    threads: Vec<WorkerHandle>,
    local: Option<LocalWorker>,
    barrier: Arc<FrameBarrier>,
    timeouts: PoolTimeouts,
    failed: Vec<usize>,
}

impl WorkerPool {
    /// Create every worker and wait for the startup rendezvous.
    ///
    /// The worker at `local` (if any) renders synchronously on this thread.
    /// Workers whose renderer cannot be created are left out of rendering;
    /// startup fails if none succeed, if a thread dies without reporting,
    /// or if the handshake exceeds the startup timeout.
    pub fn start(
        specs: Vec<WorkerSpec>,
        local: Option<usize>,
        factory: Arc<RendererFactory>,
        timeouts: PoolTimeouts,
    ) -> Result<Self> {
        let count = specs.len();
        if count == 0 {
            return Err(Error::NoLeaves);
        }
        let shared: Vec<Arc<WorkerShared>> = (0..count).map(|_| Arc::new(WorkerShared::default())).collect();
        let mut failed = Vec::new();

        let local_index = local.filter(|&i| i < count);
        let thread_count = count - usize::from(local_index.is_some());
        // the controller takes part in every cycle, either through the local
        // worker or on its own
        let barrier = Arc::new(FrameBarrier::new(thread_count + 1));

        let mut local_worker = None;
        let (report_tx, report_rx) = mpsc::channel();
        let mut threads = Vec::with_capacity(thread_count);
        for spec in specs {
            let id = spec.id;
            if Some(id) == local_index {
                match LocalWorker::new(&spec, &factory, shared[id].clone()) {
                    Ok(worker) => local_worker = Some(worker),
                    Err(e) => {
                        log::error!("Main-context worker {} could not create its renderer: {}", id, e);
                        shared[id].state.store(WorkerState::Exited);
                        failed.push(id);
                    }
                }
                continue;
            }
            let handle = WorkerHandle::spawn(
                spec,
                factory.clone(),
                barrier.clone(),
                shared[id].clone(),
                report_tx.clone(),
                timeouts.startup,
                timeouts.frame,
            );
            match handle {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    abort_startup(&barrier, &mut threads);
                    return Err(e);
                }
            }
        }
        drop(report_tx);

        let mut pool = Self {
            shared,
            threads,
            local: local_worker,
            barrier,
            timeouts,
            failed,
        };
        if let Err(e) = pool.collect_reports(&report_rx) {
            abort_startup(&pool.barrier, &mut pool.threads);
            return Err(e);
        }
        if pool.failed.len() == count {
            abort_startup(&pool.barrier, &mut pool.threads);
            return Err(Error::WorkerStartup("no worker could create a renderer".into()));
        }

        if let Err(e) = pool.barrier.wait_for(STARTUP_KEY, Some(timeouts.startup)) {
            abort_startup(&pool.barrier, &mut pool.threads);
            return Err(Error::WorkerStartup(format!("startup rendezvous failed: {e}")));
        }
        log::info!(
            "Started {} workers ({} threads, {} on main context, {} failed)",
            count,
            pool.threads.len(),
            usize::from(pool.local.is_some()),
            pool.failed.len()
        );
        Ok(pool)
    }

    /// Wait until every spawned thread reported
    fn collect_reports(&mut self, reports: &mpsc::Receiver<StartupReport>) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.startup;
        let mut reported = vec![false; self.shared.len()];
        let mut pending = self.threads.len();

        while pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::WorkerStartup(format!(
                    "{} workers did not report within {:?}",
                    pending, self.timeouts.startup
                )));
            }
            match reports.recv_timeout(STARTUP_POLL.min(deadline - now)) {
                Ok(report) => {
                    let id = report.worker();
                    if let Some(seen) = reported.get_mut(id) {
                        if !*seen {
                            *seen = true;
                            pending -= 1;
                        }
                    }
                    if let StartupReport::Failed(id, message) = report {
                        log::warn!("Worker {} failed to start: {}", id, message);
                        self.failed.push(id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(gone) = self
                        .threads
                        .iter()
                        .find(|t| t.is_finished() && !reported[t.id()])
                    {
                        return Err(Error::WorkerStartup(format!(
                            "worker {} exited without reporting",
                            gone.id()
                        )));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::WorkerStartup(format!(
                        "{} workers exited without reporting",
                        pending
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    pub fn barrier(&self) -> &FrameBarrier {
        &self.barrier
    }

    /// Worker ids whose renderer could not be created
    pub fn failed(&self) -> &[usize] {
        &self.failed
    }

    pub fn local_worker(&self) -> Option<usize> {
        self.local.as_ref().map(LocalWorker::id)
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.shared.iter().map(|s| s.state()).collect()
    }

    pub fn shared(&self, id: usize) -> Option<&Arc<WorkerShared>> {
        self.shared.get(id)
    }

    /// Lock every tile, in leaf id order
    pub fn lock_tiles(&self) -> Vec<MutexGuard<'_, Tile>> {
        self.shared.iter().map(|s| s.lock_tile()).collect()
    }

    /// Queue an event for every worker thread and apply non-render events
    /// to the main-context worker right away.
    pub fn broadcast(&mut self, event: &WorkerEvent) {
        for thread in &self.threads {
            if self.failed.contains(&thread.id()) {
                continue;
            }
            if let Err(e) = thread.send(event.clone()) {
                log::warn!("Cannot queue {} for worker {}: {}", event.name(), thread.id(), e);
            }
        }
        if let Some(local) = self.local.as_mut() {
            match event {
                WorkerEvent::Render { .. } | WorkerEvent::Exit => {}
                other => local.apply(other.clone(), &self.barrier, self.timeouts.frame),
            }
        }
    }

    /// Run both barrier phases of a frame whose `Render` event was already
    /// broadcast. The main-context worker renders in between. `Ok` means
    /// every live worker's tile holds `frame`.
    pub fn complete_frame(&mut self, camera: &CameraState, frame: u64) -> Result<()> {
        match self.local.as_mut() {
            Some(local) => local.render(camera, frame, &self.barrier, self.timeouts.frame),
            None => {
                self.barrier.wait_for(frame_key(frame, Phase::Start), Some(self.timeouts.frame))?;
                self.barrier.wait_for(frame_key(frame, Phase::Finish), Some(self.timeouts.frame))?;
                Ok(())
            }
        }
    }

    /// Send `Exit` to every worker and join the threads
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() && self.local.is_none() {
            return;
        }
        for thread in &self.threads {
            // workers that already exited dropped their receiver
            let _ = thread.send(WorkerEvent::Exit);
        }
        for thread in &mut self.threads {
            thread.join();
        }
        self.threads.clear();
        self.local = None;
        log::info!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn abort_startup(barrier: &FrameBarrier, threads: &mut Vec<WorkerHandle>) {
    barrier.break_barrier();
    for thread in threads.iter() {
        let _ = thread.send(WorkerEvent::Exit);
    }
    for thread in threads.iter_mut() {
        thread.join();
    }
    threads.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Mat4, UVec3, Vec3};
    use crate::math::{Aabb, Rect};
    use crate::render::factory::{RendererContext, RendererOptions, RendererRegistry};
    use crate::render::frame::Rgba;
    use crate::render::params::{ParamValue, ParameterId, TransferFunction};
    use crate::render::renderer::BrickRenderer;
    use crate::volume::VolumeDesc;

    /// Fills its tile with the camera's x translation
    struct EchoRenderer {
        delay_first: Option<Duration>,
    }

    impl BrickRenderer for EchoRenderer {
        fn name(&self) -> &str {
            "echo"
        }

        fn render_volume(&mut self, camera: &CameraState, tile: &mut Tile) -> Result<()> {
            if let Some(delay) = self.delay_first.take() {
                std::thread::sleep(delay);
            }
            tile.pixels.fill(Rgba::new(camera.modelview.w_axis.x, 0.0, 0.0, 1.0));
            Ok(())
        }

        fn set_parameter(&mut self, _id: ParameterId, _value: &ParamValue) -> Result<()> {
            Ok(())
        }

        fn update_transfer_function(&mut self, _tf: &TransferFunction) -> Result<()> {
            Ok(())
        }

        fn resize(&mut self, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }
    }

    fn echo(_: &RendererFactory, _: &RendererContext, opts: &RendererOptions) -> Result<Box<dyn BrickRenderer>> {
        if opts.get("fail").is_some() {
            return Err(Error::Renderer("refusing to start".into()));
        }
        if opts.get("panic").is_some() {
            panic!("renderer blew up during setup");
        }
        let delay_first = opts.get_usize("slow_first_ms").map(|ms| Duration::from_millis(ms as u64));
        Ok(Box::new(EchoRenderer { delay_first }))
    }

    fn factory() -> Arc<RendererFactory> {
        let mut registry = RendererRegistry::new();
        registry.register("echo", echo);
        Arc::new(RendererFactory::new(registry).with_env_default(Some("echo".into())))
    }

    fn specs(count: usize, options: impl Fn(usize) -> RendererOptions) -> Vec<WorkerSpec> {
        let volume = Arc::new(VolumeDesc::new(UVec3::splat(8)));
        (0..count)
            .map(|id| WorkerSpec {
                id,
                renderer_type: "echo".into(),
                options: options(id),
                context: RendererContext::new(volume.clone(), Vec::new()),
                leaf_bounds: Aabb::new(Vec3::splat(-100.0), Vec3::splat(100.0)),
            })
            .collect()
    }

    fn camera(x: f32) -> CameraState {
        CameraState {
            modelview: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
            projection: Mat4::IDENTITY,
            viewport: Rect::new(0, 0, 4, 4),
        }
    }

    fn timeouts() -> PoolTimeouts {
        PoolTimeouts {
            startup: Duration::from_secs(5),
            frame: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_renders_in_order_with_one_cycle_pair_per_frame() {
        let mut pool = WorkerPool::start(specs(4, |_| RendererOptions::new()), None, factory(), timeouts()).unwrap();
        assert_eq!(pool.barrier().parties(), 5);
        assert_eq!(pool.barrier().generation(), 1);

        // queue everything first; workers must still take frames one by one
        for frame in 1..=10 {
            pool.broadcast(&WorkerEvent::Render { camera: camera(frame as f32), frame });
        }
        for frame in 1..=10u64 {
            pool.complete_frame(&camera(frame as f32), frame).unwrap();
            for tile in pool.lock_tiles() {
                assert_eq!(tile.frame, frame);
                assert_eq!(tile.get(0, 0).r, frame as f32);
            }
        }
        assert_eq!(pool.barrier().generation(), 1 + 20);
        for id in 0..4 {
            assert_eq!(pool.shared(id).unwrap().stats.frames(), 10);
        }

        pool.shutdown();
        assert!(pool.states().iter().all(|s| *s == WorkerState::Exited));
    }

    #[test]
    fn test_main_context_worker() {
        let mut pool = WorkerPool::start(specs(3, |_| RendererOptions::new()), Some(1), factory(), timeouts()).unwrap();
        assert_eq!(pool.local_worker(), Some(1));
        assert_eq!(pool.barrier().parties(), 3);

        pool.broadcast(&WorkerEvent::Resize { width: 4, height: 4 });
        pool.broadcast(&WorkerEvent::Render { camera: camera(7.0), frame: 1 });
        pool.complete_frame(&camera(7.0), 1).unwrap();
        for tile in pool.lock_tiles() {
            assert_eq!(tile.frame, 1);
            assert_eq!(tile.get(3, 3).r, 7.0);
        }
        assert_eq!(pool.states()[1], WorkerState::Idle);
    }

    #[test]
    fn test_partial_failure_degrades() {
        let options = |id| {
            if id == 2 { RendererOptions::new().with("fail", "1") } else { RendererOptions::new() }
        };
        let mut pool = WorkerPool::start(specs(3, options), None, factory(), timeouts()).unwrap();
        assert_eq!(pool.failed(), &[2]);
        assert_eq!(pool.barrier().parties(), 3);
        assert_eq!(pool.states()[2], WorkerState::Exited);

        pool.broadcast(&WorkerEvent::Render { camera: camera(2.0), frame: 1 });
        pool.complete_frame(&camera(2.0), 1).unwrap();
        let tiles = pool.lock_tiles();
        assert_eq!(tiles[0].frame, 1);
        assert!(tiles[2].is_empty());
        assert_eq!(tiles[2].frame, 0);
    }

    #[test]
    fn test_all_failed_is_fatal() {
        let result = WorkerPool::start(
            specs(2, |_| RendererOptions::new().with("fail", "1")),
            None,
            factory(),
            timeouts(),
        );
        assert!(matches!(result, Err(Error::WorkerStartup(_))));
    }

    #[test]
    fn test_vanished_worker_is_detected() {
        let options = |id| {
            if id == 0 { RendererOptions::new().with("panic", "1") } else { RendererOptions::new() }
        };
        let started = Instant::now();
        let result = WorkerPool::start(specs(2, options), None, factory(), timeouts());
        assert!(matches!(result, Err(Error::WorkerStartup(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_frame_timeout() {
        let mut pool = WorkerPool::start(specs(2, |_| RendererOptions::new()), None, factory(), PoolTimeouts {
            startup: Duration::from_secs(5),
            frame: Duration::from_millis(50),
        })
        .unwrap();
        // no Render broadcast: workers never reach the barrier
        let result = pool.complete_frame(&camera(1.0), 1);
        assert!(matches!(result, Err(Error::BarrierTimeout(50))));
    }

    #[test]
    fn test_recovers_after_one_slow_frame() {
        let options = |id| {
            if id == 0 { RendererOptions::new().with("slow_first_ms", "400") } else { RendererOptions::new() }
        };
        let mut pool = WorkerPool::start(specs(2, options), None, factory(), PoolTimeouts {
            startup: Duration::from_secs(5),
            frame: Duration::from_millis(150),
        })
        .unwrap();

        let mut completed = Vec::new();
        for frame in 1..=10u64 {
            pool.broadcast(&WorkerEvent::Render { camera: camera(frame as f32), frame });
            let ok = pool.complete_frame(&camera(frame as f32), frame).is_ok();
            if ok {
                for tile in pool.lock_tiles() {
                    assert_eq!(tile.frame, frame, "frame {frame} completed over a stale tile");
                    assert_eq!(tile.get(0, 0).r, frame as f32);
                }
            }
            completed.push(ok);
        }
        assert!(!completed[0], "the slow frame should time out");
        assert!(completed[7..].iter().all(|ok| *ok), "workers never caught up: {completed:?}");
        assert_eq!(pool.shared(0).unwrap().stats.render_failures(), 0);
    }
}
