//! Reusable frame barrier with timeouts and participant departure

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::{Error, Result};

/// Key of the startup rendezvous
pub const STARTUP_KEY: u64 = 1;

/// Which of the two per-frame rendezvous a wait belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Before workers touch their tiles
    Start,
    /// After every tile holds the frame
    Finish,
}

/// Barrier key of one phase of `frame`. Keys grow with frame and phase.
pub fn frame_key(frame: u64, phase: Phase) -> u64 {
    (frame + 1) * 2
        + match phase {
            Phase::Start => 0,
            Phase::Finish => 1,
        }
}

#[derive(Debug)]
struct BarrierState {
    parties: usize,
    arrived: usize,
    /// Key of the cycle being assembled
    key: u64,
    /// Key of the last completed cycle
    completed: u64,
    generation: u64,
    broken: bool,
}

impl BarrierState {
    fn complete(&mut self) {
        self.arrived = 0;
        self.completed = self.key;
        self.generation += 1;
    }
}

/// Cyclic barrier shared by the controller and its workers.
///
/// Each wait names the cycle it belongs to. Arrivals only meet others with
/// the same key; an arrival with a higher key abandons the cycle being
/// assembled and one with a lower key fails at once with
/// [`Error::BarrierStale`]. Every completed cycle bumps the generation.
/// Participants that exit call [`FrameBarrier::leave`] so the others are
/// not left waiting for them.
#[derive(Debug)]
pub struct FrameBarrier {
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl FrameBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                parties,
                arrived: 0,
                key: 0,
                completed: 0,
                generation: 0,
                broken: false,
            }),
            cvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until all parties arrived for cycle `key`. Returns the
    /// generation that the completed cycle produced. `None` waits forever.
    pub fn wait_for(&self, key: u64, timeout: Option<Duration>) -> Result<u64> {
        let mut state = self.lock();
        if state.broken {
            return Err(Error::BarrierBroken);
        }
        if key <= state.completed || key < state.key {
            return Err(Error::BarrierStale(key));
        }
        if key > state.key {
            if state.arrived > 0 {
                log::debug!("Barrier cycle {} abandoned for {}", state.key, key);
            }
            state.key = key;
            state.arrived = 0;
            self.cvar.notify_all();
        }

        state.arrived += 1;
        if state.arrived >= state.parties {
            state.complete();
            self.cvar.notify_all();
            return Ok(state.generation);
        }

        // A later cycle cannot complete while this participant still waits,
        // so `completed >= key` means this cycle completed.
        let pending = |s: &mut BarrierState| s.completed < key && s.key == key && !s.broken;
        let timed_out = match timeout {
            Some(timeout) => {
                let (guard, result) = self
                    .cvar
                    .wait_timeout_while(state, timeout, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
                result.timed_out()
            }
            None => {
                state = self
                    .cvar
                    .wait_while(state, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                false
            }
        };

        if state.completed >= key {
            return Ok(state.generation);
        }
        if state.broken {
            return Err(Error::BarrierBroken);
        }
        if state.key != key {
            return Err(Error::BarrierStale(key));
        }
        state.arrived = state.arrived.saturating_sub(1);
        debug_assert!(timed_out);
        let ms = timeout.map_or(0, |t| t.as_millis() as u64);
        Err(Error::BarrierTimeout(ms))
    }

    /// Permanently remove one participant. Completes the current cycle if
    /// everyone else already arrived.
    pub fn leave(&self) {
        let mut state = self.lock();
        state.parties = state.parties.saturating_sub(1);
        if state.arrived > 0 && state.arrived >= state.parties {
            state.complete();
            self.cvar.notify_all();
        }
    }

    /// Wake every waiter with [`Error::BarrierBroken`]; later waits fail too.
    pub fn break_barrier(&self) {
        self.lock().broken = true;
        self.cvar.notify_all();
    }

    pub fn is_broken(&self) -> bool {
        self.lock().broken
    }

    /// Number of completed cycles
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn parties(&self) -> usize {
        self.lock().parties
    }
}

/// Leaves the barrier when dropped, also when a worker thread unwinds
pub struct BarrierLease {
    barrier: Arc<FrameBarrier>,
}

impl BarrierLease {
    pub fn new(barrier: Arc<FrameBarrier>) -> Self {
        Self { barrier }
    }

    pub fn barrier(&self) -> &FrameBarrier {
        &self.barrier
    }
}

impl Drop for BarrierLease {
    fn drop(&mut self) {
        self.barrier.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const LONG: Option<Duration> = Some(Duration::from_secs(5));

    #[test]
    fn test_cycles_bump_generation() {
        let barrier = Arc::new(FrameBarrier::new(3));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let b = barrier.clone();
                thread::spawn(move || {
                    for frame in 1..=5 {
                        b.wait_for(frame_key(frame, Phase::Start), LONG).unwrap();
                    }
                })
            })
            .collect();
        for frame in 1..=5 {
            assert_eq!(barrier.wait_for(frame_key(frame, Phase::Start), LONG).unwrap(), frame);
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(barrier.generation(), 5);
    }

    #[test]
    fn test_frame_keys_are_ordered() {
        assert!(frame_key(0, Phase::Start) > STARTUP_KEY);
        assert!(frame_key(3, Phase::Finish) > frame_key(3, Phase::Start));
        assert!(frame_key(4, Phase::Start) > frame_key(3, Phase::Finish));
    }

    #[test]
    fn test_timeout_instead_of_hang() {
        let barrier = FrameBarrier::new(2);
        let result = barrier.wait_for(STARTUP_KEY, Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(Error::BarrierTimeout(20))));
        // the timed-out arrival was withdrawn
        assert_eq!(barrier.generation(), 0);
        let b = Arc::new(barrier);
        let other = {
            let b = b.clone();
            thread::spawn(move || b.wait_for(STARTUP_KEY, LONG))
        };
        assert_eq!(b.wait_for(STARTUP_KEY, LONG).unwrap(), 1);
        assert_eq!(other.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_late_arrival_does_not_pair_with_next_cycle() {
        let barrier = Arc::new(FrameBarrier::new(2));
        let first = frame_key(1, Phase::Finish);
        let next = frame_key(2, Phase::Start);

        // the controller gives up on frame 1 and moves on to frame 2
        let short = Some(Duration::from_millis(20));
        assert!(matches!(barrier.wait_for(first, short), Err(Error::BarrierTimeout(20))));
        let controller = {
            let b = barrier.clone();
            thread::spawn(move || b.wait_for(next, LONG))
        };
        thread::sleep(Duration::from_millis(20));

        // the slow worker finally finishes frame 1: refused, not counted
        assert!(matches!(barrier.wait_for(first, LONG), Err(Error::BarrierStale(k)) if k == first));
        assert_eq!(barrier.generation(), 0);

        assert_eq!(barrier.wait_for(next, LONG).unwrap(), 1);
        assert_eq!(controller.join().unwrap().unwrap(), 1);
        assert!(matches!(barrier.wait_for(next, LONG), Err(Error::BarrierStale(_))));
    }

    #[test]
    fn test_higher_key_abandons_waiters() {
        let barrier = Arc::new(FrameBarrier::new(3));
        let stale = {
            let b = barrier.clone();
            thread::spawn(move || b.wait_for(frame_key(1, Phase::Start), LONG))
        };
        thread::sleep(Duration::from_millis(20));
        let newer = {
            let b = barrier.clone();
            thread::spawn(move || b.wait_for(frame_key(2, Phase::Start), LONG))
        };
        assert!(matches!(stale.join().unwrap(), Err(Error::BarrierStale(_))));

        let b = barrier.clone();
        let third = thread::spawn(move || b.wait_for(frame_key(2, Phase::Start), LONG));
        assert_eq!(barrier.wait_for(frame_key(2, Phase::Start), LONG).unwrap(), 1);
        assert!(newer.join().unwrap().is_ok());
        assert!(third.join().unwrap().is_ok());
    }

    #[test]
    fn test_leave_releases_waiters() {
        let barrier = Arc::new(FrameBarrier::new(2));
        let waiter = {
            let b = barrier.clone();
            thread::spawn(move || b.wait_for(STARTUP_KEY, LONG))
        };
        // give the waiter time to arrive; leave() completes the cycle either way
        thread::sleep(Duration::from_millis(20));
        drop(BarrierLease::new(barrier.clone()));
        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(barrier.parties(), 1);
        assert!(barrier.wait_for(frame_key(1, Phase::Start), Some(Duration::from_millis(10))).is_ok());
    }

    #[test]
    fn test_broken_barrier() {
        let barrier = Arc::new(FrameBarrier::new(2));
        let waiter = {
            let b = barrier.clone();
            thread::spawn(move || b.wait_for(STARTUP_KEY, None))
        };
        thread::sleep(Duration::from_millis(20));
        barrier.break_barrier();
        assert!(matches!(waiter.join().unwrap(), Err(Error::BarrierBroken)));
        assert!(barrier.is_broken());
        assert!(matches!(barrier.wait_for(frame_key(1, Phase::Start), None), Err(Error::BarrierBroken)));
    }
}
