//! Pause/stop flag shared between the control surface and the worker.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

const NONE: u8 = 0;
const PAUSE: u8 = 1;
const STOP: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    Pause,
    Stop,
}

/// How an interruptible wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Stopped,
}

/// Written by the control surface, polled by the worker.
///
/// Stop is sticky: once requested only `reset` clears it.
#[derive(Debug, Default)]
pub struct ControlSignal {
    state: AtomicU8,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Signal {
        match self.state.load(Ordering::SeqCst) {
            PAUSE => Signal::Pause,
            STOP => Signal::Stop,
            _ => Signal::None,
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.get() == Signal::Stop
    }

    /// Returns false if a stop is already pending.
    pub fn request_pause(&self) -> bool {
        self.transition(NONE, PAUSE) || self.get() == Signal::Pause
    }

    pub fn resume(&self) {
        self.transition(PAUSE, NONE);
    }

    pub fn request_stop(&self) {
        self.store(STOP);
    }

    pub fn reset(&self) {
        self.store(NONE);
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = self
            .state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            self.wake.notify_all();
        }
        changed
    }

    fn store(&self, value: u8) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.store(value, Ordering::SeqCst);
        self.wake.notify_all();
    }

    /// Blocks until the signal is no longer `Pause`.
    pub fn wait_while_paused(&self) -> Signal {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.state.load(Ordering::SeqCst) == PAUSE {
            guard = self
                .wake
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.get()
    }

    /// Blocks until `deadline` passes or the signal changes away from `None`.
    fn wait_until(&self, deadline: Instant) {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.state.load(Ordering::SeqCst) != NONE {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            guard = self
                .wake
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Sleeps for `duration` of unpaused time.
    ///
    /// Time spent paused pushes the deadline back. `on_pause(true)` runs when a
    /// pause starts and `on_pause(false)` when it ends without a stop.
    pub fn sleep(&self, duration: Duration, mut on_pause: impl FnMut(bool)) -> Wake {
        let mut deadline = Instant::now() + duration;
        loop {
            match self.get() {
                Signal::Stop => return Wake::Stopped,
                Signal::Pause => {
                    on_pause(true);
                    let paused_at = Instant::now();
                    if self.wait_while_paused() == Signal::Stop {
                        return Wake::Stopped;
                    }
                    deadline += paused_at.elapsed();
                    on_pause(false);
                }
                Signal::None => {
                    if Instant::now() >= deadline {
                        return Wake::Elapsed;
                    }
                    self.wait_until(deadline);
                }
            }
        }
    }

    /// A zero-length sleep: blocks while paused and reports a pending stop.
    pub fn checkpoint(&self, on_pause: impl FnMut(bool)) -> Wake {
        self.sleep(Duration::ZERO, on_pause)
    }
}
