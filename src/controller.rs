//! The typing controller: job lifecycle, worker thread and event fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::desktop::Desktop;
use crate::error::{Result, TypingError};
use crate::model::{JobSnapshot, ProgressEvent, TypingEvent, TypingJob, TypingState};
use crate::planner::UnitPlanner;
use crate::signal::{ControlSignal, Wake};
use crate::strategy::{build_strategy, SendStrategy};

/// Events buffered per subscriber before new ones are dropped.
pub const EVENT_BUFFER: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    signal: ControlSignal,
    snapshot: Mutex<JobSnapshot>,
    active: AtomicBool,
    subscribers: Mutex<Vec<SyncSender<TypingEvent>>>,
}

impl Shared {
    fn emit(&self, event: TypingEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(?event, "event subscriber is lagging; dropped an event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn state(&self) -> TypingState {
        lock(&self.snapshot).state
    }

    /// Moves to `next` if the state machine allows it.
    fn transition(&self, next: TypingState) -> bool {
        {
            let mut snapshot = lock(&self.snapshot);
            let current = snapshot.state;
            if !current.can_transition_to(next) {
                return false;
            }
            snapshot.state = next;
            snapshot.progress.state = next;
        }
        info!(state = %next, "typing state changed");
        self.emit(TypingEvent::StateChanged(next));
        true
    }

    /// Ends the job in `state` even if the state machine refuses the move.
    fn finish(&self, state: TypingState, err: Option<TypingError>) {
        if let Some(err) = &err {
            self.record_error(err);
        }
        if !self.transition(state) {
            let from = {
                let mut snapshot = lock(&self.snapshot);
                let from = snapshot.state;
                snapshot.state = state;
                snapshot.progress.state = state;
                from
            };
            error!(%from, to = %state, "forced an out-of-order final state");
            self.emit(TypingEvent::StateChanged(state));
        }
        self.active.store(false, Ordering::SeqCst);
        self.emit(TypingEvent::Finished { state, error: err });
    }

    fn record_error(&self, err: &TypingError) {
        lock(&self.snapshot).last_error = Some(err.clone());
    }

    fn progress(&self, unit_index: usize, line_index: usize, char_index: usize, chars_done: usize) {
        let progress = {
            let mut snapshot = lock(&self.snapshot);
            let p = &mut snapshot.progress;
            p.line_index = line_index;
            p.char_index = char_index;
            p.chars_done = p.chars_done.max(chars_done);
            p.unit_index = unit_index;
            *p
        };
        self.emit(TypingEvent::Progress(progress));
    }

    /// Pause bookkeeping for interruptible sleeps.
    fn on_pause(&self) -> impl FnMut(bool) + '_ {
        move |paused| {
            let next = if paused {
                TypingState::Paused
            } else {
                TypingState::Running
            };
            self.transition(next);
        }
    }

    fn sleep_ms(&self, ms: u64) -> Wake {
        self.signal.sleep(Duration::from_millis(ms), self.on_pause())
    }
}

/// How the typing loop ended.
enum Outcome {
    Completed,
    Stopped,
    Failed(TypingError),
}

/// Owns one job at a time and the worker thread that types it.
///
/// All control methods return immediately; observe progress through
/// [`subscribe`](Self::subscribe) or [`snapshot`](Self::snapshot).
pub struct TypingController {
    desktop: Arc<dyn Desktop>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TypingController {
    pub fn new(desktop: Arc<dyn Desktop>) -> Self {
        Self {
            desktop,
            shared: Arc::new(Shared {
                signal: ControlSignal::new(),
                snapshot: Mutex::new(JobSnapshot::default()),
                active: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self, job: TypingJob) -> Result<()> {
        self.reap_finished_worker();
        if self.shared.active.load(Ordering::SeqCst) {
            return Err(TypingError::AlreadyRunning);
        }
        job.validate()?;
        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TypingError::AlreadyRunning);
        }

        // the previous worker has already released `active`; reap it
        self.reap_worker();

        self.shared.signal.reset();
        let previous = {
            let mut snapshot = lock(&self.shared.snapshot);
            let previous = snapshot.state;
            *snapshot = JobSnapshot {
                progress: ProgressEvent {
                    total_lines: job.total_lines(),
                    total_chars: job.total_chars(),
                    ..Default::default()
                },
                ..Default::default()
            };
            previous
        };
        if previous != TypingState::Idle {
            self.shared.emit(TypingEvent::StateChanged(TypingState::Idle));
        }
        self.shared.transition(TypingState::CountingDown);

        let shared = Arc::clone(&self.shared);
        let desktop = Arc::clone(&self.desktop);
        let spawned = thread::Builder::new()
            .name("typing-worker".to_string())
            .spawn(move || run_job(&shared, desktop, job));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(err) => {
                let err = TypingError::backend(format!("failed to spawn typing worker: {err}"));
                self.shared.record_error(&err);
                self.shared.transition(TypingState::Failed);
                self.shared.active.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// No-op unless typing or already paused.
    pub fn pause(&self) {
        if matches!(
            self.shared.state(),
            TypingState::Running | TypingState::Paused
        ) {
            self.shared.signal.request_pause();
        }
    }

    /// No-op unless typing or paused.
    pub fn resume(&self) {
        if matches!(
            self.shared.state(),
            TypingState::Running | TypingState::Paused
        ) {
            self.shared.signal.resume();
        }
    }

    /// Requests a stop; the worker moves through `Stopping` and finishes as
    /// `Stopped` within one delay.
    pub fn stop(&self) {
        if self.shared.active.load(Ordering::SeqCst) {
            self.shared.signal.request_stop();
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        lock(&self.shared.snapshot).clone()
    }

    pub fn state(&self) -> TypingState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// A bounded event stream; slow receivers lose events, never block the worker.
    pub fn subscribe(&self) -> Receiver<TypingEvent> {
        let (tx, rx) = sync_channel(EVENT_BUFFER);
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Blocks until the current worker exits and returns the final snapshot.
    pub fn wait(&self) -> JobSnapshot {
        self.reap_worker();
        self.snapshot()
    }

    /// Returns a finished controller to `Idle`.
    pub fn reset(&self) -> Result<()> {
        self.reap_finished_worker();
        if self.is_active() {
            return Err(TypingError::AlreadyRunning);
        }
        self.reap_worker();
        if self.shared.transition(TypingState::Idle) {
            let mut snapshot = lock(&self.shared.snapshot);
            snapshot.progress = ProgressEvent::default();
            snapshot.last_error = None;
        }
        Ok(())
    }

    /// Joins the worker, if any. A worker that panicked never reported its
    /// end, so the job is finished as `Failed` on its behalf.
    fn reap_worker(&self) {
        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        if handle.join().is_err() {
            let err = TypingError::backend("typing worker panicked");
            error!(%err, "typing worker ended abnormally");
            self.shared.finish(TypingState::Failed, Some(err));
        }
    }

    fn reap_finished_worker(&self) {
        let finished = lock(&self.worker)
            .as_ref()
            .is_some_and(JoinHandle::is_finished);
        if finished {
            self.reap_worker();
        }
    }
}

impl Drop for TypingController {
    fn drop(&mut self) {
        self.shared.signal.request_stop();
        self.reap_worker();
    }
}

fn run_job(shared: &Shared, desktop: Arc<dyn Desktop>, job: TypingJob) {
    let mut strategy = build_strategy(job.strategy, desktop, job.target, job.pacing);
    let outcome = drive(shared, strategy.as_mut(), &job);
    strategy.finish();

    match outcome {
        Outcome::Completed => shared.finish(TypingState::Completed, None),
        Outcome::Stopped => {
            // only a job that got past the countdown winds down through Stopping
            if matches!(
                shared.state(),
                TypingState::Running | TypingState::Paused
            ) {
                shared.transition(TypingState::Stopping);
            }
            shared.finish(TypingState::Stopped, None);
        }
        Outcome::Failed(err) => {
            error!(%err, "typing job failed");
            shared.finish(TypingState::Failed, Some(err));
        }
    }
}

fn drive(shared: &Shared, strategy: &mut dyn SendStrategy, job: &TypingJob) -> Outcome {
    for remaining in (1..=job.countdown_secs).rev() {
        shared.emit(TypingEvent::Countdown {
            remaining_secs: remaining,
        });
        if shared.sleep_ms(1000) == Wake::Stopped {
            return Outcome::Stopped;
        }
    }
    if shared.signal.is_stop_requested() {
        return Outcome::Stopped;
    }

    if let Err(err) = strategy.prepare(job.click) {
        if err.is_terminal() {
            return Outcome::Failed(err);
        }
        report_delivery_failure(shared, err);
    }

    if !shared.transition(TypingState::Running) {
        return Outcome::Stopped;
    }

    for (unit_index, unit) in UnitPlanner::for_job(job).enumerate() {
        if shared.signal.checkpoint(shared.on_pause()) == Wake::Stopped {
            return Outcome::Stopped;
        }

        for (timed, mark) in unit.events.iter().zip(unit.progress_marks()) {
            if shared.sleep_ms(timed.delay_ms) == Wake::Stopped {
                return Outcome::Stopped;
            }
            match strategy.deliver(&timed.event.unit()) {
                Ok(()) => {
                    if let Some((char_index, chars_done)) = mark {
                        shared.progress(unit_index, unit.line_index, char_index, chars_done);
                    }
                }
                Err(err) if err.is_terminal() => return Outcome::Failed(err),
                Err(err) => {
                    // the rest of this unit would land out of order
                    report_delivery_failure(shared, err);
                    break;
                }
            }
        }

        shared.progress(unit_index, unit.line_index, unit.char_index, unit.chars_done);

        if shared.sleep_ms(unit.pause_after_ms) == Wake::Stopped {
            return Outcome::Stopped;
        }
    }

    Outcome::Completed
}

fn report_delivery_failure(shared: &Shared, err: TypingError) {
    warn!(%err, "unit not delivered");
    shared.record_error(&err);
    shared.emit(TypingEvent::DeliveryFailed { error: err });
}
