//! Host scheduling capabilities for the cooperative backend.
//!
//! A cooperative environment supplies two opaque primitives: "defer
//! this callback to the next turn" and "run this callback after a
//! delay, optionally repeating". [`ScheduleHost`] captures exactly that
//! surface; the cooperative executors and timers are built on it and on
//! nothing else.
//!
//! [`StepScheduler`] is the in-crate host: a deterministic, manually
//! pumped scheduler with a virtual clock. Embedders with a native event
//! loop implement [`ScheduleHost`] over it instead; processes without
//! one (and the tests) drive a `StepScheduler` directly.

use crate::executor::{panic_message, Task};
use crate::timer::{RepeatingTask, TimerHandle};
use log::error;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The native scheduling primitives of a cooperative host environment.
pub trait ScheduleHost: Send + Sync {
    /// Run `task` on the next turn of the scheduler, after the current
    /// call stack unwinds.
    fn defer(&self, task: Task);

    /// Run `task` once after `delay` of host time.
    fn schedule_once(&self, delay: Duration, task: Task) -> Arc<dyn TimerHandle>;

    /// Run `task` after `initial_delay`, then every `interval`, until
    /// the returned handle is stopped.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero; a zero-period registration would
    /// be due again the instant it fires and could starve the pump.
    fn schedule_repeating(
        &self,
        initial_delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> Arc<dyn TimerHandle>;
}

/// Cancellation flag shared between a timer entry and its handle.
struct StepTimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle for StepTimerHandle {
    fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// The callback carried by a timer entry.
enum TimerJob {
    /// Fires once; the task is taken out when it runs
    Once(Option<Task>),

    /// Fires every `interval` until cancelled
    Every {
        /// Firing cadence after the first deadline
        interval: Duration,
        /// The repeating callback
        task: RepeatingTask,
    },
}

/// A pending timer registration keyed by virtual deadline.
struct TimerEntry {
    /// Virtual-clock instant at which the entry is due
    deadline: Duration,

    /// Tie-breaker preserving arming order among equal deadlines
    seq: u64,

    /// Set by `stop`; checked before firing and before rescheduling
    cancelled: Arc<AtomicBool>,

    /// The callback to run
    job: TimerJob,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Inverted so the binary heap yields the earliest entry first
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Mutable scheduler state, guarded by one mutex.
struct SchedulerState {
    /// The virtual clock
    now: Duration,

    /// Tasks deferred to the next turn, FIFO
    deferred: VecDeque<Task>,

    /// Armed timers, earliest first
    timers: BinaryHeap<TimerEntry>,

    /// Arming-order counter
    next_seq: u64,
}

/// One unit of ready work popped from the scheduler.
enum Ready {
    Deferred(Task),
    Timer(TimerEntry),
}

/// A deterministic, manually pumped cooperative scheduler.
///
/// Exactly one logical execution context is expected to pump it;
/// nothing blocks, and work only runs inside [`StepScheduler::run_until_idle`]
/// or [`StepScheduler::advance`]. Time is virtual: it moves only when
/// `advance` is called, which makes timer behavior fully reproducible.
pub struct StepScheduler {
    state: Mutex<SchedulerState>,
}

impl StepScheduler {
    /// Create a scheduler with an empty queue and the clock at zero.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                now: Duration::ZERO,
                deferred: VecDeque::new(),
                timers: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Run deferred tasks and already-due timers until none remain.
    ///
    /// Work scheduled by the tasks themselves keeps the pump going, so
    /// a zero-delay chain runs turn by turn here instead of growing the
    /// call stack.
    pub fn run_until_idle(&self) {
        while let Some(ready) = self.pop_ready() {
            self.run_one(ready);
        }
    }

    /// Advance the virtual clock by `delta`, firing deferred tasks and
    /// timers in deadline order as time passes.
    pub fn advance(&self, delta: Duration) {
        let target = self.state.lock().now + delta;

        loop {
            self.run_until_idle();

            let next_deadline = {
                let mut state = self.state.lock();
                Self::discard_cancelled(&mut state);
                state.timers.peek().map(|entry| entry.deadline)
            };

            match next_deadline {
                Some(deadline) if deadline <= target => {
                    self.state.lock().now = deadline;
                }
                _ => break,
            }
        }

        self.state.lock().now = target;
        self.run_until_idle();
    }

    /// Drop cancelled entries sitting at the top of the heap.
    fn discard_cancelled(state: &mut SchedulerState) {
        while let Some(entry) = state.timers.peek() {
            if entry.cancelled.load(Ordering::SeqCst) {
                state.timers.pop();
            } else {
                break;
            }
        }
    }

    /// Pop one unit of ready work, deferred tasks first.
    fn pop_ready(&self) -> Option<Ready> {
        let mut state = self.state.lock();

        if let Some(task) = state.deferred.pop_front() {
            return Some(Ready::Deferred(task));
        }

        Self::discard_cancelled(&mut state);
        let due = state
            .timers
            .peek()
            .is_some_and(|entry| entry.deadline <= state.now);
        if due {
            return state.timers.pop().map(Ready::Timer);
        }

        None
    }

    /// Run one unit of work outside the state lock.
    fn run_one(&self, ready: Ready) {
        match ready {
            Ready::Deferred(task) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    error!("deferred task panicked: {}", panic_message(panic.as_ref()));
                }
            }
            Ready::Timer(mut entry) => {
                if entry.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                match &mut entry.job {
                    TimerJob::Once(task) => {
                        if let Some(task) = task.take() {
                            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                                error!(
                                    "timer callback panicked: {}",
                                    panic_message(panic.as_ref())
                                );
                            }
                        }
                        // One-shot: armed -> stopped after firing
                        entry.cancelled.store(true, Ordering::SeqCst);
                    }
                    TimerJob::Every { interval, task } => {
                        let interval = *interval;
                        let panicked = catch_unwind(AssertUnwindSafe(|| task())).is_err();
                        if panicked {
                            error!("repeating timer callback panicked; timer stopped");
                            entry.cancelled.store(true, Ordering::SeqCst);
                        }
                        // The callback may have stopped its own handle
                        if !entry.cancelled.load(Ordering::SeqCst) {
                            entry.deadline += interval;
                            self.state.lock().timers.push(entry);
                        }
                    }
                }
            }
        }
    }

    /// Arm a timer entry and hand back its cancellation flag.
    fn arm(&self, delay: Duration, job: TimerJob) -> Arc<dyn TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        let entry = TimerEntry {
            deadline: state.now + delay,
            seq: state.next_seq,
            cancelled: Arc::clone(&cancelled),
            job,
        };
        state.next_seq += 1;
        state.timers.push(entry);
        Arc::new(StepTimerHandle { cancelled })
    }
}

impl Default for StepScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleHost for StepScheduler {
    fn defer(&self, task: Task) {
        self.state.lock().deferred.push_back(task);
    }

    fn schedule_once(&self, delay: Duration, task: Task) -> Arc<dyn TimerHandle> {
        self.arm(delay, TimerJob::Once(Some(task)))
    }

    fn schedule_repeating(
        &self,
        initial_delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> Arc<dyn TimerHandle> {
        assert!(
            !interval.is_zero(),
            "repeating timer interval must be non-zero"
        );
        self.arm(initial_delay, TimerJob::Every { interval, task })
    }
}
