//! Threaded timer backend: a deadline heap serviced by one dedicated
//! thread.
//!
//! The wheel thread sleeps on a condvar until the earliest deadline,
//! runs due callbacks, and reschedules repeating entries. `stop`
//! flips the entry's cancelled flag and nudges the condvar; the entry
//! is discarded lazily. Zero-delay one-shots enqueue with a deadline of
//! now, so they run on the wheel thread on its next pass, never inline
//! in the arming call.

use crate::executor::{panic_message, Task};
use crate::timer::{RepeatingTask, TimerFactory, TimerHandle};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// The callback carried by a wheel entry.
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

/// A pending registration keyed by wall-clock deadline.
struct WheelEntry {
    /// When the entry is due
    deadline: Instant,

    /// Tie-breaker preserving arming order among equal deadlines
    seq: u64,

    /// Set by `stop`; checked before firing and before rescheduling
    cancelled: Arc<AtomicBool>,

    /// The callback to run
    job: TimerJob,
}

impl PartialEq for WheelEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for WheelEntry {}

impl PartialOrd for WheelEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for WheelEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Inverted so the binary heap yields the earliest entry first
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Heap and lifecycle flag guarded by the wheel mutex.
struct WheelState {
    /// Armed entries, earliest first
    entries: BinaryHeap<WheelEntry>,

    /// Tells the wheel thread to exit
    shutdown: bool,

    /// Arming-order counter
    next_seq: u64,
}

/// State shared between the factory, the handles, and the wheel thread.
struct WheelShared {
    /// Guarded heap state
    state: Mutex<WheelState>,

    /// Wakes the wheel thread on arming, cancellation, and shutdown
    wakeup: Condvar,
}

/// Handle to one wheel entry.
struct WheelHandle {
    /// Shared cancellation flag
    cancelled: Arc<AtomicBool>,

    /// Back-reference for waking the wheel thread
    shared: Weak<WheelShared>,
}

impl TimerHandle for WheelHandle {
    fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(shared) = self.shared.upgrade() {
            shared.wakeup.notify_one();
        }
    }
}

/// Timer factory for the threaded backend.
pub(crate) struct WheelTimerFactory {
    shared: Arc<WheelShared>,
}

impl WheelTimerFactory {
    /// Create the factory and start its wheel thread.
    pub(crate) fn new(name_prefix: &str) -> Self {
        let shared = Arc::new(WheelShared {
            state: Mutex::new(WheelState {
                entries: BinaryHeap::new(),
                shutdown: false,
                next_seq: 0,
            }),
            wakeup: Condvar::new(),
        });

        let thread_name = format!("{}-timer", name_prefix);
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || Self::wheel_loop(thread_shared))
            .expect("failed to spawn timer wheel thread");

        Self { shared }
    }

    /// Wheel thread main loop.
    fn wheel_loop(shared: Arc<WheelShared>) {
        debug!("timer wheel: starting");

        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            // Discard cancelled entries sitting at the top
            while state
                .entries
                .peek()
                .is_some_and(|entry| entry.cancelled.load(Ordering::SeqCst))
            {
                state.entries.pop();
            }

            let next_deadline = match state.entries.peek() {
                None => {
                    shared.wakeup.wait(&mut state);
                    continue;
                }
                Some(entry) => entry.deadline,
            };

            if next_deadline > Instant::now() {
                shared.wakeup.wait_until(&mut state, next_deadline);
                continue;
            }

            if let Some(mut entry) = state.entries.pop() {
                // Run the callback without holding the wheel lock
                drop(state);
                let reinsert = Self::fire(&mut entry);
                state = shared.state.lock();
                if reinsert {
                    state.entries.push(entry);
                }
            }
        }

        debug!("timer wheel: shutting down");
    }

    /// Fire one due entry; returns true when the entry must be
    /// rescheduled.
    fn fire(entry: &mut WheelEntry) -> bool {
        if entry.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        match &mut entry.job {
            TimerJob::Once(task) => {
                if let Some(task) = task.take() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                        error!("timer callback panicked: {}", panic_message(panic.as_ref()));
                    }
                }
                // One-shot: armed -> stopped after firing
                entry.cancelled.store(true, Ordering::SeqCst);
                false
            }
            TimerJob::Every { interval, task } => {
                let interval = *interval;
                if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
                    error!("repeating timer callback panicked; timer stopped");
                    entry.cancelled.store(true, Ordering::SeqCst);
                    return false;
                }
                // The callback may have stopped its own handle
                if entry.cancelled.load(Ordering::SeqCst) {
                    false
                } else {
                    entry.deadline += interval;
                    true
                }
            }
        }
    }

    /// Arm an entry and hand back its handle.
    fn arm(&self, delay: Duration, job: TimerJob) -> Arc<dyn TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.shared.state.lock();
            let entry = WheelEntry {
                deadline: Instant::now() + delay,
                seq: state.next_seq,
                cancelled: Arc::clone(&cancelled),
                job,
            };
            state.next_seq += 1;
            state.entries.push(entry);
        }
        self.shared.wakeup.notify_one();
        Arc::new(WheelHandle {
            cancelled,
            shared: Arc::downgrade(&self.shared),
        })
    }
}

impl TimerFactory for WheelTimerFactory {
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

impl Drop for WheelTimerFactory {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_one();
    }
}
