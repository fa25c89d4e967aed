//! Cancelable scheduled and repeating callbacks.
//!
//! A timer registration transitions from armed to stopped exactly once,
//! either through [`TimerHandle::stop`] or, for one-shot timers,
//! implicitly after firing. `stop` is idempotent and safe to call from
//! within the timer's own callback.
//!
//! Zero-delay one-shot timers are always deferred to the next
//! scheduling opportunity; they never run inline within the call that
//! armed them.

pub mod cooperative;
pub mod wheel;

use crate::executor::Task;
use std::sync::Arc;
use std::time::Duration;

pub(crate) use cooperative::CooperativeTimerFactory;
pub(crate) use wheel::WheelTimerFactory;

/// A repeating timer callback; invoked once per firing.
pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// A cancelable timer registration.
pub trait TimerHandle: Send + Sync {
    /// Prevent any future firing.
    ///
    /// Idempotent; calling after the timer fired (one-shot) or after a
    /// prior `stop` is a harmless no-op.
    fn stop(&self);
}

/// Backend-bound factory for timer registrations.
pub trait TimerFactory: Send + Sync {
    /// Run `task` once after `delay`.
    ///
    /// A zero delay still defers the task to the next scheduling
    /// opportunity rather than invoking it inline.
    fn schedule_once(&self, delay: Duration, task: Task) -> Arc<dyn TimerHandle>;

    /// Run `task` after `initial_delay`, then every `interval` until
    /// the returned handle is stopped.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero: a registration that is due again
    /// the instant it fires can never make forward progress.
    fn schedule_repeating(
        &self,
        initial_delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> Arc<dyn TimerHandle>;
}
