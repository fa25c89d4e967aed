//! Cooperative timer backend: a thin delegate to the schedule host.
//!
//! The host's delayed-callback primitive already guarantees the facade
//! contract that matters here: a zero-delay one-shot is deferred to the
//! next scheduling turn, never invoked inline within the arming call.

use crate::executor::Task;
use crate::schedule::ScheduleHost;
use crate::timer::{RepeatingTask, TimerFactory, TimerHandle};
use std::sync::Arc;
use std::time::Duration;

/// Timer factory for the cooperative backend.
pub(crate) struct CooperativeTimerFactory {
    /// The host's scheduling capabilities
    host: Arc<dyn ScheduleHost>,
}

impl CooperativeTimerFactory {
    /// Create a factory over the given host.
    pub(crate) fn new(host: Arc<dyn ScheduleHost>) -> Self {
        Self { host }
    }
}

impl TimerFactory for CooperativeTimerFactory {
    fn schedule_once(&self, delay: Duration, task: Task) -> Arc<dyn TimerHandle> {
        self.host.schedule_once(delay, task)
    }

    fn schedule_repeating(
        &self,
        initial_delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> Arc<dyn TimerHandle> {
        self.host.schedule_repeating(initial_delay, interval, task)
    }
}
