//! Task runners implementing the facade's scheduling strategies.
//!
//! Four construction strategies share one contract surface:
//!
//! - immediate: the task runs synchronously in the caller's context
//! - single-thread: tasks run one at a time, in submission order
//! - parallel: up to a bound of tasks run concurrently; queued tasks
//!   are dequeued FIFO
//! - async: `execute` returns before the task runs; tasks run later in
//!   submission order
//!
//! How each strategy is realized is a backend decision ([`pool`] for
//! the threaded backend, [`deferred`] for the cooperative one); callers
//! only see [`Executor`] and [`ExecutorFactory`].

pub mod deferred;
pub mod pool;

use crate::timer::TimerFactory;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub(crate) use deferred::CooperativeExecutorFactory;
pub(crate) use pool::ThreadedExecutorFactory;

/// A unit of work submitted to an executor or timer.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Invoked exactly once when an executor finishes shutting down.
pub type ShutdownCallback = Box<dyn FnOnce(Result<(), ExecutorError>) + Send + 'static>;

/// Error when submitting work to an executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The executor has been shut down and no longer accepts tasks
    #[error("executor '{0}' is shut down")]
    ShutDown(String),
}

/// A task runner bound to one scheduling strategy.
pub trait Executor: Send + Sync {
    /// Schedule `task` according to this executor's strategy.
    ///
    /// Submitting after shutdown is rejected with
    /// [`ExecutorError::ShutDown`]; tasks are never silently dropped.
    fn execute(&self, task: Task) -> Result<(), ExecutorError>;

    /// Schedule `task`; if it has not completed within `timeout`,
    /// invoke `on_timeout` exactly once.
    ///
    /// The timeout is advisory: it never preempts a task already
    /// running. Natural completion and `on_timeout` are mutually
    /// exclusive at the observable-callback level.
    fn execute_with_timeout(
        &self,
        task: Task,
        timeout: Duration,
        on_timeout: Task,
    ) -> Result<(), ExecutorError>;

    /// Stop accepting tasks; once already-accepted work has settled,
    /// invoke `callback` exactly once.
    ///
    /// A repeated `shutdown` invokes the new callback immediately with
    /// `Ok(())`.
    fn shutdown(&self, callback: ShutdownCallback);

    /// Best-effort count of tasks accepted but not yet completed.
    ///
    /// Advisory snapshot; not protected by any lock the caller holds.
    fn pending_tasks(&self) -> usize;
}

/// Backend-bound factory for executors.
pub trait ExecutorFactory: Send + Sync {
    /// An executor whose `execute` runs the task synchronously in the
    /// caller's execution context.
    fn new_immediate_executor(&self) -> Arc<dyn Executor>;

    /// An executor running tasks one at a time in submission order.
    ///
    /// `owner` is a diagnostic name; whether tasks run on the caller's
    /// context or a dedicated worker is backend-dependent.
    fn new_single_thread_executor(&self, owner: &str) -> Arc<dyn Executor>;

    /// An executor running up to `max_concurrency` tasks concurrently;
    /// tasks beyond capacity queue FIFO. A `max_concurrency` of 0 asks
    /// for the backend's available parallelism.
    fn new_parallel_executor(&self, max_concurrency: usize, owner: &str) -> Arc<dyn Executor>;

    /// As [`ExecutorFactory::new_parallel_executor`], with `min_workers`
    /// as a pre-warming hint (not a hard floor).
    fn new_parallel_executor_with_min(
        &self,
        min_workers: usize,
        max_concurrency: usize,
        owner: &str,
    ) -> Arc<dyn Executor>;

    /// An executor whose `execute` returns before the task runs; tasks
    /// run later, in submission order, off the submitting call stack.
    fn new_async_executor(&self, owner: &str) -> Arc<dyn Executor>;
}

/// Best-effort text of a caught panic payload.
///
/// `panic!` with a format string carries a `String`; a bare literal
/// carries a `&'static str`. Anything else is opaque.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else {
        "<unknown panic>"
    }
}

/// Wrap `task` so that its natural completion and the `on_timeout`
/// callback are mutually exclusive.
///
/// A one-shot timer armed through the backend's own timer factory races
/// the wrapped task for a shared settled flag; whichever wins the
/// compare-and-set fires, the other becomes a no-op. The handle is also
/// returned so a caller that fails to schedule the wrapped task can
/// disarm the watchdog.
pub(crate) fn gate_with_timeout(
    timers: &Arc<dyn TimerFactory>,
    task: Task,
    timeout: Duration,
    on_timeout: Task,
) -> (Task, Arc<dyn crate::timer::TimerHandle>) {
    let settled = Arc::new(AtomicBool::new(false));

    let timeout_gate = Arc::clone(&settled);
    let handle = timers.schedule_once(
        timeout,
        Box::new(move || {
            if timeout_gate
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                on_timeout();
            }
        }),
    );

    let task_handle = Arc::clone(&handle);
    let gated: Task = Box::new(move || {
        task();
        let _ = settled.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        task_handle.stop();
    });
    (gated, handle)
}

/// Executor running tasks synchronously in the caller's context.
///
/// Serves as the immediate strategy on every backend, and as the
/// single-thread and parallel strategies on the cooperative backend,
/// where a second concurrent context does not exist. Task panics
/// propagate synchronously to the caller; nothing is ever pending.
pub(crate) struct InlineExecutor {
    /// Diagnostic name
    owner: String,

    /// Cleared by shutdown
    accepting: AtomicBool,

    /// Backend timer factory used for timeout gating
    timers: Arc<dyn TimerFactory>,
}

impl InlineExecutor {
    /// Create an inline executor bound to the backend's timers.
    pub(crate) fn new(owner: impl Into<String>, timers: Arc<dyn TimerFactory>) -> Self {
        Self {
            owner: owner.into(),
            accepting: AtomicBool::new(true),
            timers,
        }
    }

    fn check_accepting(&self) -> Result<(), ExecutorError> {
        if self.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExecutorError::ShutDown(self.owner.clone()))
        }
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.check_accepting()?;
        task();
        Ok(())
    }

    fn execute_with_timeout(
        &self,
        task: Task,
        timeout: Duration,
        on_timeout: Task,
    ) -> Result<(), ExecutorError> {
        self.check_accepting()?;
        let (gated, _handle) = gate_with_timeout(&self.timers, task, timeout, on_timeout);
        gated();
        Ok(())
    }

    fn shutdown(&self, callback: ShutdownCallback) {
        self.accepting.store(false, Ordering::SeqCst);
        // Inline execution leaves nothing to drain
        callback(Ok(()));
    }

    fn pending_tasks(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleHost, StepScheduler};
    use crate::timer::CooperativeTimerFactory;
    use std::panic::catch_unwind;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_panic_message_recovers_both_payload_kinds() {
        let caught = catch_unwind(|| panic!("{} failed", "task")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "task failed");

        let caught = catch_unwind(|| panic!("static failure")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static failure");

        let caught = catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "<unknown panic>");
    }

    fn inline_over_step() -> (Arc<StepScheduler>, InlineExecutor) {
        let host = Arc::new(StepScheduler::new());
        let timers: Arc<dyn crate::timer::TimerFactory> = Arc::new(CooperativeTimerFactory::new(
            Arc::clone(&host) as Arc<dyn ScheduleHost>,
        ));
        (host, InlineExecutor::new("inline-test", timers))
    }

    #[test]
    fn test_runs_synchronously() {
        let (_host, executor) = inline_over_step();
        let ran = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&ran);
        executor
            .execute(Box::new(move || observed.store(true, Ordering::SeqCst)))
            .unwrap();

        // Completed before execute returned
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(executor.pending_tasks(), 0);
    }

    #[test]
    fn test_shutdown_then_execute_rejected() {
        let (_host, executor) = inline_over_step();
        let signalled = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&signalled);
        executor.shutdown(Box::new(move |result| {
            assert!(result.is_ok());
            observed.store(true, Ordering::SeqCst);
        }));
        assert!(signalled.load(Ordering::SeqCst));

        let result = executor.execute(Box::new(|| {}));
        assert!(matches!(result, Err(ExecutorError::ShutDown(_))));
    }

    #[test]
    fn test_completion_suppresses_timeout() {
        let (host, executor) = inline_over_step();
        let timed_out = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&timed_out);
        executor
            .execute_with_timeout(
                Box::new(|| {}),
                Duration::from_millis(10),
                Box::new(move || observed.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        // Even with virtual time moving past the deadline, the settled
        // completion keeps on_timeout out
        host.advance(Duration::from_millis(100));
        assert!(!timed_out.load(Ordering::SeqCst));
    }

    #[test]
    fn test_second_shutdown_reports_immediately() {
        let (_host, executor) = inline_over_step();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let observed = Arc::clone(&calls);
            executor.shutdown(Box::new(move |result| {
                assert!(result.is_ok());
                observed.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
