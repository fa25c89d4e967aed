//! Cooperative executor backend.
//!
//! With exactly one logical execution context, the single-thread and
//! parallel strategies cannot overlap anything and collapse to inline
//! execution. The async strategy is the one that matters here: it hands
//! tasks to the host's defer primitive, so `execute` returns first and
//! the task runs on a later scheduling turn, in submission order,
//! without growing the call stack through synchronous re-entrancy.

use crate::executor::{
    gate_with_timeout, panic_message, Executor, ExecutorError, ExecutorFactory, InlineExecutor,
    ShutdownCallback, Task,
};
use crate::schedule::ScheduleHost;
use crate::timer::TimerFactory;
use log::{error, info};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// State shared between the deferred executor and its in-flight tasks.
struct DeferredShared {
    /// Diagnostic name
    owner: String,

    /// Set once by shutdown; no task is accepted afterwards
    shutting_down: AtomicBool,

    /// Tasks deferred but not yet completed
    pending: AtomicUsize,

    /// Fires exactly once when deferred work has drained
    shutdown_callback: Mutex<Option<ShutdownCallback>>,
}

impl DeferredShared {
    /// Invoke the stored shutdown callback, if still present.
    fn fire_shutdown(&self) {
        if let Some(callback) = self.shutdown_callback.lock().take() {
            callback(Ok(()));
        }
    }
}

/// Async-strategy executor over the host's defer primitive.
pub(crate) struct DeferredExecutor {
    /// The host's scheduling capabilities
    host: Arc<dyn ScheduleHost>,

    /// Backend timer factory used for timeout gating
    timers: Arc<dyn TimerFactory>,

    /// State shared with deferred task wrappers
    shared: Arc<DeferredShared>,
}

impl DeferredExecutor {
    /// Create an executor deferring through `host`.
    pub(crate) fn new(
        owner: impl Into<String>,
        host: Arc<dyn ScheduleHost>,
        timers: Arc<dyn TimerFactory>,
    ) -> Self {
        Self {
            host,
            timers,
            shared: Arc::new(DeferredShared {
                owner: owner.into(),
                shutting_down: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                shutdown_callback: Mutex::new(None),
            }),
        }
    }

    /// Defer one accepted task, wrapped for accounting and reporting.
    fn defer(&self, task: Task) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        self.host.defer(Box::new(move || {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                // The submitter's frame is long gone; report instead
                error!(
                    "executor '{}': deferred task panicked: {}",
                    shared.owner,
                    panic_message(panic.as_ref())
                );
            }
            let left = shared.pending.fetch_sub(1, Ordering::SeqCst) - 1;
            if shared.shutting_down.load(Ordering::SeqCst) && left == 0 {
                shared.fire_shutdown();
            }
        }));
    }

    fn check_accepting(&self) -> Result<(), ExecutorError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            Err(ExecutorError::ShutDown(self.shared.owner.clone()))
        } else {
            Ok(())
        }
    }
}

impl Executor for DeferredExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.check_accepting()?;
        self.defer(task);
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
        self.defer(gated);
        Ok(())
    }

    fn shutdown(&self, callback: ShutdownCallback) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            // Already shut down; report immediately
            callback(Ok(()));
            return;
        }
        info!("executor '{}': shutting down", self.shared.owner);

        *self.shared.shutdown_callback.lock() = Some(callback);
        if self.shared.pending.load(Ordering::SeqCst) == 0 {
            self.shared.fire_shutdown();
        }
    }

    fn pending_tasks(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }
}

/// Executor factory for the cooperative backend.
pub(crate) struct CooperativeExecutorFactory {
    /// The host's scheduling capabilities
    host: Arc<dyn ScheduleHost>,

    /// Timer factory shared with the executors for timeout gating
    timers: Arc<dyn TimerFactory>,
}

impl CooperativeExecutorFactory {
    /// Create the factory.
    pub(crate) fn new(host: Arc<dyn ScheduleHost>, timers: Arc<dyn TimerFactory>) -> Self {
        Self { host, timers }
    }

    /// Inline execution: correct for every strategy that cannot
    /// overlap work when only one context exists.
    fn inline(&self, owner: &str) -> Arc<dyn Executor> {
        Arc::new(InlineExecutor::new(owner, Arc::clone(&self.timers)))
    }
}

impl ExecutorFactory for CooperativeExecutorFactory {
    fn new_immediate_executor(&self) -> Arc<dyn Executor> {
        self.inline("immediate")
    }

    fn new_single_thread_executor(&self, owner: &str) -> Arc<dyn Executor> {
        // One context already serializes everything
        self.inline(owner)
    }

    fn new_parallel_executor(&self, _max_concurrency: usize, owner: &str) -> Arc<dyn Executor> {
        // No real parallelism exists to bound
        self.inline(owner)
    }

    fn new_parallel_executor_with_min(
        &self,
        _min_workers: usize,
        _max_concurrency: usize,
        owner: &str,
    ) -> Arc<dyn Executor> {
        self.inline(owner)
    }

    fn new_async_executor(&self, owner: &str) -> Arc<dyn Executor> {
        Arc::new(DeferredExecutor::new(
            owner,
            Arc::clone(&self.host),
            Arc::clone(&self.timers),
        ))
    }
}
