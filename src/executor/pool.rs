//! Threaded executor backend: a worker pool over a FIFO channel.
//!
//! One pool type realizes three strategies. A single worker gives the
//! single-thread and async strategies their submission-order guarantee;
//! multiple workers give the parallel strategy its concurrency bound.
//! Workers spawn on demand from the pre-warm count up to the bound when
//! the backlog exceeds the live worker count.
//!
//! Task panics are caught on the worker, reported through the error
//! log, and never kill the worker; failures in tasks the caller has
//! already detached from have no caller frame to propagate into.

use crate::executor::{
    gate_with_timeout, panic_message, Executor, ExecutorError, ExecutorFactory, InlineExecutor,
    ShutdownCallback, Task,
};
use crate::timer::TimerFactory;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Interval at which idle workers re-check the shutdown flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Acceptance state, mutated only under the `accept` mutex.
///
/// Holding the shutting-down flag and the pending count behind one
/// guard makes task acceptance atomic against shutdown: a submitter
/// that passed the flag check has already raised `pending`, so a
/// concurrent shutdown can never observe an empty pool, fire the
/// drained callback, and strand the task in the channel.
struct AcceptState {
    /// Set once by shutdown; no task is accepted afterwards
    shutting_down: bool,

    /// Tasks accepted but not yet completed
    pending: usize,
}

/// State shared between the pool handle and its workers.
struct PoolShared {
    /// Diagnostic name; also the worker thread-name prefix
    owner: String,

    /// Acceptance state, guarded as one unit
    accept: Mutex<AcceptState>,

    /// Workers currently alive
    live_workers: AtomicUsize,

    /// Fires exactly once when accepted work has drained
    shutdown_callback: Mutex<Option<ShutdownCallback>>,

    /// Worker side of the task channel
    receiver: Receiver<Task>,
}

impl PoolShared {
    /// Invoke the stored shutdown callback, if still present.
    ///
    /// Never called while holding the `accept` guard.
    fn fire_shutdown(&self) {
        if let Some(callback) = self.shutdown_callback.lock().take() {
            callback(Ok(()));
        }
    }

    /// Mark one task complete; true when this completion drained a
    /// shutting-down pool.
    fn complete_task(&self) -> bool {
        let mut accept = self.accept.lock();
        accept.pending -= 1;
        accept.shutting_down && accept.pending == 0
    }
}

/// A FIFO worker pool bounded at `max_workers`.
pub(crate) struct WorkerPool {
    /// Submission side of the task channel
    sender: Sender<Task>,

    /// State shared with the workers
    shared: Arc<PoolShared>,

    /// Hard concurrency bound
    max_workers: usize,

    /// Monotonic worker naming
    next_worker_id: AtomicUsize,
}

impl WorkerPool {
    /// Create a pool with `min_workers` pre-warmed and growth on demand
    /// up to `max_workers`.
    pub(crate) fn new(owner: impl Into<String>, min_workers: usize, max_workers: usize) -> Self {
        let owner = owner.into();
        let (sender, receiver) = unbounded();

        let shared = Arc::new(PoolShared {
            owner,
            accept: Mutex::new(AcceptState {
                shutting_down: false,
                pending: 0,
            }),
            live_workers: AtomicUsize::new(0),
            shutdown_callback: Mutex::new(None),
            receiver,
        });

        info!(
            "executor '{}': created ({} pre-warmed, up to {} workers)",
            shared.owner, min_workers, max_workers
        );

        let pool = Self {
            sender,
            shared,
            max_workers,
            next_worker_id: AtomicUsize::new(0),
        };
        for _ in 0..min_workers.min(max_workers) {
            pool.shared.live_workers.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker();
        }
        pool
    }

    /// Spawn one worker thread; the live count is already reserved.
    fn spawn_worker(&self) {
        let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("{}-{}", self.shared.owner, id))
            .spawn(move || Self::worker_loop(id, shared))
            .expect("failed to spawn executor worker thread");
    }

    /// Grow toward the bound when the backlog outpaces live workers.
    fn maybe_grow(&self) {
        loop {
            let live = self.shared.live_workers.load(Ordering::SeqCst);
            if live >= self.max_workers || self.shared.accept.lock().pending <= live {
                return;
            }
            if self
                .shared
                .live_workers
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.spawn_worker();
                return;
            }
        }
    }

    /// Worker thread main loop.
    fn worker_loop(id: usize, shared: Arc<PoolShared>) {
        debug!("executor '{}': worker {} starting", shared.owner, id);

        loop {
            match shared.receiver.recv_timeout(IDLE_POLL) {
                Ok(task) => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                        error!(
                            "executor '{}': task panicked: {}",
                            shared.owner,
                            panic_message(panic.as_ref())
                        );
                    }
                    if shared.complete_task() {
                        shared.fire_shutdown();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let drained = {
                let accept = shared.accept.lock();
                accept.shutting_down && accept.pending == 0
            };
            if drained {
                break;
            }
        }

        shared.live_workers.fetch_sub(1, Ordering::SeqCst);
        debug!("executor '{}': worker {} exiting", shared.owner, id);
    }

    /// Whether shutdown has been initiated.
    fn is_shutting_down(&self) -> bool {
        self.shared.accept.lock().shutting_down
    }

    /// Queue a task, growing the worker set if useful.
    fn submit(&self, task: Task) -> Result<(), ExecutorError> {
        {
            // One guard for the flag check and the pending increment:
            // an accepted task is always visible to the drain
            let mut accept = self.shared.accept.lock();
            if accept.shutting_down {
                return Err(ExecutorError::ShutDown(self.shared.owner.clone()));
            }
            accept.pending += 1;
        }
        if self.sender.send(task).is_err() {
            if self.shared.complete_task() {
                self.shared.fire_shutdown();
            }
            return Err(ExecutorError::ShutDown(self.shared.owner.clone()));
        }
        self.maybe_grow();
        Ok(())
    }

    /// Stop accepting tasks and arrange for `callback` once accepted
    /// work drains.
    fn shutdown(&self, callback: ShutdownCallback) {
        let drained = {
            let mut accept = self.shared.accept.lock();
            if accept.shutting_down {
                // Already shut down; report immediately
                drop(accept);
                callback(Ok(()));
                return;
            }
            // Store before the flag flips so a concurrently draining
            // worker cannot miss it
            *self.shared.shutdown_callback.lock() = Some(callback);
            accept.shutting_down = true;
            accept.pending == 0
        };
        info!("executor '{}': shutting down", self.shared.owner);

        if drained {
            self.shared.fire_shutdown();
        }
    }

    /// Advisory count of accepted, not-yet-completed tasks.
    fn pending(&self) -> usize {
        self.shared.accept.lock().pending
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers drain the queue and exit; nothing joins them
        self.shared.accept.lock().shutting_down = true;
    }
}

/// Executor over a [`WorkerPool`].
pub(crate) struct PooledExecutor {
    /// The worker pool realizing this strategy
    pool: WorkerPool,

    /// Backend timer factory used for timeout gating
    timers: Arc<dyn TimerFactory>,
}

impl PooledExecutor {
    /// Create an executor over a pool with the given worker bounds.
    pub(crate) fn new(
        owner: impl Into<String>,
        min_workers: usize,
        max_workers: usize,
        timers: Arc<dyn TimerFactory>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(owner, min_workers, max_workers),
            timers,
        }
    }
}

impl Executor for PooledExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.pool.submit(task)
    }

    fn execute_with_timeout(
        &self,
        task: Task,
        timeout: Duration,
        on_timeout: Task,
    ) -> Result<(), ExecutorError> {
        if self.pool.is_shutting_down() {
            return Err(ExecutorError::ShutDown(self.pool.shared.owner.clone()));
        }
        let (gated, handle) = gate_with_timeout(&self.timers, task, timeout, on_timeout);
        let result = self.pool.submit(gated);
        if result.is_err() {
            // The task will never run; disarm the watchdog
            handle.stop();
        }
        result
    }

    fn shutdown(&self, callback: ShutdownCallback) {
        self.pool.shutdown(callback);
    }

    fn pending_tasks(&self) -> usize {
        self.pool.pending()
    }
}

/// Executor factory for the threaded backend.
pub(crate) struct ThreadedExecutorFactory {
    /// Timer factory shared with the executors for timeout gating
    timers: Arc<dyn TimerFactory>,

    /// Name used for executors the caller does not name
    name_prefix: String,
}

impl ThreadedExecutorFactory {
    /// Create the factory.
    pub(crate) fn new(timers: Arc<dyn TimerFactory>, name_prefix: impl Into<String>) -> Self {
        Self {
            timers,
            name_prefix: name_prefix.into(),
        }
    }

    /// Resolve the caller's concurrency request against the host.
    fn resolve_parallelism(max_concurrency: usize) -> usize {
        if max_concurrency == 0 {
            num_cpus::get()
        } else {
            max_concurrency
        }
    }
}

impl ExecutorFactory for ThreadedExecutorFactory {
    fn new_immediate_executor(&self) -> Arc<dyn Executor> {
        Arc::new(InlineExecutor::new(
            format!("{}-immediate", self.name_prefix),
            Arc::clone(&self.timers),
        ))
    }

    fn new_single_thread_executor(&self, owner: &str) -> Arc<dyn Executor> {
        // One worker: overlap is impossible and FIFO order is exact
        Arc::new(PooledExecutor::new(owner, 1, 1, Arc::clone(&self.timers)))
    }

    fn new_parallel_executor(&self, max_concurrency: usize, owner: &str) -> Arc<dyn Executor> {
        self.new_parallel_executor_with_min(0, max_concurrency, owner)
    }

    fn new_parallel_executor_with_min(
        &self,
        min_workers: usize,
        max_concurrency: usize,
        owner: &str,
    ) -> Arc<dyn Executor> {
        let max_workers = Self::resolve_parallelism(max_concurrency);
        Arc::new(PooledExecutor::new(
            owner,
            min_workers,
            max_workers,
            Arc::clone(&self.timers),
        ))
    }

    fn new_async_executor(&self, owner: &str) -> Arc<dyn Executor> {
        // Same single-worker shape as the single-thread strategy; the
        // worker being distinct from the submitter is what makes every
        // submission return before its task runs
        Arc::new(PooledExecutor::new(owner, 1, 1, Arc::clone(&self.timers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::WheelTimerFactory;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn factory() -> ThreadedExecutorFactory {
        let timers: Arc<dyn TimerFactory> = Arc::new(WheelTimerFactory::new("test"));
        ThreadedExecutorFactory::new(timers, "test")
    }

    #[test]
    fn test_single_thread_preserves_submission_order() {
        let executor = factory().new_single_thread_executor("ordered");
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in 0..20 {
            let order = Arc::clone(&order);
            executor
                .execute(Box::new(move || {
                    // Uneven task durations must not reorder completion
                    if label % 3 == 0 {
                        thread::sleep(ms(2));
                    }
                    order.lock().push(label);
                }))
                .unwrap();
        }

        thread::sleep(ms(300));
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_async_executor_returns_before_task_runs() {
        let executor = factory().new_async_executor("deferred");
        let ran = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&ran);
        executor
            .execute(Box::new(move || {
                thread::sleep(ms(50));
                observed.store(true, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(!ran.load(Ordering::SeqCst));
        thread::sleep(ms(200));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_parallel_executor_runs_concurrently() {
        let executor = factory().new_parallel_executor_with_min(2, 2, "parallel");
        let rendezvous = Arc::new(Barrier::new(2));
        let met = Arc::new(AtomicUsize::new(0));

        // Both tasks must be in flight at once to pass the barrier
        for _ in 0..2 {
            let rendezvous = Arc::clone(&rendezvous);
            let met = Arc::clone(&met);
            executor
                .execute(Box::new(move || {
                    rendezvous.wait();
                    met.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        thread::sleep(ms(200));
        assert_eq!(met.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parallel_executor_grows_on_demand() {
        let executor = factory().new_parallel_executor(4, "on-demand");
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let count = Arc::clone(&count);
            executor
                .execute(Box::new(move || {
                    thread::sleep(ms(5));
                    count.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        thread::sleep(ms(400));
        assert_eq!(count.load(Ordering::SeqCst), 16);
        assert_eq!(executor.pending_tasks(), 0);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let executor = factory().new_single_thread_executor("panicky");
        let ran = Arc::new(AtomicBool::new(false));

        executor.execute(Box::new(|| panic!("task failure"))).unwrap();
        let observed = Arc::clone(&ran);
        executor
            .execute(Box::new(move || observed.store(true, Ordering::SeqCst)))
            .unwrap();

        thread::sleep(ms(200));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_drains_then_reports() {
        let executor = factory().new_single_thread_executor("draining");
        let completed = Arc::new(AtomicUsize::new(0));
        let saw_drained = Arc::new(AtomicBool::new(false));

        for _ in 0..3 {
            let completed = Arc::clone(&completed);
            executor
                .execute(Box::new(move || {
                    thread::sleep(ms(20));
                    completed.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        let completed_at_callback = Arc::clone(&completed);
        let observed = Arc::clone(&saw_drained);
        executor.shutdown(Box::new(move |result| {
            assert!(result.is_ok());
            // All accepted work settled before the callback
            observed.store(completed_at_callback.load(Ordering::SeqCst) == 3, Ordering::SeqCst);
        }));

        thread::sleep(ms(300));
        assert!(saw_drained.load(Ordering::SeqCst));

        let result = executor.execute(Box::new(|| {}));
        assert!(matches!(result, Err(ExecutorError::ShutDown(_))));
    }

    #[test]
    fn test_racing_submit_and_shutdown_never_strands_a_task() {
        // Any execute that returned Ok must run before the drained
        // callback fires, however the submit interleaves with shutdown
        for _ in 0..20 {
            let executor = Arc::new(factory().new_single_thread_executor("racing"));
            let accepted = Arc::new(AtomicUsize::new(0));
            let executed = Arc::new(AtomicUsize::new(0));
            let drained = Arc::new(AtomicBool::new(false));

            let submitter = {
                let executor = Arc::clone(&executor);
                let accepted = Arc::clone(&accepted);
                let executed = Arc::clone(&executed);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let executed = Arc::clone(&executed);
                        let task = Box::new(move || {
                            executed.fetch_add(1, Ordering::SeqCst);
                        });
                        if executor.execute(task).is_ok() {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            };

            let observed = Arc::clone(&drained);
            executor.shutdown(Box::new(move |result| {
                assert!(result.is_ok());
                observed.store(true, Ordering::SeqCst);
            }));
            submitter.join().unwrap();

            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while !drained.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
                thread::sleep(ms(1));
            }
            assert!(drained.load(Ordering::SeqCst));

            // Give the last accepted task's counter update a moment
            let target = accepted.load(Ordering::SeqCst);
            while executed.load(Ordering::SeqCst) < target
                && std::time::Instant::now() < deadline
            {
                thread::sleep(ms(1));
            }
            assert_eq!(executed.load(Ordering::SeqCst), target);
            assert_eq!(executor.pending_tasks(), 0);
        }
    }

    #[test]
    fn test_shutdown_with_empty_queue_reports_immediately() {
        let executor = factory().new_single_thread_executor("idle");
        let signalled = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&signalled);
        executor.shutdown(Box::new(move |result| {
            assert!(result.is_ok());
            observed.store(true, Ordering::SeqCst);
        }));

        assert!(signalled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timeout_fires_once_and_completion_never_double_fires() {
        let executor = factory().new_single_thread_executor("watched");
        let timed_out = Arc::new(AtomicUsize::new(0));

        let observed = Arc::clone(&timed_out);
        executor
            .execute_with_timeout(
                Box::new(|| thread::sleep(ms(200))),
                ms(30),
                Box::new(move || {
                    observed.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        thread::sleep(ms(400));
        assert_eq!(timed_out.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fast_completion_suppresses_timeout() {
        let executor = factory().new_single_thread_executor("prompt");
        let timed_out = Arc::new(AtomicBool::new(false));

        let observed = Arc::clone(&timed_out);
        executor
            .execute_with_timeout(
                Box::new(|| {}),
                ms(50),
                Box::new(move || observed.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        thread::sleep(ms(200));
        assert!(!timed_out.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pending_tasks_counts_accepted_work() {
        let executor = factory().new_single_thread_executor("counted");
        let release = Arc::new(Barrier::new(2));

        let held = Arc::clone(&release);
        executor.execute(Box::new(move || {
            held.wait();
        })).unwrap();
        executor.execute(Box::new(|| {})).unwrap();

        // First task blocked on the barrier, second queued behind it
        thread::sleep(ms(50));
        assert_eq!(executor.pending_tasks(), 2);

        release.wait();
        thread::sleep(ms(100));
        assert_eq!(executor.pending_tasks(), 0);
    }
}
