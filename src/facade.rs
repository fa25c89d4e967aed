//! The concurrency facade.
//!
//! A [`Concurrency`] value is the single handle application code holds
//! onto: it hands out executors, timers, locks, atomic cells, and
//! thread-safe containers, all backed by whichever backend it was
//! constructed over. Code written against the facade runs unchanged on
//! either backend.

use crate::collections::CollectionFactory;
use crate::config::ConcurrencyConfig;
use crate::executor::{CooperativeExecutorFactory, ExecutorFactory, ThreadedExecutorFactory};
use crate::schedule::ScheduleHost;
use crate::sync::atomic::{AtomicFlag, AtomicInt, AtomicLong};
use crate::sync::lock::{
    CooperativeLockFactory, Lock, LockFactory, ReadWriteLock, ThreadedLockFactory,
};
use crate::timer::{CooperativeTimerFactory, TimerFactory, WheelTimerFactory};
use log::debug;
use std::sync::Arc;

/// Backend-neutral entry point to every concurrency capability.
#[derive(Clone)]
pub struct Concurrency {
    /// Executor construction, per backend
    executors: Arc<dyn ExecutorFactory>,

    /// Delayed and repeating callbacks, per backend
    timers: Arc<dyn TimerFactory>,

    /// Mutual exclusion handles, per backend
    locks: Arc<dyn LockFactory>,
}

impl Concurrency {
    /// Build a facade over real OS threads.
    pub fn threaded(config: &ConcurrencyConfig) -> Self {
        debug!(
            "building threaded concurrency facade (prefix '{}')",
            config.thread_name_prefix
        );
        let timers: Arc<dyn TimerFactory> =
            Arc::new(WheelTimerFactory::new(&config.thread_name_prefix));
        Self {
            executors: Arc::new(ThreadedExecutorFactory::new(
                Arc::clone(&timers),
                config.thread_name_prefix.clone(),
            )),
            timers,
            locks: Arc::new(ThreadedLockFactory),
        }
    }

    /// Build a facade over a single logical context driven by `host`.
    pub fn cooperative(host: Arc<dyn ScheduleHost>) -> Self {
        debug!("building cooperative concurrency facade");
        let timers: Arc<dyn TimerFactory> =
            Arc::new(CooperativeTimerFactory::new(Arc::clone(&host)));
        Self {
            executors: Arc::new(CooperativeExecutorFactory::new(host, Arc::clone(&timers))),
            timers,
            locks: Arc::new(CooperativeLockFactory),
        }
    }

    /// The backend's executor factory.
    pub fn new_executor(&self) -> Arc<dyn ExecutorFactory> {
        Arc::clone(&self.executors)
    }

    /// The backend's timer factory.
    pub fn new_timer(&self) -> Arc<dyn TimerFactory> {
        Arc::clone(&self.timers)
    }

    /// A fresh mutual-exclusion lock.
    pub fn new_lock(&self) -> Arc<dyn Lock> {
        self.locks.new_lock()
    }

    /// A fresh read-write lock pair.
    pub fn new_read_write_lock(&self) -> ReadWriteLock {
        self.locks.new_read_write_lock()
    }

    /// A boolean atomic cell.
    pub fn new_atomic_flag(&self, initial: bool) -> AtomicFlag {
        AtomicFlag::new(initial)
    }

    /// A 32-bit integer atomic cell.
    pub fn new_atomic_int(&self, initial: i32) -> AtomicInt {
        AtomicInt::new(initial)
    }

    /// A 64-bit integer atomic cell.
    pub fn new_atomic_long(&self, initial: i64) -> AtomicLong {
        AtomicLong::new(initial)
    }

    /// Factory for thread-safe containers.
    pub fn new_collections(&self) -> CollectionFactory {
        CollectionFactory
    }
}
