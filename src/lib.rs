#![deny(warnings)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Tandem
//!
//! A portable concurrency facade with two interchangeable backends:
//!
//! - **Threaded**: worker-pool executors, a timer wheel on a dedicated
//!   thread, and real blocking locks over OS threads.
//! - **Cooperative**: a single logical context driven by a host event
//!   loop, where async work is deferred to later scheduling turns and
//!   locks degenerate to structurally uncontended no-ops.
//!
//! Application code talks to [`Concurrency`] and the factory traits it
//! hands out; which backend sits underneath is decided once, at
//! construction time, by the [`selector`] from declarative
//! configuration ([`config`]).

/// Thread-safe queue, list, set, and map containers
pub mod collections;

/// Declarative backend configuration
pub mod config;

/// Task execution strategies and their factories
pub mod executor;

/// The backend-neutral facade
pub mod facade;

/// Host scheduling capabilities and a deterministic step scheduler
pub mod schedule;

/// Backend providers and priority-ordered selection
pub mod selector;

/// Atomic cells and explicit lock handles
pub mod sync;

/// Delayed and repeating callbacks
pub mod timer;

// Re-export key types for easier access
pub use config::{BackendKind, ConcurrencyConfig};
pub use executor::{Executor, ExecutorError, ExecutorFactory, Task};
pub use facade::Concurrency;
pub use schedule::{ScheduleHost, StepScheduler};
pub use selector::{select_backend, BackendProvider, Dependencies, SelectorError};
pub use sync::{AtomicFlag, AtomicInt, AtomicLong, Lock, LockFactory, ReadWriteLock};
pub use timer::{RepeatingTask, TimerFactory, TimerHandle};
