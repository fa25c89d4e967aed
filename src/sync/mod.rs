//! Synchronization primitives exposed through the facade.
//!
//! - Atomic cells with read-modify-write operations that hold under
//!   whatever concurrency the active backend provides
//! - Lock and read-write lock handles whose exclusion contract is
//!   honored by real blocking on the threaded backend and structurally
//!   on the cooperative one

pub mod atomic;
pub mod lock;

// Re-export key types from atomic
pub use atomic::{AtomicFlag, AtomicInt, AtomicLong};

// Re-export key types from lock
pub use lock::{Lock, LockFactory, ReadWriteLock};
