//! Mutual-exclusion handles honored by both backends.
//!
//! The contract is the same everywhere: sections guarded by the same
//! lock instance never execute concurrently with each other. The
//! threaded backend enforces it with real blocking acquisition; the
//! cooperative backend satisfies it structurally because only one
//! logical execution context ever runs, so its locks degenerate to
//! no-ops. Callers cannot observe the difference through this API.
//!
//! Hold state is tracked per logical execution context (a process-local
//! id handed to each thread), not per OS thread identity.

use log::warn;
use parking_lot::lock_api::{RawMutex as _, RawRwLock as _};
use parking_lot::{RawMutex, RawRwLock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A mutual-exclusion handle with explicit acquire and release.
///
/// `lock` blocks until acquired on backends capable of blocking and is
/// a no-op where contention is structurally impossible. Releasing a
/// lock the current context does not hold is logged and ignored.
pub trait Lock: Send + Sync {
    /// Acquire the lock, blocking if another context holds it.
    fn lock(&self);

    /// Release the lock.
    fn unlock(&self);

    /// Whether the current logical execution context holds this lock.
    fn is_held_by_current_thread(&self) -> bool;
}

/// Independent read and write acquisition handles over one exclusion
/// region.
///
/// A backend without true reader/writer contention may alias both
/// halves to a single handle.
pub struct ReadWriteLock {
    /// Shared-acquisition half
    read: Arc<dyn Lock>,

    /// Exclusive-acquisition half
    write: Arc<dyn Lock>,
}

impl ReadWriteLock {
    /// Build a pair from its two halves.
    pub(crate) fn new(read: Arc<dyn Lock>, write: Arc<dyn Lock>) -> Self {
        Self { read, write }
    }

    /// The shared (read) acquisition handle.
    pub fn read(&self) -> &Arc<dyn Lock> {
        &self.read
    }

    /// The exclusive (write) acquisition handle.
    pub fn write(&self) -> &Arc<dyn Lock> {
        &self.write
    }
}

/// Backend-bound factory for lock handles.
pub trait LockFactory: Send + Sync {
    /// Create a new mutual-exclusion handle.
    fn new_lock(&self) -> Arc<dyn Lock>;

    /// Create a new read-write lock pair.
    fn new_read_write_lock(&self) -> ReadWriteLock;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_ID: u64 = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);

    // Read-side hold counts for this context, keyed by lock id
    static READ_HOLDS: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

/// Id of the calling logical execution context.
pub(crate) fn current_context_id() -> u64 {
    CONTEXT_ID.with(|id| *id)
}

/// Blocking, reentrant mutual exclusion for the threaded backend.
struct ThreadedLock {
    /// The underlying raw mutex
    raw: RawMutex,

    /// Context id of the holder, 0 when unheld
    owner: AtomicU64,

    /// Reentrant acquisition depth, touched only by the holder
    depth: AtomicUsize,
}

impl ThreadedLock {
    fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        }
    }
}

impl Lock for ThreadedLock {
    fn lock(&self) {
        let me = current_context_id();
        if self.owner.load(Ordering::SeqCst) == me {
            self.depth.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.raw.lock();
        self.owner.store(me, Ordering::SeqCst);
        self.depth.store(1, Ordering::SeqCst);
    }

    fn unlock(&self) {
        let me = current_context_id();
        if self.owner.load(Ordering::SeqCst) != me {
            warn!("unlock of a lock not held by context {}", me);
            return;
        }
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.owner.store(0, Ordering::SeqCst);
            // Owner verified above; releasing is sound
            unsafe { self.raw.unlock() };
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == current_context_id()
    }
}

/// State shared by the two halves of a threaded read-write lock.
struct RwShared {
    /// The underlying raw read-write lock
    raw: RawRwLock,

    /// Identity for per-context read-hold bookkeeping
    id: u64,
}

/// Shared-acquisition half of a threaded read-write lock.
struct ThreadedReadHalf {
    shared: Arc<RwShared>,
}

impl Lock for ThreadedReadHalf {
    fn lock(&self) {
        self.shared.raw.lock_shared();
        READ_HOLDS.with(|holds| {
            *holds.borrow_mut().entry(self.shared.id).or_insert(0) += 1;
        });
    }

    fn unlock(&self) {
        let held = READ_HOLDS.with(|holds| {
            let mut holds = holds.borrow_mut();
            match holds.get_mut(&self.shared.id) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        holds.remove(&self.shared.id);
                    }
                    true
                }
                _ => false,
            }
        });
        if held {
            // This context held a shared acquisition; releasing is sound
            unsafe { self.shared.raw.unlock_shared() };
        } else {
            warn!(
                "read unlock of a lock not held by context {}",
                current_context_id()
            );
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        READ_HOLDS.with(|holds| holds.borrow().get(&self.shared.id).copied().unwrap_or(0) > 0)
    }
}

/// Exclusive-acquisition half of a threaded read-write lock.
struct ThreadedWriteHalf {
    shared: Arc<RwShared>,

    /// Context id of the writer, 0 when unheld
    owner: AtomicU64,

    /// Reentrant acquisition depth, touched only by the holder
    depth: AtomicUsize,
}

impl Lock for ThreadedWriteHalf {
    fn lock(&self) {
        let me = current_context_id();
        if self.owner.load(Ordering::SeqCst) == me {
            self.depth.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.shared.raw.lock_exclusive();
        self.owner.store(me, Ordering::SeqCst);
        self.depth.store(1, Ordering::SeqCst);
    }

    fn unlock(&self) {
        let me = current_context_id();
        if self.owner.load(Ordering::SeqCst) != me {
            warn!("write unlock of a lock not held by context {}", me);
            return;
        }
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.owner.store(0, Ordering::SeqCst);
            // Owner verified above; releasing is sound
            unsafe { self.shared.raw.unlock_exclusive() };
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::SeqCst) == current_context_id()
    }
}

/// Lock factory for the threaded backend.
pub(crate) struct ThreadedLockFactory;

impl LockFactory for ThreadedLockFactory {
    fn new_lock(&self) -> Arc<dyn Lock> {
        Arc::new(ThreadedLock::new())
    }

    fn new_read_write_lock(&self) -> ReadWriteLock {
        let shared = Arc::new(RwShared {
            raw: RawRwLock::INIT,
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
        });
        let read = Arc::new(ThreadedReadHalf {
            shared: Arc::clone(&shared),
        });
        let write = Arc::new(ThreadedWriteHalf {
            shared,
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        });
        ReadWriteLock::new(read, write)
    }
}

/// No-op lock for the cooperative backend.
///
/// With exactly one logical execution context, contention is
/// structurally impossible: acquisition and release do nothing, and the
/// single context trivially holds every lock it defines.
struct CooperativeLock;

impl Lock for CooperativeLock {
    fn lock(&self) {}

    fn unlock(&self) {}

    fn is_held_by_current_thread(&self) -> bool {
        true
    }
}

/// Lock factory for the cooperative backend.
pub(crate) struct CooperativeLockFactory;

impl LockFactory for CooperativeLockFactory {
    fn new_lock(&self) -> Arc<dyn Lock> {
        Arc::new(CooperativeLock)
    }

    fn new_read_write_lock(&self) -> ReadWriteLock {
        // No reader/writer contention exists; both halves alias one handle
        let handle: Arc<dyn Lock> = Arc::new(CooperativeLock);
        ReadWriteLock::new(Arc::clone(&handle), handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_threaded_lock_held_state() {
        let factory = ThreadedLockFactory;
        let lock = factory.new_lock();

        assert!(!lock.is_held_by_current_thread());
        lock.lock();
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn test_threaded_lock_reentrant() {
        let factory = ThreadedLockFactory;
        let lock = factory.new_lock();

        lock.lock();
        lock.lock();
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
        // Still held until the outermost release
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn test_threaded_lock_unlock_not_held() {
        let factory = ThreadedLockFactory;
        let lock = factory.new_lock();

        // Logged and ignored, must not panic or poison anything
        lock.unlock();
        lock.lock();
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
    }

    #[test]
    fn test_threaded_lock_exclusion() {
        let factory = ThreadedLockFactory;
        let lock = factory.new_lock();
        let value = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let value = Arc::clone(&value);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    lock.lock();
                    // Non-atomic read-modify-write guarded by the lock
                    let current = value.load(Ordering::Relaxed);
                    thread::yield_now();
                    value.store(current + 1, Ordering::Relaxed);
                    lock.unlock();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(value.load(Ordering::Relaxed), 800);
    }

    #[test]
    fn test_threaded_rwlock_halves() {
        let factory = ThreadedLockFactory;
        let rw = factory.new_read_write_lock();

        rw.read().lock();
        assert!(rw.read().is_held_by_current_thread());
        assert!(!rw.write().is_held_by_current_thread());
        rw.read().unlock();
        assert!(!rw.read().is_held_by_current_thread());

        rw.write().lock();
        assert!(rw.write().is_held_by_current_thread());
        rw.write().unlock();
        assert!(!rw.write().is_held_by_current_thread());
    }

    #[test]
    fn test_threaded_rwlock_writer_excluded_by_reader() {
        let factory = ThreadedLockFactory;
        let rw = Arc::new(factory.new_read_write_lock());
        let write_entered = Arc::new(AtomicBool::new(false));

        rw.read().lock();

        let writer = {
            let rw = Arc::clone(&rw);
            let write_entered = Arc::clone(&write_entered);
            thread::spawn(move || {
                rw.write().lock();
                write_entered.store(true, Ordering::SeqCst);
                rw.write().unlock();
            })
        };

        // Writer must stay blocked while the read half is held
        thread::sleep(Duration::from_millis(50));
        assert!(!write_entered.load(Ordering::SeqCst));

        rw.read().unlock();
        writer.join().unwrap();
        assert!(write_entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cooperative_lock_is_noop() {
        let factory = CooperativeLockFactory;
        let lock = factory.new_lock();

        assert!(lock.is_held_by_current_thread());
        lock.lock();
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
        assert!(lock.is_held_by_current_thread());

        let rw = factory.new_read_write_lock();
        rw.read().lock();
        rw.write().lock();
        assert!(rw.read().is_held_by_current_thread());
        assert!(rw.write().is_held_by_current_thread());
        rw.write().unlock();
        rw.read().unlock();
    }
}
