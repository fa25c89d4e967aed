//! Atomic cell types shared by every backend.
//!
//! Each cell owns exactly one scalar and exposes read-modify-write
//! operations that are indivisible relative to whatever concurrency the
//! active backend actually provides. Under the threaded backend that is
//! hardware atomicity; under the cooperative backend the same types are
//! trivially atomic because no two operations can interleave.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

/// An atomically mutable boolean cell.
#[derive(Debug)]
pub struct AtomicFlag {
    /// The wrapped value
    value: AtomicBool,
}

impl AtomicFlag {
    /// Create a new flag holding `initial`.
    pub fn new(initial: bool) -> Self {
        Self {
            value: AtomicBool::new(initial),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// Set the value unconditionally.
    pub fn set(&self, new_value: bool) {
        self.value.store(new_value, Ordering::SeqCst);
    }

    /// Replace the value and return the previous one.
    pub fn get_and_set(&self, new_value: bool) -> bool {
        self.value.swap(new_value, Ordering::SeqCst)
    }

    /// Replace the value with `update` iff it currently equals `expected`.
    ///
    /// Returns true when the replacement happened; on false the value is
    /// unchanged.
    pub fn compare_and_set(&self, expected: bool, update: bool) -> bool {
        self.value
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// An atomically mutable 32-bit integer cell.
#[derive(Debug)]
pub struct AtomicInt {
    /// The wrapped value
    value: AtomicI32,
}

impl AtomicInt {
    /// Create a new cell holding `initial`.
    pub fn new(initial: i32) -> Self {
        Self {
            value: AtomicI32::new(initial),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Set the value unconditionally.
    pub fn set(&self, new_value: i32) {
        self.value.store(new_value, Ordering::SeqCst);
    }

    /// Replace the value and return the previous one.
    pub fn get_and_set(&self, new_value: i32) -> i32 {
        self.value.swap(new_value, Ordering::SeqCst)
    }

    /// Replace the value with `update` iff it currently equals `expected`.
    pub fn compare_and_set(&self, expected: i32, update: i32) -> bool {
        self.value
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Add one and return the new value.
    pub fn increment_and_get(&self) -> i32 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Subtract one and return the new value.
    pub fn decrement_and_get(&self) -> i32 {
        self.value.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

impl Default for AtomicInt {
    fn default() -> Self {
        Self::new(0)
    }
}

/// An atomically mutable 64-bit integer cell.
#[derive(Debug)]
pub struct AtomicLong {
    /// The wrapped value
    value: AtomicI64,
}

impl AtomicLong {
    /// Create a new cell holding `initial`.
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Set the value unconditionally.
    pub fn set(&self, new_value: i64) {
        self.value.store(new_value, Ordering::SeqCst);
    }

    /// Replace the value and return the previous one.
    pub fn get_and_set(&self, new_value: i64) -> i64 {
        self.value.swap(new_value, Ordering::SeqCst)
    }

    /// Replace the value with `update` iff it currently equals `expected`.
    pub fn compare_and_set(&self, expected: i64, update: i64) -> bool {
        self.value
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Add one and return the new value.
    pub fn increment_and_get(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Subtract one and return the new value.
    pub fn decrement_and_get(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

impl Default for AtomicLong {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_flag_basic() {
        let flag = AtomicFlag::new(false);

        assert!(!flag.get());
        flag.set(true);
        assert!(flag.get());
        assert!(flag.get_and_set(false)); // Returns old value
        assert!(!flag.get());
    }

    #[test]
    fn test_flag_compare_and_set() {
        let flag = AtomicFlag::new(false);

        assert!(flag.compare_and_set(false, true));
        assert!(flag.get());

        // Expected no longer matches, value untouched
        assert!(!flag.compare_and_set(false, false));
        assert!(flag.get());
    }

    #[test]
    fn test_flag_single_winner() {
        let flag = Arc::new(AtomicFlag::new(false));
        let wins = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let flag = Arc::clone(&flag);
            let wins = Arc::clone(&wins);
            handles.push(thread::spawn(move || {
                if flag.compare_and_set(false, true) {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one thread observed the expected value
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(flag.get());
    }

    #[test]
    fn test_int_increment_decrement() {
        let cell = AtomicInt::new(5);

        assert_eq!(cell.increment_and_get(), 6);
        assert_eq!(cell.increment_and_get(), 7);
        assert_eq!(cell.decrement_and_get(), 6);
        assert_eq!(cell.get(), 6);
    }

    #[test]
    fn test_int_get_and_set() {
        let cell = AtomicInt::new(1);

        assert_eq!(cell.get_and_set(9), 1);
        assert_eq!(cell.get(), 9);
    }

    #[test]
    fn test_int_compare_and_set() {
        let cell = AtomicInt::new(10);

        assert!(cell.compare_and_set(10, 20));
        assert_eq!(cell.get(), 20);
        assert!(!cell.compare_and_set(10, 30));
        assert_eq!(cell.get(), 20);
    }

    #[test]
    fn test_int_threads() {
        let cell = Arc::new(AtomicInt::new(0));
        let threads = 10;
        let per_thread = 1000;

        let mut handles = vec![];
        for _ in 0..threads {
            let cell = Arc::clone(&cell);
            handles.push(thread::spawn(move || {
                for _ in 0..per_thread {
                    cell.increment_and_get();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cell.get(), threads * per_thread);
    }

    #[test]
    fn test_long_basic() {
        let cell = AtomicLong::new(1 << 40);

        assert_eq!(cell.increment_and_get(), (1 << 40) + 1);
        assert_eq!(cell.decrement_and_get(), 1 << 40);
        assert!(cell.compare_and_set(1 << 40, -1));
        assert_eq!(cell.get_and_set(0), -1);
        assert_eq!(cell.get(), 0);
    }
}
