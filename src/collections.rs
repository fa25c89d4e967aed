//! Thread-safe container wrappers.
//!
//! Every container guards its backing collection with a lock, so
//! concurrent mutation from multiple executors can never corrupt the
//! structure or lose an update, whatever concurrency the backend
//! exposes. Iteration is snapshot-based: `snapshot` clones the contents
//! under the lock, so an observer never sees a half-applied update and
//! mutation during observation is always safe. The same implementations
//! serve both backends; under the cooperative one the locks are simply
//! never contended.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// A FIFO queue safe for concurrent mutation.
#[derive(Debug, Default)]
pub struct ConcurrentQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> ConcurrentQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item at the tail.
    pub fn push(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    /// Remove and return the head item, if any.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: Clone> ConcurrentQueue<T> {
    /// Clone the current contents in FIFO order.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().iter().cloned().collect()
    }
}

/// A growable list safe for concurrent mutation.
#[derive(Debug, Default)]
pub struct ConcurrentList<T> {
    inner: Mutex<Vec<T>>,
}

impl<T> ConcurrentList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.inner.lock().push(item);
    }

    /// Remove and return the item at `index`, if in bounds.
    pub fn remove(&self, index: usize) -> Option<T> {
        let mut inner = self.inner.lock();
        if index < inner.len() {
            Some(inner.remove(index))
        } else {
            None
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: Clone> ConcurrentList<T> {
    /// Clone of the item at `index`, if in bounds.
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.lock().get(index).cloned()
    }

    /// Clone the current contents in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().clone()
    }
}

/// A hash set safe for concurrent mutation.
#[derive(Debug, Default)]
pub struct ConcurrentSet<T: Eq + Hash> {
    inner: Mutex<HashSet<T>>,
}

impl<T: Eq + Hash> ConcurrentSet<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashSet::new()),
        }
    }

    /// Insert an item; returns false when it was already present.
    pub fn insert(&self, item: T) -> bool {
        self.inner.lock().insert(item)
    }

    /// Remove an item; returns true when it was present.
    pub fn remove(&self, item: &T) -> bool {
        self.inner.lock().remove(item)
    }

    /// Whether the set contains `item`.
    pub fn contains(&self, item: &T) -> bool {
        self.inner.lock().contains(item)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: Eq + Hash + Clone> ConcurrentSet<T> {
    /// Clone the current contents in arbitrary order.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().iter().cloned().collect()
    }
}

/// A hash map safe for concurrent mutation.
#[derive(Debug, Default)]
pub struct ConcurrentMap<K: Eq + Hash, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> ConcurrentMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a key-value pair, returning the previous value for the key.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Remove a key, returning its value when present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.write().remove(key)
    }

    /// Whether the map contains `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> ConcurrentMap<K, V> {
    /// Clone of the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentMap<K, V> {
    /// Clone the current entries in arbitrary order.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Factory for the thread-safe containers.
///
/// Element types are parametric; no runtime type token is required.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionFactory;

impl CollectionFactory {
    /// Create an empty thread-safe queue.
    pub fn new_queue<T>(&self) -> ConcurrentQueue<T> {
        ConcurrentQueue::new()
    }

    /// Create an empty thread-safe list.
    pub fn new_list<T>(&self) -> ConcurrentList<T> {
        ConcurrentList::new()
    }

    /// Create an empty thread-safe set.
    pub fn new_set<T: Eq + Hash>(&self) -> ConcurrentSet<T> {
        ConcurrentSet::new()
    }

    /// Create an empty thread-safe map.
    pub fn new_map<K: Eq + Hash, V>(&self) -> ConcurrentMap<K, V> {
        ConcurrentMap::new()
    }
}
