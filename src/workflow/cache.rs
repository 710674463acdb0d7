//! Bounded FIFO cache of compiled workflows

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Insertion-ordered cache. On overflow the entry inserted longest ago is
/// evicted; reads do not refresh an entry's position.
pub struct WorkflowCache<V> {
    inner: Mutex<CacheInner<V>>,
    capacity: usize,
}

struct CacheInner<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> WorkflowCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(key)
            .cloned()
    }

    /// Insert or overwrite. Overwriting keeps the original insertion slot.
    pub fn insert(&self, key: String, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.insert(key.clone(), value).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                tracing::debug!(key = %oldest, "Evicted workflow");
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
