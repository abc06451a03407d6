use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use crate::stacktrace::Stacktrace;

/**
A bounded cache of extracted stack traces, keyed by error identity
(`"<type>:<message>"`).

Extraction is expensive and production error traffic is dominated by a
small set of recurring errors, so hits vastly outnumber misses. Reads
don't promote an entry: at capacity the oldest *inserted* key is
evicted, which keeps the read path on the cheap side of the lock.
Updating an existing key doesn't change its position.

A capacity of `0` disables the cache entirely: every `get` misses and
`set` does nothing.
*/
pub struct StacktraceCache {
    inner: RwLock<Inner>,
    max_size: usize,
}

struct Inner {
    entries: HashMap<String, Arc<Stacktrace>>,
    // Insertion order, oldest first
    order: VecDeque<String>,
}

impl StacktraceCache {
    pub fn new(max_size: usize) -> Self {
        StacktraceCache {
            inner: RwLock::new(Inner {
                entries: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
            }),
            max_size,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Stacktrace>> {
        self.inner.read().unwrap().entries.get(key).cloned()
    }

    pub fn set(&self, key: &str, trace: Arc<Stacktrace>) {
        if self.max_size == 0 {
            return;
        }

        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner.entries.get_mut(key) {
            *existing = trace;
            return;
        }

        if inner.entries.len() >= self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(key.to_owned(), trace);
        inner.order.push_back(key.to_owned());
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();

        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn trace() -> Arc<Stacktrace> {
        Arc::new(Stacktrace::default())
    }

    #[test]
    fn cache_evicts_oldest_inserted() {
        let cache = StacktraceCache::new(3);

        for key in ["k0", "k1", "k2", "k3", "k4"] {
            cache.set(key, trace());
        }

        assert_eq!(3, cache.len());
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_some());
        assert!(cache.get("k3").is_some());
        assert!(cache.get("k4").is_some());
    }

    #[test]
    fn cache_update_keeps_position() {
        let cache = StacktraceCache::new(2);

        cache.set("a", trace());
        cache.set("b", trace());

        // `a` is updated, not re-inserted, so it's still the oldest
        cache.set("a", trace());
        cache.set("c", trace());

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn zero_capacity_disables_the_cache() {
        let cache = StacktraceCache::new(0);

        cache.set("a", trace());

        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_clear_empties_all_entries() {
        let cache = StacktraceCache::new(4);

        cache.set("a", trace());
        cache.set("b", trace());
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());

        // Still usable after a clear
        cache.set("c", trace());
        assert!(cache.get("c").is_some());
    }

    proptest! {
        #[test]
        fn cache_never_exceeds_capacity(
            capacity in 0usize..6,
            keys in proptest::collection::vec("[a-d]{1,2}", 0..32),
        ) {
            let cache = StacktraceCache::new(capacity);

            for key in &keys {
                cache.set(key, trace());
                prop_assert!(cache.len() <= capacity);
            }
        }

        #[test]
        fn key_is_evicted_after_capacity_distinct_inserts(capacity in 1usize..5) {
            let cache = StacktraceCache::new(capacity);

            cache.set("victim", trace());

            for i in 0..capacity {
                cache.set(&format!("k{}", i), trace());
            }

            prop_assert!(cache.get("victim").is_none());
        }
    }
}
