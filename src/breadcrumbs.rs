use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use faultline_core::{Clock, SystemClock, Timestamp};

use crate::event::Breadcrumb;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/**
A fixed-capacity ring of recent breadcrumbs.

Once full, adding overwrites the oldest entry. Reads walk the ring in
insertion order and skip entries older than the configured maximum age,
so a long-idle flush doesn't drag stale context along with it.
*/
pub struct BreadcrumbRing {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

struct Inner {
    items: Vec<Option<Entry>>,
    head: usize,
    tail: usize,
    size: usize,
    max_age: Duration,
}

#[derive(Clone)]
struct Entry {
    crumb: Breadcrumb,
    added_at: Timestamp,
}

impl BreadcrumbRing {
    pub fn new(max_size: usize) -> Self {
        Self::with_clock(max_size, Arc::new(SystemClock))
    }

    pub fn with_clock(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        let max_size = max_size.max(1);

        BreadcrumbRing {
            inner: RwLock::new(Inner {
                items: (0..max_size).map(|_| None).collect(),
                head: 0,
                tail: 0,
                size: 0,
                max_age: DEFAULT_MAX_AGE,
            }),
            clock,
        }
    }

    /**
    Add a breadcrumb, returning `true` if it displaced an older one.
    */
    pub fn add(&self, crumb: Breadcrumb) -> bool {
        let entry = Entry {
            crumb,
            added_at: self.clock.now(),
        };

        let mut inner = self.inner.write().unwrap();
        let capacity = inner.items.len();

        if inner.size < capacity {
            let tail = inner.tail;
            inner.items[tail] = Some(entry);
            inner.tail = (tail + 1) % capacity;
            inner.size += 1;

            false
        } else {
            let head = inner.head;
            inner.items[head] = Some(entry);
            inner.head = (head + 1) % capacity;
            inner.tail = (inner.tail + 1) % capacity;

            true
        }
    }

    /**
    Copy out the current breadcrumbs, oldest first, skipping any older
    than the maximum age.

    The returned sequence is independent of the ring; later additions
    don't show through.
    */
    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        let inner = self.inner.read().unwrap();

        if inner.size == 0 {
            return Vec::new();
        }

        let cutoff = self.clock.now().checked_sub(inner.max_age);
        let capacity = inner.items.len();

        let mut crumbs = Vec::with_capacity(inner.size);
        for i in 0..inner.size {
            let idx = (inner.head + i) % capacity;
            let Some(entry) = &inner.items[idx] else {
                continue;
            };

            if let Some(cutoff) = cutoff {
                if entry.added_at < cutoff {
                    continue;
                }
            }

            crumbs.push(entry.crumb.clone());
        }

        crumbs
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();

        inner.head = 0;
        inner.tail = 0;
        inner.size = 0;
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.inner.write().unwrap().max_age = max_age;
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OutboundLevel;
    use faultline_core::ManualClock;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn crumb(message: &str) -> Breadcrumb {
        Breadcrumb {
            category: "debug".to_owned(),
            level: OutboundLevel::Debug,
            message: message.to_owned(),
            data: BTreeMap::new(),
            timestamp: Timestamp::new(Duration::from_secs(0)),
        }
    }

    fn messages(ring: &BreadcrumbRing) -> Vec<String> {
        ring.snapshot().into_iter().map(|c| c.message).collect()
    }

    #[test]
    fn ring_overwrites_oldest_at_capacity() {
        let ring = BreadcrumbRing::new(3);

        for message in ["a", "b", "c", "d", "e"] {
            ring.add(crumb(message));
        }

        assert_eq!(vec!["c", "d", "e"], messages(&ring));
        assert_eq!(3, ring.len());
    }

    #[test]
    fn ring_reports_displacement() {
        let ring = BreadcrumbRing::new(2);

        assert!(!ring.add(crumb("a")));
        assert!(!ring.add(crumb("b")));
        assert!(ring.add(crumb("c")));
    }

    #[test]
    fn ring_skips_expired_entries() {
        let clock = Arc::new(ManualClock::new(Timestamp::new(Duration::from_secs(1_000))));
        let ring = BreadcrumbRing::with_clock(10, clock.clone());
        ring.set_max_age(Duration::from_millis(100));

        ring.add(crumb("old"));
        clock.advance(Duration::from_millis(150));
        ring.add(crumb("new"));

        assert_eq!(vec!["new"], messages(&ring));
    }

    #[test]
    fn ring_clear_resets_but_keeps_capacity() {
        let ring = BreadcrumbRing::new(3);

        ring.add(crumb("a"));
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(Vec::<String>::new(), messages(&ring));

        ring.add(crumb("b"));
        assert_eq!(vec!["b"], messages(&ring));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let ring = BreadcrumbRing::new(0);

        ring.add(crumb("only"));
        ring.add(crumb("newer"));

        assert_eq!(vec!["newer"], messages(&ring));
    }

    proptest! {
        #[test]
        fn ring_is_bounded_and_ordered(
            capacity in 1usize..8,
            count in 0usize..32,
        ) {
            let ring = BreadcrumbRing::new(capacity);

            for i in 0..count {
                ring.add(crumb(&i.to_string()));
            }

            let snapshot = messages(&ring);

            prop_assert!(snapshot.len() <= capacity);
            prop_assert!(ring.len() <= capacity);

            // The snapshot is the most recent `capacity` additions in order
            let expected = (count.saturating_sub(capacity)..count)
                .map(|i| i.to_string())
                .collect::<Vec<_>>();
            prop_assert_eq!(expected, snapshot);
        }
    }
}
