//! A bounded, TTL'd set of recently-seen CIDs, used to dedup announce gossip
//! so the same board update isn't replayed/forwarded indefinitely.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use boardmesh_types::Cid;

struct Entry {
    cid: Cid,
    inserted_at: Instant,
}

struct Inner {
    order: VecDeque<Entry>,
    members: HashSet<Cid>,
}

/// Bounded by `capacity` entries and `ttl` age; insertion evicts expired
/// entries first, then the oldest surviving entry if still over capacity.
pub struct RecentCidSet {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl RecentCidSet {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                members: HashSet::new(),
            }),
        }
    }

    /// Returns `true` if `cid` was newly inserted (i.e. this announce should
    /// be processed), `false` if it's a dup seen within the TTL window.
    pub fn insert(&self, cid: Cid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.evict_expired(&mut inner);

        if inner.members.contains(&cid) {
            return false;
        }

        while inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.members.remove(&evicted.cid);
            } else {
                break;
            }
        }

        inner.members.insert(cid.clone());
        inner.order.push_back(Entry {
            cid,
            inserted_at: Instant::now(),
        });
        true
    }

    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        self.evict_expired(&mut inner);
        inner.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, inner: &mut Inner) {
        while let Some(front) = inner.order.front() {
            if front.inserted_at.elapsed() > self.ttl {
                let evicted = inner.order.pop_front().unwrap();
                inner.members.remove(&evicted.cid);
            } else {
                break;
            }
        }
    }
}
