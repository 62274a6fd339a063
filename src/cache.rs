use dashmap::{DashMap, mapref::entry::Entry};
use std::{
    hash::Hash,
    time::{Duration, Instant},
};

/// Remembers keys for a fixed window. Used to drop log notifications for
/// signatures that were already handled.
#[derive(Debug)]
pub struct SeenCache<K>
where
    K: Eq + Hash,
{
    inner: DashMap<K, Instant>,
    ttl: Duration,
}

impl<K> SeenCache<K>
where
    K: Eq + Hash,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            ttl,
        }
    }

    /// Marks `key` as seen. Returns `true` only for the first sighting inside the window.
    pub fn first_sighting(&self, key: K) -> bool {
        let now = Instant::now();
        match self.inner.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.ttl {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        let ttl = self.ttl;
        self.inner.retain(|_, seen| seen.elapsed() < ttl);
        before - self.inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
