use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Bounded window of recently seen keys. Once full, the least recently seen
/// key is forgotten, so a redelivery older than `capacity` distinct keys is
/// treated as new.
pub struct DedupeWindow<K> {
    seen: LruCache<K, ()>,
}

impl<K> DedupeWindow<K>
where
    K: Hash + Eq,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Record `key`, returning `true` the first time it is seen
    pub fn first_seen(&mut self, key: K) -> bool {
        if self.seen.get(&key).is_some() {
            return false;
        }
        self.seen.put(key, ());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
