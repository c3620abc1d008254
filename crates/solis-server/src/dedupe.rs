//! Bounded TTL cache for webhook deduplication.
//!
//! Keyed by gateway message id; entries live for an hour. Once the map hits
//! its cap, expired entries are swept and, if that is not enough, the oldest
//! entries go too.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

const MAX_ENTRIES: usize = 8192;

pub struct DedupeCache {
    seen: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl DedupeCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            seen: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Record `id`; returns `true` when it was seen within the TTL already.
    pub fn check_and_insert(&self, id: &str) -> bool {
        let now = Utc::now();

        if let Some(at) = self.seen.get(id) {
            if now.signed_duration_since(*at) < self.ttl {
                return true;
            }
        }

        if self.seen.len() >= MAX_ENTRIES {
            self.evict(now);
        }
        self.seen.insert(id.to_string(), now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&self, now: DateTime<Utc>) {
        self.seen
            .retain(|_, at| now.signed_duration_since(*at) < self.ttl);
        // Still full of live entries: drop the oldest half.
        if self.seen.len() >= MAX_ENTRIES {
            let mut entries: Vec<(String, DateTime<Utc>)> = self
                .seen
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect();
            entries.sort_by_key(|(_, at)| *at);
            for (key, _) in entries.into_iter().take(MAX_ENTRIES / 2) {
                self.seen.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sighting_is_a_duplicate() {
        let cache = DedupeCache::new(3600);
        assert!(!cache.check_and_insert("MSG1"));
        assert!(cache.check_and_insert("MSG1"));
        assert!(!cache.check_and_insert("MSG2"));
    }

    #[test]
    fn expired_entries_are_not_duplicates() {
        let cache = DedupeCache::new(0);
        assert!(!cache.check_and_insert("MSG1"));
        // TTL of zero: immediately stale.
        assert!(!cache.check_and_insert("MSG1"));
    }

    #[test]
    fn cache_stays_bounded() {
        let cache = DedupeCache::new(3600);
        for i in 0..(MAX_ENTRIES + 100) {
            cache.check_and_insert(&format!("m{i}"));
        }
        assert!(cache.len() <= MAX_ENTRIES + 1);
    }
}
