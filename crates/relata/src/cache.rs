//! Model cache collaborator.
//!
//! When a cache is installed, `refresh` reads through it before asking the
//! driver, persisted changes write through to it, and deletes invalidate the
//! entry. Keys are `"{type}.{id}"`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use relata_core::Row;

/// Key-value store for model values.
pub trait ModelCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Row>;

    /// Stores `values`, expiring after `ttl` when given.
    fn set(&self, key: &str, values: &Row, ttl: Option<Duration>);

    fn delete(&self, key: &str);
}

/// An in-process [`ModelCache`] with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Row, Option<Instant>)>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Row> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let fresh = match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((row, _)) => Some(row.clone()),
            None => None,
        };
        let counter = if fresh.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    fn set(&self, key: &str, values: &Row, ttl: Option<Duration>) {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (values.clone(), expires));
    }

    fn delete(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relata_core::row;

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new();
        assert!(cache.get("Person.1").is_none());
        cache.set("Person.1", &row! { "name" => "Ada" }, None);
        assert_eq!(cache.get("Person.1"), Some(row! { "name" => "Ada" }));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        cache.delete("Person.1");
        assert!(!cache.contains("Person.1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        cache.set("Person.1", &row! { "name" => "Ada" }, Some(Duration::ZERO));
        assert!(cache.get("Person.1").is_none());
        assert!(!cache.contains("Person.1"));

        cache.set("Person.2", &row! { "name" => "Bob" }, Some(Duration::from_secs(60)));
        assert!(cache.get("Person.2").is_some());
    }
}
