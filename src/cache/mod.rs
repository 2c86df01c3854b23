//! Discovery Cache (§4.2): bounded, TTL'd cache in front of the Registry Store. Concurrent reads
//! are lock-free against each other; any store write invalidates the whole cache.

use moka::sync::Cache;
use std::time::Duration;

/// Keys are query shapes, e.g. `services_all`, `service:<name>`, `health:<id>`.
#[derive(Clone)]
pub struct DiscoveryCache {
    inner: Cache<String, serde_json::Value>,
}

impl DiscoveryCache {
    pub fn new(capacity: usize, ttl_seconds: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity as u64)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();
        Self { inner }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.get(key)
    }

    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.insert(key.into(), value);
    }

    /// Invalidate the entire cache. Called by the store's single writer path on every
    /// register/deregister so a cached response is never more than `ttl_seconds` stale relative
    /// to any given write, and strictly fresher than that in the presence of writes.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

pub const KEY_SERVICES_ALL: &str = "services_all";

pub fn key_service(name: &str) -> String {
    format!("service:{}", name)
}

pub fn key_health(id: &str) -> String {
    format!("health:{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = DiscoveryCache::new(10, 30);
        cache.put(KEY_SERVICES_ALL, serde_json::json!({"aip": ["v1"]}));
        assert_eq!(cache.get(KEY_SERVICES_ALL), Some(serde_json::json!({"aip": ["v1"]})));
    }

    #[test]
    fn invalidate_all_clears_every_key() {
        let cache = DiscoveryCache::new(10, 30);
        cache.put(KEY_SERVICES_ALL, serde_json::json!({}));
        cache.put(key_service("aip"), serde_json::json!([]));
        cache.invalidate_all();
        assert_eq!(cache.get(KEY_SERVICES_ALL), None);
        assert_eq!(cache.get(&key_service("aip")), None);
    }

    #[test]
    fn respects_capacity_bound() {
        let cache = DiscoveryCache::new(2, 30);
        cache.put("a", serde_json::json!(1));
        cache.put("b", serde_json::json!(2));
        cache.put("c", serde_json::json!(3));
        assert!(cache.entry_count() <= 2);
    }
}
