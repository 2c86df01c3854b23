//! Registry Store (§4.1): key/value abstraction over an in-memory map plus an optional durable
//! backend. The store is the sole owner of `ServiceInstance` records.

mod backend;

pub use backend::{DurableBackend, NullBackend, RedisBackend};

use crate::config::{BackendConfig, BackendKind};
use crate::types::{AppError, AppResult, ServiceInstance};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct RegistryStore {
    instances: Arc<RwLock<HashMap<String, ServiceInstance>>>,
    name_index: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    backend: Arc<dyn DurableBackend>,
    degraded: Arc<AtomicBool>,
}

impl RegistryStore {
    /// On startup, if a durable backend is configured, scan it to restore all instances into
    /// memory before serving traffic.
    pub async fn new(config: &BackendConfig) -> AppResult<Self> {
        let backend: Arc<dyn DurableBackend> = match config.kind {
            BackendKind::Memory => Arc::new(NullBackend::default()),
            BackendKind::Redis => Arc::new(RedisBackend::connect(config).await?),
        };

        let store = Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            name_index: Arc::new(RwLock::new(HashMap::new())),
            backend,
            degraded: Arc::new(AtomicBool::new(false)),
        };

        match store.backend.scan_all().await {
            Ok(restored) => {
                let mut instances = store.instances.write().await;
                let mut name_index = store.name_index.write().await;
                for instance in restored {
                    name_index.entry(instance.name.clone()).or_default().insert(instance.id.clone());
                    instances.insert(instance.id.clone(), instance);
                }
                tracing::info!("restored {} instances from durable backend", instances.len());
            }
            Err(e) if config.kind == BackendKind::Redis => {
                tracing::warn!("durable backend scan failed at startup, starting degraded: {}", e);
                store.degraded.store(true, Ordering::Relaxed);
            }
            Err(_) => {}
        }

        Ok(store)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Write record; pipelined write-through to the durable backend when configured. Backend
    /// errors on write are retried once with jittered backoff, then surfaced as degraded without
    /// failing the caller (§4.1, §7).
    pub async fn upsert(&self, instance: ServiceInstance) -> AppResult<()> {
        {
            let mut instances = self.instances.write().await;
            let mut name_index = self.name_index.write().await;

            if let Some(previous) = instances.get(&instance.id) {
                if previous.name != instance.name {
                    if let Some(ids) = name_index.get_mut(&previous.name) {
                        ids.remove(&instance.id);
                    }
                }
            }
            name_index.entry(instance.name.clone()).or_default().insert(instance.id.clone());
            instances.insert(instance.id.clone(), instance.clone());
        }

        if let Err(first_err) = self.backend.put_instance(&instance).await {
            tokio::time::sleep(jittered_backoff()).await;
            if let Err(second_err) = self.backend.put_instance(&instance).await {
                tracing::warn!("durable backend write failed twice, continuing degraded: {}", second_err);
                self.degraded.store(true, Ordering::Relaxed);
                return Err(AppError::StorageDegraded(format!(
                    "durable write failed after retry: {} (first attempt: {})",
                    second_err, first_err
                )));
            }
        }
        self.degraded.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Idempotent: deleting a missing id is success.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let removed = {
            let mut instances = self.instances.write().await;
            instances.remove(id)
        };

        let Some(instance) = removed else {
            return Ok(());
        };

        {
            let mut name_index = self.name_index.write().await;
            if let Some(ids) = name_index.get_mut(&instance.name) {
                ids.remove(id);
            }
        }

        if let Err(e) = self.backend.delete_instance(id, &instance.name).await {
            tracing::warn!("durable backend delete failed, memory state already updated: {}", e);
            self.degraded.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<ServiceInstance> {
        self.instances.read().await.get(id).cloned()
    }

    pub async fn list_by_name(&self, name: &str) -> Vec<ServiceInstance> {
        let instances = self.instances.read().await;
        let name_index = self.name_index.read().await;
        match name_index.get(name) {
            Some(ids) => ids.iter().filter_map(|id| instances.get(id).cloned()).collect(),
            None => Vec::new(),
        }
    }

    pub async fn list_all(&self) -> Vec<ServiceInstance> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Set a single instance's health field without touching any other attribute; the Health
    /// Supervisor is the only writer of this path.
    pub async fn update_health(&self, id: &str, health: crate::types::HealthStatus, last_seen: i64) -> bool {
        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.get_mut(id) {
            instance.health = health;
            instance.last_seen = last_seen;
            true
        } else {
            false
        }
    }
}

fn jittered_backoff() -> std::time::Duration {
    use std::time::Duration;
    let jitter_ms = 50 + (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_millis() % 100)
        .unwrap_or(0));
    Duration::from_millis(jitter_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HealthStatus, ServiceCheck};
    use std::collections::HashMap as Map;

    fn instance(id: &str, name: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.into(),
            name: name.into(),
            address: "10.0.0.2".into(),
            port: 9090,
            tags: vec![],
            meta: Map::new(),
            check: ServiceCheck { http: String::new(), interval: "15s".into(), timeout: "3s".into() },
            health: HealthStatus::Unknown,
            last_seen: 0,
        }
    }

    async fn memory_store() -> RegistryStore {
        RegistryStore::new(&BackendConfig { kind: BackendKind::Memory, ..BackendConfig::default() })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_then_deregister_then_get_is_not_found() {
        let store = memory_store().await;
        store.upsert(instance("aip-001", "aip")).await.unwrap();
        assert!(store.get("aip-001").await.is_some());

        store.delete("aip-001").await.unwrap();
        assert!(store.get("aip-001").await.is_none());
    }

    #[tokio::test]
    async fn deregister_of_unknown_id_is_idempotent() {
        let store = memory_store().await;
        assert!(store.delete("does-not-exist").await.is_ok());
    }

    #[tokio::test]
    async fn list_by_name_reflects_registrations() {
        let store = memory_store().await;
        store.upsert(instance("aip-001", "aip")).await.unwrap();
        store.upsert(instance("aip-002", "aip")).await.unwrap();
        store.upsert(instance("other-1", "other")).await.unwrap();

        let aip_instances = store.list_by_name("aip").await;
        assert_eq!(aip_instances.len(), 2);
    }

    #[tokio::test]
    async fn rename_moves_id_between_name_index_buckets() {
        let store = memory_store().await;
        store.upsert(instance("svc-1", "first")).await.unwrap();
        store.upsert(instance("svc-1", "second")).await.unwrap();

        assert!(store.list_by_name("first").await.is_empty());
        assert_eq!(store.list_by_name("second").await.len(), 1);
    }
}
