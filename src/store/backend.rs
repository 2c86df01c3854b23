//! Durable backend trait and Redis-compatible implementation (§6 persistence layout).

use crate::config::BackendConfig;
use crate::types::{AppError, AppResult, ServiceInstance};
use async_trait::async_trait;

pub const SCHEMA_VERSION: i64 = 1;

fn instance_key(id: &str) -> String {
    format!("svc:{}", id)
}

fn name_index_key(name: &str) -> String {
    format!("idx:name:{}", name)
}

/// Abstraction over the durable backend so the store can swap in a fake for tests without
/// pulling a live Redis instance into the test run.
#[async_trait]
pub trait DurableBackend: Send + Sync {
    async fn put_instance(&self, instance: &ServiceInstance) -> AppResult<()>;
    async fn delete_instance(&self, id: &str, name: &str) -> AppResult<()>;
    async fn scan_all(&self) -> AppResult<Vec<ServiceInstance>>;
}

/// Redis-compatible backend. Writes use a pipelined transaction so the instance record and its
/// name-index entry never observably diverge.
pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(config: &BackendConfig) -> AppResult<Self> {
        let client = redis::Client::open(config.address.clone())
            .map_err(|e| AppError::StorageUnavailable(format!("invalid redis address: {}", e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis connect failed: {}", e)))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl DurableBackend for RedisBackend {
    async fn put_instance(&self, instance: &ServiceInstance) -> AppResult<()> {
        let payload = serde_json::to_string(instance)?;
        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .set(instance_key(&instance.id), payload)
            .sadd(name_index_key(&instance.name), instance.id.clone())
            .set("meta:version", SCHEMA_VERSION)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::StorageDegraded(format!("redis write failed: {}", e)))
    }

    async fn delete_instance(&self, id: &str, name: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .del(instance_key(id))
            .srem(name_index_key(name), id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::StorageDegraded(format!("redis delete failed: {}", e)))
    }

    async fn scan_all(&self) -> AppResult<Vec<ServiceInstance>> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("svc:*")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis scan failed: {}", e)))?;

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("redis mget failed: {}", e)))?;

        let mut instances = Vec::with_capacity(raw.len());
        for value in raw.into_iter().flatten() {
            if let Ok(instance) = serde_json::from_str::<ServiceInstance>(&value) {
                instances.push(instance);
            }
        }
        Ok(instances)
    }
}

/// In-memory-only stand-in used when `registry.backend.kind = "memory"`; also the grounding for
/// test doubles that exercise store fallback behavior without a live backend.
#[derive(Default)]
pub struct NullBackend;

#[async_trait]
impl DurableBackend for NullBackend {
    async fn put_instance(&self, _instance: &ServiceInstance) -> AppResult<()> {
        Ok(())
    }

    async fn delete_instance(&self, _id: &str, _name: &str) -> AppResult<()> {
        Ok(())
    }

    async fn scan_all(&self) -> AppResult<Vec<ServiceInstance>> {
        Ok(Vec::new())
    }
}
