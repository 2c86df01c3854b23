//! Health Supervisor (§4.3): one probe loop per instance with a declared check, bounded by a
//! global concurrency semaphore. Owns the sole write path for `ServiceInstance::health`.

use crate::config::HealthConfig;
use crate::metrics::MetricsSink;
use crate::store::RegistryStore;
use crate::types::{HealthCheckState, HealthStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;

/// Consecutive-failure thresholds for the `passing -> warning -> critical` walk.
const WARNING_AFTER: u32 = 1;
const CRITICAL_AFTER: u32 = 3;

pub struct HealthSupervisor {
    config: HealthConfig,
    store: Arc<RegistryStore>,
    metrics: Arc<MetricsSink>,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    states: Arc<RwLock<HashMap<String, HealthCheckState>>>,
    tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    running: Arc<RwLock<bool>>,
}

impl HealthSupervisor {
    pub fn new(config: HealthConfig, store: Arc<RegistryStore>, metrics: Arc<MetricsSink>) -> Self {
        let max_parallel = config.max_parallel_probes;
        Self {
            config,
            store,
            metrics,
            client: reqwest::Client::new(),
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            states: Arc::new(RwLock::new(HashMap::new())),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(true)),
        }
    }

    /// Spawn (or restart) the probe loop for one instance. Instances with no declared check are
    /// never probed and keep whatever health value they were registered with.
    pub async fn supervise(self: &Arc<Self>, instance_id: String) {
        if !*self.running.read().await {
            return;
        }

        let Some(instance) = self.store.get(&instance_id).await else {
            return;
        };
        if !instance.check.is_declared() {
            return;
        }

        self.cancel(&instance_id).await;

        let now = now_unix();
        self.states.write().await.insert(instance_id.clone(), HealthCheckState::new(instance_id.clone(), now));

        let this = Arc::clone(self);
        let id = instance_id.clone();
        let handle = tokio::spawn(async move { this.probe_loop(id).await });
        self.tasks.write().await.insert(instance_id, handle);
    }

    /// Cancel probing for a deregistered instance.
    pub async fn cancel(&self, instance_id: &str) {
        if let Some(handle) = self.tasks.write().await.remove(instance_id) {
            handle.abort();
        }
        self.states.write().await.remove(instance_id);
    }

    pub async fn shutdown(&self) {
        *self.running.write().await = false;
        let mut tasks = self.tasks.write().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    async fn probe_loop(self: Arc<Self>, instance_id: String) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let Some(instance) = self.store.get(&instance_id).await else {
                break;
            };

            let interval = instance.check.interval_duration(self.config.default_interval_seconds);
            let timeout = instance.check.timeout_duration(self.config.default_timeout_seconds);

            let permit = self.semaphore.clone().acquire_owned().await;
            let outcome = match permit {
                Ok(_permit) => self.probe_once(&instance.check.http, timeout).await,
                Err(_) => break,
            };

            let wait = self.record_outcome(&instance_id, outcome, interval).await;
            tokio::time::sleep(wait).await;
        }
    }

    async fn probe_once(&self, url: &str, timeout: std::time::Duration) -> Result<std::time::Duration, String> {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, self.client.get(url).send()).await;
        match result {
            Ok(Ok(resp)) if resp.status().is_success() => Ok(start.elapsed()),
            Ok(Ok(resp)) => Err(format!("non-2xx status: {}", resp.status())),
            Ok(Err(e)) => Err(format!("request error: {}", e)),
            Err(_) => Err("probe timed out".to_string()),
        }
    }

    /// Apply one probe result to the state machine, write the resolved health to the store and
    /// return how long to sleep before the next probe (exponential backoff on failure, capped at
    /// 2x the configured interval).
    async fn record_outcome(
        &self,
        instance_id: &str,
        outcome: Result<std::time::Duration, String>,
        interval: std::time::Duration,
    ) -> std::time::Duration {
        let now = now_unix();
        let mut states = self.states.write().await;
        let state = states
            .entry(instance_id.to_string())
            .or_insert_with(|| HealthCheckState::new(instance_id.to_string(), now));

        state.last_probe_ts = now;

        let previous = self.store.get(instance_id).await.map(|i| i.health).unwrap_or(HealthStatus::Unknown);

        let next = match outcome {
            Ok(latency) => {
                state.consecutive_failures = 0;
                state.last_latency_ms = latency.as_millis() as u64;
                HealthStatus::Passing
            }
            Err(reason) => {
                state.consecutive_failures += 1;
                tracing::debug!("probe failed for {}: {}", instance_id, reason);
                if state.consecutive_failures >= CRITICAL_AFTER {
                    HealthStatus::Critical
                } else if state.consecutive_failures >= WARNING_AFTER {
                    HealthStatus::Warning
                } else {
                    previous
                }
            }
        };

        if next != previous {
            self.metrics.record_health_transition(&previous.to_string(), &next.to_string());
        }
        self.store.update_health(instance_id, next, now).await;

        let backoff_factor = 1u32 << state.consecutive_failures.min(2);
        let wait = interval.saturating_mul(backoff_factor).min(interval.saturating_mul(2));
        state.next_probe_ts = now + wait.as_secs() as i64;
        wait
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::types::{ServiceCheck, ServiceInstance};
    use std::collections::HashMap as Map;

    async fn supervisor() -> Arc<HealthSupervisor> {
        let store = Arc::new(RegistryStore::new(&BackendConfig::default()).await.unwrap());
        let metrics = Arc::new(MetricsSink::default());
        Arc::new(HealthSupervisor::new(HealthConfig::default(), store, metrics))
    }

    fn instance_with_check(id: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.into(),
            name: "aip".into(),
            address: "127.0.0.1".into(),
            port: 9090,
            tags: vec![],
            meta: Map::new(),
            check: ServiceCheck { http: "http://127.0.0.1:0/healthz".into(), interval: "15s".into(), timeout: "1s".into() },
            health: HealthStatus::Unknown,
            last_seen: 0,
        }
    }

    #[tokio::test]
    async fn instance_without_declared_check_is_never_supervised() {
        let sup = supervisor().await;
        let mut instance = instance_with_check("aip-001");
        instance.check = ServiceCheck { http: String::new(), interval: "15s".into(), timeout: "3s".into() };
        sup.store.upsert(instance).await.unwrap();

        sup.supervise("aip-001".into()).await;
        assert!(sup.tasks.read().await.get("aip-001").is_none());
    }

    #[tokio::test]
    async fn failed_probes_escalate_to_critical_after_threshold() {
        let sup = supervisor().await;
        let mut state = HealthCheckState::new("aip-001".into(), now_unix());
        let interval = std::time::Duration::from_secs(15);

        sup.store.upsert(instance_with_check("aip-001")).await.unwrap();
        sup.states.write().await.insert("aip-001".into(), state.clone());

        for _ in 0..CRITICAL_AFTER {
            sup.record_outcome("aip-001", Err("connection refused".into()), interval).await;
        }
        state = sup.states.read().await.get("aip-001").cloned().unwrap();
        assert_eq!(state.consecutive_failures, CRITICAL_AFTER);
        assert_eq!(sup.store.get("aip-001").await.unwrap().health, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn a_successful_probe_resets_failure_count_to_passing() {
        let sup = supervisor().await;
        let interval = std::time::Duration::from_secs(15);
        sup.store.upsert(instance_with_check("aip-001")).await.unwrap();
        sup.states.write().await.insert("aip-001".into(), HealthCheckState::new("aip-001".into(), now_unix()));

        sup.record_outcome("aip-001", Err("timeout".into()), interval).await;
        sup.record_outcome("aip-001", Ok(std::time::Duration::from_millis(5)), interval).await;

        assert_eq!(sup.store.get("aip-001").await.unwrap().health, HealthStatus::Passing);
        assert_eq!(sup.states.read().await.get("aip-001").unwrap().consecutive_failures, 0);
    }
}
