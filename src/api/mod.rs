//! Registry API (§4.4): Consul-compatible HTTP surface over the Registry Store, Discovery Cache
//! and Health Supervisor.

pub mod error;

use crate::cache::{self, DiscoveryCache};
use crate::config::RegistryConfig;
use crate::health::HealthSupervisor;
use crate::metrics::MetricsSink;
use crate::store::RegistryStore;
use crate::types::{AppError, AppResult, ServiceInstance};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

pub struct RegistryApiState {
    pub store: Arc<RegistryStore>,
    pub cache: Arc<DiscoveryCache>,
    pub health: Arc<HealthSupervisor>,
    pub metrics: Arc<MetricsSink>,
    pub config: RegistryConfig,
    pub start_time: Instant,
}

pub fn router(state: Arc<RegistryApiState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/v1/agent/service/register", put(register).post(register))
        .route("/v1/agent/service/deregister/:id", put(deregister))
        .route("/v1/catalog/services", get(catalog_services))
        .route("/v1/health/service/:name", get(health_service))
        .route("/health", get(self_health))
        .route("/metrics", get(metrics))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct ValidationError {
    field: &'static str,
    message: String,
}

/// §4.4 validation: reject invalid ports, missing name, or unresolvable address with a structured
/// `{field,message}` 400 — distinct from the ambient `{error,code,message}` `AppError` body used
/// by every other endpoint, since this is the literal wire contract named in §4.4.
async fn register(State(state): State<Arc<RegistryApiState>>, Json(mut instance): Json<ServiceInstance>) -> Response {
    if let Err(message) = instance.validate() {
        let field = if instance.name.trim().is_empty() {
            "Name"
        } else if instance.port == 0 {
            "Port"
        } else if instance.address.trim().is_empty() {
            "Address"
        } else {
            "ID"
        };
        return (StatusCode::BAD_REQUEST, Json(ValidationError { field, message })).into_response();
    }

    let now = now_unix();
    instance.health = instance.initial_health(state.config.optimistic_initial_state);
    instance.last_seen = now;

    match state.store.upsert(instance.clone()).await {
        Ok(()) | Err(AppError::StorageDegraded(_)) => {
            state.cache.invalidate_all();
            state.metrics.record_register();
            state.metrics.set_backend_degraded(state.store.is_degraded());
            state.health.supervise(instance.id.clone()).await;
            Json(serde_json::json!({"Status": "ok"})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn deregister(State(state): State<Arc<RegistryApiState>>, Path(id): Path<String>) -> Response {
    match state.store.delete(&id).await {
        Ok(()) => {
            state.health.cancel(&id).await;
            state.cache.invalidate_all();
            state.metrics.record_deregister();
            Json(serde_json::json!({"Status": "ok"})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn catalog_services(State(state): State<Arc<RegistryApiState>>) -> Response {
    let start = Instant::now();
    if let Some(cached) = state.cache.get(cache::KEY_SERVICES_ALL) {
        state.metrics.record_cache_hit();
        state.metrics.record_discover_latency(start.elapsed().as_secs_f64());
        return Json(cached).into_response();
    }
    state.metrics.record_cache_miss();

    let instances = state.store.list_all().await;
    let mut services: HashMap<String, Vec<String>> = HashMap::new();
    for instance in instances {
        let tags = services.entry(instance.name).or_default();
        for tag in instance.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }

    let body = serde_json::to_value(&services).unwrap_or_default();
    state.cache.put(cache::KEY_SERVICES_ALL, body.clone());
    state.metrics.record_discover_latency(start.elapsed().as_secs_f64());
    Json(body).into_response()
}

async fn health_service(State(state): State<Arc<RegistryApiState>>, Path(name): Path<String>) -> Response {
    let start = Instant::now();
    let key = cache::key_service(&format!("health:{}", name));
    if let Some(cached) = state.cache.get(&key) {
        state.metrics.record_cache_hit();
        state.metrics.record_discover_latency(start.elapsed().as_secs_f64());
        return Json(cached).into_response();
    }
    state.metrics.record_cache_miss();

    let instances = state.store.list_by_name(&name).await;
    let entries: Vec<serde_json::Value> = instances
        .iter()
        .map(|instance| {
            serde_json::json!({
                "Service": instance,
                "Checks": [{"Status": instance.health.to_string()}],
            })
        })
        .collect();

    let body = serde_json::to_value(&entries).unwrap_or_default();
    state.cache.put(key, body.clone());
    state.metrics.record_discover_latency(start.elapsed().as_secs_f64());
    Json(body).into_response()
}

async fn self_health(State(state): State<Arc<RegistryApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "degraded": state.store.is_degraded(),
    }))
}

async fn metrics(State(state): State<Arc<RegistryApiState>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], state.metrics.render())
}

pub async fn serve(state: Arc<RegistryApiState>, host: &str, port: u16) -> AppResult<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::IoError(e))?;
    tracing::info!("Registry API listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| AppError::IoError(e))
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
    use crate::types::{HealthStatus, ServiceCheck};
    use std::collections::HashMap as Map;

    async fn state() -> Arc<RegistryApiState> {
        let store = Arc::new(RegistryStore::new(&BackendConfig::default()).await.unwrap());
        let metrics = Arc::new(MetricsSink::default());
        let health = Arc::new(HealthSupervisor::new(
            crate::config::HealthConfig::default(),
            Arc::clone(&store),
            Arc::clone(&metrics),
        ));
        Arc::new(RegistryApiState {
            store,
            cache: Arc::new(DiscoveryCache::new(1000, 30)),
            health,
            metrics,
            config: RegistryConfig::default(),
            start_time: Instant::now(),
        })
    }

    fn instance(id: &str, name: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.into(),
            name: name.into(),
            address: "10.0.0.2".into(),
            port: 9090,
            tags: vec!["v1".into()],
            meta: Map::new(),
            check: ServiceCheck { http: String::new(), interval: "15s".into(), timeout: "3s".into() },
            health: HealthStatus::Unknown,
            last_seen: 0,
        }
    }

    #[tokio::test]
    async fn register_then_catalog_includes_service_name() {
        let state = state().await;
        register(State(Arc::clone(&state)), Json(instance("aip-001", "aip"))).await;

        let response = catalog_services(State(state)).await.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json.get("aip").is_some());
    }

    #[tokio::test]
    async fn deregister_unknown_id_is_idempotent_ok() {
        let state = state().await;
        let response = deregister(State(state), Path("does-not-exist".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_with_missing_name_is_400_with_field() {
        let state = state().await;
        let mut bad = instance("aip-001", "");
        bad.name = String::new();
        let response = register(State(state), Json(bad)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
