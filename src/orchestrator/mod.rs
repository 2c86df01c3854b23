//! Orchestration API (§4.10): the HTTP surface that accepts webhook-delivered threat-vector
//! events and exposes Cognitive Engine state. Webhook intake feeds the Community Reviewer and
//! Workflow Executor via the Event Intake's per-source queues (§4.6).

use crate::cognition::{CognitiveEngine, Observation};
use crate::intake::{EventIntake, EventProcessor};
use crate::review::CommunityReviewer;
use crate::types::{content_hash, AppError, EventEnvelope, Vector};
use crate::workflow::WorkflowExecutor;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Drains one source's event queue into the Community Reviewer, then hands the outcome to the
/// Workflow Executor. Review feedback reaches the Cognitive Engine through the executor's own
/// learning-input hookup (§4.9).
pub struct ReviewWorkflowProcessor {
    pub reviewer: Arc<CommunityReviewer>,
    pub workflow: Arc<WorkflowExecutor>,
}

#[async_trait]
impl EventProcessor for ReviewWorkflowProcessor {
    async fn process(&self, event: EventEnvelope) {
        match self.reviewer.review_event(&event).await {
            Ok(outcome) => {
                if let Err(e) = self.workflow.submit(&event, &outcome).await {
                    tracing::warn!("workflow submission failed for {}: {}", event.correlation_id, e);
                }
            }
            Err(e) => {
                tracing::warn!("review failed for {}: {}", event.correlation_id, e);
            }
        }
    }
}

pub struct OrchestrationApiState {
    pub intake: Arc<EventIntake>,
    pub cognition: Arc<CognitiveEngine>,
    pub workflow: Arc<WorkflowExecutor>,
    pub start_time: Instant,
}

pub fn router(state: Arc<OrchestrationApiState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/system/state", get(system_state))
        .route("/system/capabilities", get(system_capabilities))
        .route("/webhook/:vector", post(webhook))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<OrchestrationApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn status(State(state): State<Arc<OrchestrationApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "active_workflows": state.workflow.active_count(),
        "events_dropped_total": state.intake.dropped_total(),
    }))
}

async fn system_state(State(state): State<Arc<OrchestrationApiState>>) -> Json<serde_json::Value> {
    let metrics = state.cognition.snapshot().await;
    let patterns = state.cognition.patterns().await;
    Json(serde_json::json!({
        "intelligence": metrics,
        "pattern_count": patterns.len(),
    }))
}

/// "Emergent capabilities" / "consciousness indicators" are purely derived booleans from metric
/// thresholds (§4.8, resolved Open Question) — no additional semantics are attached to them here.
async fn system_capabilities(State(state): State<Arc<OrchestrationApiState>>) -> Json<serde_json::Value> {
    let metrics = state.cognition.snapshot().await;
    Json(serde_json::json!({
        "vectors": ["sms", "voice", "irc", "esmtp", "discord", "webhook"],
        "workflow_kinds": ["quarantine", "forward", "dispatch_response", "drop"],
        "emergent_capability_count": metrics.emergent_capability_count,
        "adaptive_learning_active": metrics.learning_rate > 0.0,
    }))
}

#[derive(serde::Deserialize)]
struct WebhookBody {
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Always 2xx on accepted-for-processing, 4xx on validation, 5xx only on true internal failure
/// (§7). Review and workflow dispatch happen asynchronously off the Event Intake queue; this
/// handler only does intake (size cap, dedup) synchronously.
async fn webhook(
    State(state): State<Arc<OrchestrationApiState>>,
    Path(vector): Path<String>,
    Json(body): Json<WebhookBody>,
) -> Response {
    let vector = match Vector::from_str(&vector) {
        Ok(v) => v,
        Err(message) => return AppError::InvalidRequest(message).into_response(),
    };

    let payload_bytes = serde_json::to_vec(&body.payload).unwrap_or_default();
    let correlation_id = body
        .correlation_id
        .unwrap_or_else(|| content_hash(&payload_bytes));
    let source_id = body.source_id.unwrap_or_else(|| vector.to_string());
    let payload: crate::types::Value = serde_json::from_value(body.payload).unwrap_or_default();

    let envelope = EventEnvelope {
        vector,
        source_id,
        received_ts: now_unix(),
        payload,
        correlation_id: correlation_id.clone(),
    };

    match state.intake.accept(envelope).await {
        Ok(accepted) => {
            state
                .cognition
                .observe(Observation { signature: format!("intake:{}", vector), confidence: 0.5, ts: now_unix() })
                .await;
            Json(serde_json::json!({"accepted": accepted, "correlation_id": correlation_id})).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub async fn serve(state: Arc<OrchestrationApiState>, host: &str, port: u16) -> crate::types::AppResult<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AppError::IoError)?;
    tracing::info!("Orchestration API listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(AppError::IoError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CognitionConfig, IntakeConfig, ReviewConfig, WorkflowConfig};
    use crate::review::{HttpReviewer, Reviewer};

    async fn state() -> Arc<OrchestrationApiState> {
        let cognition = Arc::new(CognitiveEngine::new(CognitionConfig::default()));
        let workflow = WorkflowExecutor::new(
            WorkflowConfig::default(),
            Arc::new(crate::workflow::HttpWorkflowAction::new(Default::default())),
            Some(Arc::clone(&cognition)),
        );
        let reviewer: Arc<dyn Reviewer> = Arc::new(HttpReviewer::default());
        let community = Arc::new(CommunityReviewer::new(ReviewConfig::default(), reviewer, vec![]));
        let processor = Arc::new(ReviewWorkflowProcessor { reviewer: community, workflow: Arc::clone(&workflow) });
        let intake = Arc::new(EventIntake::new(IntakeConfig::default(), processor));

        Arc::new(OrchestrationApiState { intake, cognition, workflow, start_time: Instant::now() })
    }

    #[tokio::test]
    async fn webhook_accepts_a_valid_vector() {
        let state = state().await;
        let body = Json(WebhookBody { source_id: None, correlation_id: Some("corr-1".into()), payload: serde_json::json!({"topic": "spam"}) });
        let response = webhook(State(state), Path("esmtp".to_string()), body).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_rejects_unknown_vector() {
        let state = state().await;
        let body = Json(WebhookBody { source_id: None, correlation_id: None, payload: serde_json::json!({}) });
        let response = webhook(State(state), Path("fax".to_string()), body).await;
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
