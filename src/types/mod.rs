//! Core type definitions for the Meridian control plane.

pub mod registry;
pub mod event;
pub mod review;
pub mod workflow;
pub mod cognition;

pub use registry::{ServiceInstance, ServiceCheck, HealthStatus, HealthCheckState};
pub use event::{EventEnvelope, Vector};
pub use review::{ReviewPanel, ReviewOutcome, ReviewerResponse, Consensus, Label};
pub use workflow::{Workflow, WorkflowState, WorkflowKind};
pub use cognition::{IntelligenceMetrics, PatternRecord, PatternKind};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Generic value type for flexible payloads (event bodies, reviewer rationale metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(a) => write!(f, "[{} items]", a.len()),
            Value::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

/// Severity ordering used by the reviewer tie-break rule (critical > high > medium > low > minimal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

/// Instance ID type alias. Instance ids are caller-supplied strings (e.g. Consul-style `"aip-001"`),
/// not server-generated integers, per the register wire contract in the registry API.
pub type InstanceId = String;

/// Correlation ID for event intake deduplication.
pub type CorrelationId = String;

/// Workflow ID type alias.
pub type WorkflowId = uuid::Uuid;

/// Content-addressed hash used for correlation id fallback generation (when an inbound event
/// omits one) and for pattern-signature hashing in the cognitive engine.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Result type used throughout the control plane.
pub type AppResult<T> = Result<T, AppError>;

/// Error kinds per the error handling design: each variant carries its HTTP propagation policy
/// via `to_status` in the `api` module rather than encoding it here.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage degraded: {0}")]
    StorageDegraded(String),

    #[error("payload too large: {0} bytes (max {1})")]
    PayloadTooLarge(usize, usize),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("insufficient panel: {0}")]
    InsufficientPanel(String),

    #[error("policy reject: {0}")]
    PolicyReject(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    TransportError(#[from] reqwest::Error),
}
