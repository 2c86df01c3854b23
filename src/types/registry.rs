//! Service registry data model (§3: ServiceInstance, ServiceCatalog, HealthCheckState).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health state machine per instance: `unknown -> passing <-> warning -> critical -> (recover) passing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// HTTP health check declaration attached to a service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCheck {
    /// Health check URL, e.g. `http://10.0.0.2:9090/healthz`.
    #[serde(rename = "HTTP", default)]
    pub http: String,
    /// Probe cadence, e.g. `"15s"`.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Per-probe timeout, e.g. `"3s"`.
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for ServiceCheck {
    /// A register request that omits `Check` entirely (§6 scenario 1) has an undeclared check,
    /// so this must round-trip to the same "no check" state `is_declared` recognizes.
    fn default() -> Self {
        Self {
            http: String::new(),
            interval: default_interval(),
            timeout: default_timeout(),
        }
    }
}

fn default_interval() -> String {
    "15s".to_string()
}

fn default_timeout() -> String {
    "3s".to_string()
}

impl ServiceCheck {
    pub fn is_declared(&self) -> bool {
        !self.http.is_empty()
    }

    /// Parse `"15s"`-style duration strings; falls back to the given default on any parse failure.
    pub fn interval_duration(&self, default_secs: u64) -> std::time::Duration {
        parse_duration_secs(&self.interval).unwrap_or(std::time::Duration::from_secs(default_secs))
    }

    pub fn timeout_duration(&self, default_secs: u64) -> std::time::Duration {
        parse_duration_secs(&self.timeout).unwrap_or(std::time::Duration::from_secs(default_secs))
    }
}

fn parse_duration_secs(s: &str) -> Option<std::time::Duration> {
    let trimmed = s.trim();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    let secs: u64 = digits.parse().ok()?;
    Some(std::time::Duration::from_secs(secs))
}

/// A single registered, network-addressable endpoint of a named service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "Meta", default)]
    pub meta: HashMap<String, String>,
    #[serde(rename = "Check", default)]
    pub check: ServiceCheck,
    #[serde(default = "default_health")]
    pub health: HealthStatus,
    #[serde(default)]
    pub last_seen: i64,
}

fn default_health() -> HealthStatus {
    HealthStatus::Unknown
}

impl ServiceInstance {
    /// Health state to assign on first register per the resolved Open Question:
    /// `passing` if a check is declared, `unknown` otherwise.
    pub fn initial_health(&self, optimistic: bool) -> HealthStatus {
        if optimistic && self.check.is_declared() {
            HealthStatus::Passing
        } else {
            HealthStatus::Unknown
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("ID must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("Name must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("Port must be between 1 and 65535".to_string());
        }
        if self.address.trim().is_empty() {
            return Err("Address must not be empty".to_string());
        }
        Ok(())
    }
}

/// Derived view: map of service name -> set of instance ids, rebuilt on cache miss/invalidation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub services: HashMap<String, Vec<String>>,
}

/// Supervisor-owned probe bookkeeping for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckState {
    pub instance_id: String,
    pub consecutive_failures: u32,
    pub last_probe_ts: i64,
    pub last_latency_ms: u64,
    pub next_probe_ts: i64,
}

impl HealthCheckState {
    pub fn new(instance_id: String, now: i64) -> Self {
        Self {
            instance_id,
            consecutive_failures: 0,
            last_probe_ts: 0,
            last_latency_ms: 0,
            next_probe_ts: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_name() {
        let instance = ServiceInstance {
            id: "aip-001".into(),
            name: "".into(),
            address: "10.0.0.2".into(),
            port: 9090,
            tags: vec![],
            meta: HashMap::new(),
            check: ServiceCheck { http: String::new(), interval: "15s".into(), timeout: "3s".into() },
            health: HealthStatus::Unknown,
            last_seen: 0,
        };
        assert!(instance.validate().is_err());
    }

    #[test]
    fn initial_health_optimistic_with_check() {
        let instance = ServiceInstance {
            id: "aip-001".into(),
            name: "aip".into(),
            address: "10.0.0.2".into(),
            port: 9090,
            tags: vec![],
            meta: HashMap::new(),
            check: ServiceCheck { http: "http://10.0.0.2:9090/healthz".into(), interval: "15s".into(), timeout: "3s".into() },
            health: HealthStatus::Unknown,
            last_seen: 0,
        };
        assert_eq!(instance.initial_health(true), HealthStatus::Passing);
        assert_eq!(instance.initial_health(false), HealthStatus::Unknown);
    }

    #[test]
    fn initial_health_unknown_without_check() {
        let instance = ServiceInstance {
            id: "aip-002".into(),
            name: "aip".into(),
            address: "10.0.0.3".into(),
            port: 9090,
            tags: vec![],
            meta: HashMap::new(),
            check: ServiceCheck { http: String::new(), interval: "15s".into(), timeout: "3s".into() },
            health: HealthStatus::Unknown,
            last_seen: 0,
        };
        assert_eq!(instance.initial_health(true), HealthStatus::Unknown);
    }
}
