//! Typed configuration for the control plane (§6). One aggregate struct, one sub-struct per
//! subsystem, each with its own `Default`; no reflection-based loading.

use crate::types::AppError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    pub registry: RegistryConfig,
    pub health: HealthConfig,
    pub intake: IntakeConfig,
    pub review: ReviewConfig,
    pub cognition: CognitionConfig,
    pub workflow: WorkflowConfig,
    pub orchestration: OrchestrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            registry: RegistryConfig::default(),
            health: HealthConfig::default(),
            intake: IntakeConfig::default(),
            review: ReviewConfig::default(),
            cognition: CognitionConfig::default(),
            workflow: WorkflowConfig::default(),
            orchestration: OrchestrationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file; writes and returns defaults if absent.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AppError::ConfigError(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| AppError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::ConfigError(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| AppError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_dir: String,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "control_data".into(),
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub address: String,
    pub db: i64,
    pub password: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            address: "redis://127.0.0.1:6379".into(),
            db: 0,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1000, ttl_seconds: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub port: u16,
    pub host: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Resolves the Open Question on initial health state: `passing` if a check is declared,
    /// `unknown` otherwise, made configurable as the spec suggests.
    #[serde(default = "default_true")]
    pub optimistic_initial_state: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            port: 8500,
            host: "0.0.0.0".into(),
            cache: CacheConfig::default(),
            backend: BackendConfig::default(),
            optimistic_initial_state: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub default_interval_seconds: u64,
    pub default_timeout_seconds: u64,
    pub max_parallel_probes: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_interval_seconds: 15,
            default_timeout_seconds: 3,
            max_parallel_probes: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    pub queue_capacity: usize,
    pub dedup_window_seconds: u64,
    pub max_payload_bytes: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            dedup_window_seconds: 300,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub panel_size: usize,
    pub quorum: usize,
    pub consensus_threshold: f64,
    pub timeout_seconds: u64,
    /// Reviewer endpoint roster (the out-of-scope persona/AIP service's stable HTTP addresses).
    /// Not itself named in the wire-level config table, but required to address the panel this
    /// component fans out to; kept here rather than hardcoded per §9's "external interface, not a
    /// reason to special-case the client" note.
    #[serde(default)]
    pub roster: Vec<String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            panel_size: 5,
            quorum: 3,
            consensus_threshold: 0.7,
            timeout_seconds: 120,
            roster: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionConfig {
    pub learning_period_seconds: u64,
    pub pattern_period_seconds: u64,
    pub reflection_period_seconds: u64,
    pub window_size: usize,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self {
            learning_period_seconds: 15,
            pattern_period_seconds: 30,
            reflection_period_seconds: 10,
            window_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub max_concurrent: usize,
    pub default_timeout_seconds: u64,
    pub queue_capacity: usize,
    /// Outbound endpoint per workflow kind (`"quarantine"`, `"forward"`, `"dispatch_response"`);
    /// `drop` has no endpoint and is always a no-op. Addresses the out-of-scope I/O adapters as a
    /// stable HTTP interface rather than hardcoding per-protocol clients here.
    #[serde(default)]
    pub action_endpoints: std::collections::HashMap<String, String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            default_timeout_seconds: 300,
            queue_capacity: 256,
            action_endpoints: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub port: u16,
    pub host: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            port: 8600,
            host: "0.0.0.0".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.registry.port, config.registry.port);
        assert_eq!(parsed.workflow.max_concurrent, config.workflow.max_concurrent);
    }
}
