//! Meridian Control: Consul-compatible Service Registry plus a Master Control
//! cognitive-orchestration core.
//!
//! Two tightly coupled subsystems sharing one process: the Registry (store, cache, health
//! supervisor, registry API) and the Orchestration core (event intake, community review,
//! cognitive engine, workflow executor, orchestration API). Both are bound as independent HTTP
//! surfaces so they can be split across deployments later without touching the wire contracts.

pub mod api;
pub mod cache;
pub mod cognition;
pub mod config;
pub mod health;
pub mod intake;
pub mod metrics;
pub mod orchestrator;
pub mod review;
pub mod store;
pub mod types;
pub mod workflow;

pub use config::Config;
pub use types::{AppError, AppResult};

use cache::DiscoveryCache;
use cognition::CognitiveEngine;
use health::HealthSupervisor;
use intake::EventIntake;
use metrics::MetricsSink;
use orchestrator::{OrchestrationApiState, ReviewWorkflowProcessor};
use review::{CommunityReviewer, HttpReviewer, Reviewer};
use store::RegistryStore;
use workflow::{HttpWorkflowAction, WorkflowExecutor};

use std::sync::Arc;
use std::time::Instant;

/// Owns every subsystem for the process lifetime. Built once at startup in dependency order
/// (store, then cache/health, then intake/review/cognition/workflow) and shared by both HTTP
/// surfaces via `Arc`.
pub struct ControlPlane {
    pub config: Config,
    pub store: Arc<RegistryStore>,
    pub cache: Arc<DiscoveryCache>,
    pub health: Arc<HealthSupervisor>,
    pub metrics: Arc<MetricsSink>,
    pub intake: Arc<EventIntake>,
    pub cognition: Arc<CognitiveEngine>,
    pub workflow: Arc<WorkflowExecutor>,
    start_time: Instant,
}

impl ControlPlane {
    /// Assembles every subsystem leaves-first (§2). Only fails if the durable backend is
    /// configured and the initial connection attempt itself errors; a backend that connects but
    /// later drops degrades the store instead of failing startup.
    pub async fn new(config: Config) -> AppResult<Self> {
        let metrics = Arc::new(MetricsSink::default());
        let store = Arc::new(RegistryStore::new(&config.registry.backend).await?);
        metrics.set_backend_degraded(store.is_degraded());

        let cache = Arc::new(DiscoveryCache::new(config.registry.cache.capacity, config.registry.cache.ttl_seconds));
        let health = Arc::new(HealthSupervisor::new(config.health.clone(), Arc::clone(&store), Arc::clone(&metrics)));

        let cognition = Arc::new(CognitiveEngine::new(config.cognition.clone()));
        cognition.start();

        let action = Arc::new(HttpWorkflowAction::new(config.workflow.action_endpoints.clone()));
        let workflow = WorkflowExecutor::new(config.workflow.clone(), action, Some(Arc::clone(&cognition)));

        let reviewer: Arc<dyn Reviewer> = Arc::new(HttpReviewer::default());
        let community = Arc::new(CommunityReviewer::new(config.review.clone(), reviewer, config.review.roster.clone()));

        let processor = Arc::new(ReviewWorkflowProcessor { reviewer: community, workflow: Arc::clone(&workflow) });
        let intake = Arc::new(EventIntake::new(config.intake.clone(), processor));

        // Re-supervise every instance restored from the durable backend on startup.
        for instance in store.list_all().await {
            if instance.check.is_declared() {
                health.supervise(instance.id.clone()).await;
            }
        }

        Ok(Self {
            config,
            store,
            cache,
            health,
            metrics,
            intake,
            cognition,
            workflow,
            start_time: Instant::now(),
        })
    }

    /// Binds the Registry API and the Orchestration API and runs both until a shutdown signal
    /// arrives, then drains the Health Supervisor and Cognitive Engine loops (§5).
    pub async fn run(self: Arc<Self>) -> AppResult<()> {
        let registry_state = Arc::new(api::RegistryApiState {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            health: Arc::clone(&self.health),
            metrics: Arc::clone(&self.metrics),
            config: self.config.registry.clone(),
            start_time: self.start_time,
        });

        let orchestration_state = Arc::new(OrchestrationApiState {
            intake: Arc::clone(&self.intake),
            cognition: Arc::clone(&self.cognition),
            workflow: Arc::clone(&self.workflow),
            start_time: self.start_time,
        });

        let registry_host = self.config.registry.host.clone();
        let registry_port = self.config.registry.port;
        let orchestration_host = self.config.orchestration.host.clone();
        let orchestration_port = self.config.orchestration.port;

        let registry_server = api::serve(registry_state, &registry_host, registry_port);
        let orchestration_server = orchestrator::serve(orchestration_state, &orchestration_host, orchestration_port);

        tokio::select! {
            result = registry_server => result?,
            result = orchestration_server => result?,
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received, draining (timeout 30s)");
                self.shutdown().await;
            }
        }

        Ok(())
    }

    async fn shutdown(&self) {
        let drain = async {
            self.health.shutdown().await;
            self.cognition.shutdown().await;
        };
        if tokio::time::timeout(std::time::Duration::from_secs(30), drain).await.is_err() {
            tracing::warn!("graceful shutdown exceeded the 30s drain timeout");
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize logging at the default level (`info`).
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Initialize logging at the given default level; `RUST_LOG` overrides it when set.
pub fn init_logging_with_level(level: &str) {
    let default_filter = format!("meridian_control={},hyper=warn,tower_http=warn", level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
