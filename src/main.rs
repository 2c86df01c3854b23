//! Meridian Control - entry point
//!
//! Loads configuration, starts logging, assembles the control plane and runs both HTTP surfaces
//! until a shutdown signal arrives.

use meridian_control::{init_logging_with_level, Config, ControlPlane};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::var("MERIDIAN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    init_logging_with_level(&config.general.log_level);

    tracing::info!("Meridian Control v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("configuration loaded from {}", config_path.display());

    let control_plane = match ControlPlane::new(config).await {
        Ok(control_plane) => Arc::new(control_plane),
        Err(e) => {
            tracing::error!("failed to initialize control plane: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = control_plane.run().await {
        tracing::error!("control plane exited with error: {}", e);
        return ExitCode::from(3);
    }

    tracing::info!("shutdown complete");
    ExitCode::SUCCESS
}
