/*
 * 5D Labs Machine Deletion Remediation - Kubernetes Node Remediation Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Remediation Controller Service - Kubernetes Controller for `MachineDeletionRemediation` CRDs
//!
//! This service:
//! - Watches `MachineDeletionRemediation` requests created by the node health checker
//! - Deletes the Machine backing each unhealthy node so its MachineSet replaces it
//! - Exports reconcile counters over OTLP when telemetry is enabled
//! - Serves health and readiness endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use machine_deletion_remediation::tasks::metrics::{
    init_meter_provider, NoopObserver, RemediationMetrics, RemediationObserver,
};
use machine_deletion_remediation::{run_remediation_controller, ControllerConfig};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Clone)]
struct AppState {
    /// Cleared when the controller task stops
    controller_running: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path();
    let loaded = ControllerConfig::from_mounted_file(&config_path);

    init_tracing(loaded.as_ref().is_ok_and(|cfg| cfg.telemetry.json_logs));

    info!(
        "Starting 5D Labs Machine Deletion Remediation controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = match loaded {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            ControllerConfig::default()
        }
    };
    if let Ok(namespace) = std::env::var("WATCH_NAMESPACE") {
        config.namespace = Some(namespace).filter(|ns| !ns.is_empty());
    }
    config.validate()?;
    let config = Arc::new(config);

    let meter_provider = if config.telemetry.enabled {
        Some(init_meter_provider(
            &config.telemetry.otlp_endpoint,
            Duration::from_secs(config.telemetry.export_interval_seconds),
        )?)
    } else {
        None
    };
    let observer: Arc<dyn RemediationObserver> = if meter_provider.is_some() {
        Arc::new(RemediationMetrics::new())
    } else {
        Arc::new(NoopObserver)
    };

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let controller_running = Arc::new(AtomicBool::new(true));

    // Start the controller in the background
    let controller_handle = {
        let config = config.clone();
        let running = controller_running.clone();
        tokio::spawn(async move {
            if let Err(e) = run_remediation_controller(client, config, observer).await {
                error!("Controller error: {}", e);
            }
            running.store(false, Ordering::SeqCst);
        })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(AppState { controller_running });

    let listener = tokio::net::TcpListener::bind(config.server.bind_address.as_str()).await?;
    info!(
        "Controller HTTP server listening on {}",
        config.server.bind_address
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight reconciles are dropped at their next await point
    controller_handle.abort();

    if let Some(provider) = meter_provider {
        if let Err(e) = provider.shutdown() {
            warn!("Failed to flush metrics on shutdown: {}", e);
        }
    }
    info!("Controller service stopped");

    Ok(())
}

fn config_path() -> String {
    std::env::var("CONTROLLER_CONFIG_PATH")
        .ok()
        .filter(|path| Path::new(path).exists())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

fn init_tracing(json_logs: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,machine_deletion_remediation=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "remediation-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.controller_running.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "remediation-controller",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
