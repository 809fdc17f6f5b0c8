//! Zone server - robot zone membership and transition service
//!
//! Tracks which configured polygon zones a robot is in, publishes ENTER/EXIT
//! transitions correlated with registry locations, and answers zone queries.
//!
//! Module structure:
//! - `domain/` - Zones, poses, registry and transition types
//! - `io/` - External interfaces (MQTT ingest/egress, registry clients, HTTP API)
//! - `services/` - Transition engine, correlation and request handling
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use zone_server::domain::zone::ZoneSet;
use zone_server::infra::{Config, Metrics};
use zone_server::io::http_api::{start_http_server, ApiState};
use zone_server::io::mqtt::{start_mqtt_client, PoseIngest};
use zone_server::io::registry::{HttpLocalizer, HttpRegistry};
use zone_server::io::transforms::FrameTransforms;
use zone_server::io::{create_egress_channel, MqttPublisher};
use zone_server::services::{
    create_transition_worker, DeviceControlCache, LocalizationDispatcher, LocationCorrelator,
    TransitionEngine, ZoneService,
};

/// Upper bound on draining queued transitions after the engine stops
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Zone server - zone membership and transition events for a mobile robot
#[derive(Parser, Debug)]
#[command(name = "zone-server", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-observation visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "zone-server starting");

    let args = Args::parse();

    // Config and zone geometry are fatal: never run with an unknown zone set
    let config = Config::from_file(&args.config)?;
    let zones = Arc::new(ZoneSet::from_definitions(config.zones()).context("Invalid zone configuration")?);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        map_frame = %config.map_frame(),
        zones = %zones.len(),
        zones_with_controls = %config.zone_controls().len(),
        registry_url = %config.registry_url(),
        localization_url = %config.localization_url(),
        exit_on_empty = %config.exit_on_empty(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // External services
    let timeout = Duration::from_millis(config.registry_timeout_ms());
    let registry = Arc::new(HttpRegistry::new(config.registry_url(), timeout)?);
    let localizer = Arc::new(HttpLocalizer::new(config.localization_url(), timeout)?);

    // Core services
    let controls = Arc::new(DeviceControlCache::new(
        config.zone_controls().clone(),
        registry.clone(),
        metrics.clone(),
    ));
    let correlator = Arc::new(LocationCorrelator::new(
        zones.clone(),
        controls.clone(),
        registry,
        metrics.clone(),
    ));
    let localization = Arc::new(LocalizationDispatcher::new(zones.clone(), localizer, metrics.clone()));

    // Egress: transition events to MQTT
    let (egress_sender, egress_rx) =
        create_egress_channel(config.egress_queue_size(), config.site_id().to_string());
    // Publisher stops once the worker drops the last egress sender
    let publisher = MqttPublisher::new(&config, egress_rx);
    let publisher_handle = tokio::spawn(publisher.run());

    // Engine -> worker pipeline
    let (batch_tx, worker) = create_transition_worker(correlator.clone(), egress_sender, metrics.clone());
    let worker_handle = tokio::spawn(worker.run());

    let (pose_tx, pose_rx) = mpsc::channel(config.pose_queue_size());
    let engine = TransitionEngine::new(zones.clone(), config.exit_on_empty(), batch_tx, metrics.clone());
    let membership = engine.subscribe_membership();

    // Observation ingest
    let transforms = FrameTransforms::new(config.map_frame(), config.static_frames());
    let ingest = PoseIngest::new(&config, transforms, pose_tx, metrics.clone());
    let mqtt_config = config.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_mqtt_client(&mqtt_config, ingest, mqtt_shutdown).await {
            tracing::error!(error = %e, "mqtt_client_error");
        }
    });

    // HTTP API (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let service = Arc::new(ZoneService::new(zones, controls, correlator, localization));
        let state = Arc::new(ApiState {
            service,
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
            membership,
        });
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, state, http_shutdown).await {
                tracing::error!(error = %e, "http_api_error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Shutdown cascades: MQTT ingest stops and drops the pose sender, the
    // engine returns and drops the batch sender, the worker finishes its
    // backlog and drops the egress sender, the publisher drains and disconnects
    engine.run(pose_rx).await;
    let drain = async {
        let _ = worker_handle.await;
        let _ = publisher_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(timeout_secs = %SHUTDOWN_DRAIN_TIMEOUT.as_secs(), "shutdown_drain_timeout");
    }

    info!("zone-server shutdown complete");
    Ok(())
}
