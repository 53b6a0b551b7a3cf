/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::api;
use crate::control::ControlPlane;
use crate::dal::DAL;
use crate::db::create_shared_connection_pool;
use crate::filter::FilterEngine;
use crate::injector::Injector;
use crate::pipeline::{self, Pipeline};
use crate::rate_limit::RateLimiter;
use crate::sessions::SessionWatch;
use crate::tunnel::TunnelSupervisor;
use crate::utils;
use crate::utils::background_tasks::EventRetentionConfig;
use crate::utils::event_bus::EventBus;
use chrono::Utc;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use hermod_utils::config::Settings;
use hermod_utils::logging::prelude::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

/// Embedded schema migrations, applied on every startup.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../hermod-models/migrations");

/// Function to start the Hermod broker server
///
/// This function initializes the database, runs migrations, wires the event
/// pipeline and control plane together, and starts the ingress server with
/// graceful shutdown support.
pub async fn serve(config: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Hermod broker");

    // Create database connection pool
    info!("Opening database at {}", config.database.path);
    let connection_pool = create_shared_connection_pool(&config.database.path, 5);

    // Run pending migrations
    info!("Running pending database migrations");
    {
        let mut conn = connection_pool.get().expect("Failed to get DB connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
    }
    info!("Database migrations completed successfully");

    // Initialize the event bus and the Data Access Layer
    let event_bus = EventBus::new();
    let dal = DAL::new(connection_pool.clone(), event_bus.clone());

    // Assemble the pipeline
    let filter = FilterEngine::new(
        config.filter.jq_path.clone(),
        Duration::from_secs(config.filter.timeout_seconds),
    );
    let injector = Injector::new(
        PathBuf::from(&config.sessions.dir),
        Duration::from_secs(config.injector.timeout_seconds),
        config.injector.max_attempts,
        Duration::from_secs(config.injector.backoff_seconds),
    );
    let pipeline = Pipeline::new(dal.clone(), filter, injector);

    // Watch the session directory and drain queues on appearance
    let (_session_watch, appeared_rx) = SessionWatch::start(
        PathBuf::from(&config.sessions.dir),
        Duration::from_secs(config.sessions.poll_interval_seconds),
    );
    pipeline::start_drain_task(pipeline.clone(), appeared_rx);

    // Admission control
    let rate_limiter = RateLimiter::new(
        Duration::from_secs(config.rate_limit.window_seconds),
        config.rate_limit.max_requests,
    );
    rate_limiter.start_eviction_task();

    // Tunnel supervision and the control plane
    let supervisor = TunnelSupervisor::new(
        config.tunnel.clone(),
        config.server.port,
        event_bus.clone(),
    );
    let control = ControlPlane::new(dal.clone(), supervisor, config.server.port);
    ControlPlane::start_notification_fanout(&control, &event_bus);

    // Event retention sweep
    utils::background_tasks::start_event_retention_task(
        dal.clone(),
        EventRetentionConfig {
            interval_seconds: config.events.sweep_interval_seconds,
            retention_days: config.events.retention_days,
        },
    );

    // Configure API routes
    info!("Configuring API routes");
    let app = api::configure_api_routes(
        api::AppState {
            pipeline,
            control,
            rate_limiter,
            server_name: config.server.name.clone(),
        },
        config.server.max_body_bytes,
    );

    // Set up the server address
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Set up shutdown signal handler
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
        shutdown_tx.send(()).ok();
    });

    // Start the server with graceful shutdown
    info!("Hermod broker is now running");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown(shutdown_rx))
    .await?;

    Ok(())
}

/// Deletes audit-log events past the retention window.
///
/// # Arguments
///
/// * `config` - The loaded settings.
/// * `days` - Optional override of the configured retention.
pub fn prune_events(config: &Settings, days: Option<i64>) -> Result<(), Box<dyn std::error::Error>> {
    let retention_days = days.unwrap_or(config.events.retention_days);
    info!("Pruning events older than {} day(s)", retention_days);

    let pool = create_shared_connection_pool(&config.database.path, 1);
    {
        let mut conn = pool.get().expect("Failed to get DB connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
    }
    let dal = DAL::new(pool, EventBus::new());

    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let pruned = dal.events().prune_older_than(cutoff)?;

    println!("Pruned {} event(s)", pruned);
    Ok(())
}
