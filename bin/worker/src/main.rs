//! Workflow automation worker.
//!
//! One process runs three long-lived tasks: a periodic batch sweep that
//! resumes paused executions and fires scheduled and filter triggers, a
//! queue consumer that fans trigger events out to listening workflows,
//! and a small HTTP API for health checks and manual enrollment.

mod batch;
mod config;
mod consumer;
mod db;
mod error;
mod http;
mod state;

use chrono::Utc;
use copper_spaniel_engine::nats::{NatsConfig, NatsQueue};
use rootcause::prelude::Report;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;
use crate::db::PgStore;
use crate::error::WorkerError;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        tracing::error!(error = ?report, "Worker exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<WorkerError>> {
    let config = WorkerConfig::from_env().map_err(|e| WorkerError::ConfigError {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| WorkerError::DatabaseUnavailable {
            details: e.to_string(),
        })?;
    let store = PgStore::new(db_pool);

    let nats_config = NatsConfig {
        url: config.nats.url.clone(),
        step_stream_name: config.nats.step_stream.clone(),
        trigger_stream_name: config.nats.trigger_stream.clone(),
        trigger_consumer_name: config.nats.trigger_consumer.clone(),
    };
    let queue = NatsQueue::connect(nats_config)
        .await
        .map_err(|e| WorkerError::QueueUnavailable {
            details: e.to_string(),
        })?;

    let app_state = Arc::new(AppState::new(store, queue.clone()));

    // Spawn the periodic batch sweep
    let sweep_state = app_state.clone();
    let interval_secs = config.batch.interval_seconds;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match batch::run_tick(&sweep_state, Utc::now()).await {
                Ok(summary) if !summary.is_quiet() => {
                    tracing::info!(
                        resumed = summary.resumed,
                        rescheduled = summary.rescheduled,
                        enrolled = summary.enrolled,
                        skipped = summary.skipped,
                        errors = summary.errors.len(),
                        "Batch sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Batch sweep failed");
                }
            }
        }
    });

    // Spawn the trigger queue consumer
    let consumer_state = app_state.clone();
    let batch_size = config.batch.trigger_batch_size;
    let idle_wait = std::time::Duration::from_millis(config.batch.trigger_idle_wait_ms);
    tokio::spawn(async move {
        if let Err(e) =
            consumer::run_consumer_loop(&consumer_state, &queue, batch_size, idle_wait).await
        {
            tracing::error!(error = %e, "Trigger consumer stopped");
        }
    });

    let app = http::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.http.listen_addr)
        .await
        .map_err(|e| WorkerError::HttpServerFailed {
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.http.listen_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| WorkerError::HttpServerFailed {
            details: e.to_string(),
        })?;

    Ok(())
}
