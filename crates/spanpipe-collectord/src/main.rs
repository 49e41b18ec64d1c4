// Copyright 2024-Present the spanpipe authors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use spanpipe_collector::config::CollectorConfig;
use spanpipe_collector::handler::default_handlers;
use spanpipe_collector::router::IngestRouter;
use spanpipe_collector::server::IngestServer;
use spanpipe_collector::storage::JsonlStore;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SPANPIPE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match CollectorConfig::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on collector startup: {e}");
            return;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.storage_dir) {
        error!(
            "Error creating storage directory {}: {e}",
            config.storage_dir.display()
        );
        return;
    }

    let handlers = default_handlers(
        &config,
        Arc::new(JsonlStore::new(config.storage_dir.join("spans.jsonl"))),
        Arc::new(JsonlStore::new(config.storage_dir.join("agent_stats.jsonl"))),
        Arc::new(JsonlStore::new(config.storage_dir.join("api_metadata.jsonl"))),
        Arc::new(JsonlStore::new(config.storage_dir.join("agent_info.jsonl"))),
    );
    let router = Arc::new(IngestRouter::new(handlers));

    let cancel = CancellationToken::new();
    let server = IngestServer::new(Arc::clone(&config), router, cancel.clone());

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Error binding ingest listener: {e}");
            return;
        }
    };

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            error!("Ingest server terminated with error: {e}");
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }

    cancel.cancel();
    if let Err(e) = server_task.await {
        error!("Ingest server task failed during shutdown: {e}");
    }
    info!("Collector stopped");
}
