mod api;
mod app;
mod config;
mod domain;
mod error;
mod logging;
mod middleware;
mod pipeline;
mod routes;
mod services;

use anyhow::{Context, Result};
use std::sync::Arc;

use domain::ProcessingJob;
use services::{CompletionClient, HttpCompletionClient, MemoryStore, RedisStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        data_dir = %settings.data_dir.display(),
        "Starting RFP intake service"
    );

    for dir in [
        settings.upload_dir(),
        settings.extraction_dir(),
        settings.sections_dir(),
        settings.debug_dir(),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // Job registry: Redis when configured, otherwise process memory
    let jobs: Arc<dyn Store<ProcessingJob>> = match &settings.redis_url {
        Some(url) => {
            let store = RedisStore::<ProcessingJob>::new(url, "job", settings.job_ttl()).await?;
            tracing::info!("Redis job store initialized");
            Arc::new(store)
        }
        None => {
            tracing::info!("REDIS_URL not set - jobs kept in memory");
            Arc::new(MemoryStore::<ProcessingJob>::new())
        }
    };

    // Create completion service client
    let completion = HttpCompletionClient::new(
        &settings.completion_api_url,
        &settings.completion_api_key,
        settings.completion_timeout_seconds,
    )?;

    // Check completion service health (non-blocking)
    tokio::spawn({
        let completion = completion.clone();
        async move {
            match completion.health_check().await {
                Ok(()) => tracing::info!("Completion service is reachable"),
                Err(e) => tracing::warn!(error = %e, "Completion service health check failed - will retry on first extraction"),
            }
        }
    });

    // Create application state
    let state = app::AppState::new(settings.clone(), Arc::new(completion), jobs);

    // Purge expired jobs in the background
    state.pipeline.clone().start_sweeper(settings.job_sweep_interval());

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
