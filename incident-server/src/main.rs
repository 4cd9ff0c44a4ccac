use anyhow::{Context, Result};
use incident_core::{Orchestrator, Settings};
use incident_server::telemetry_init::init_logging;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let settings = Settings::from_env().context("load settings")?;
    init_logging("info", settings.log_json);

    info!(
        prometheus = %settings.prometheus_url,
        knowledge = %settings.knowledge_url,
        retrieval_disabled = settings.disable_retrieval,
        ticketing = %settings.ticketing_url,
        workers = settings.enrichment_workers,
        correlation_window_secs = settings.correlation_window.as_secs(),
        "starting incident server"
    );

    // Blocking HTTP clients must be built off the async runtime.
    let pipeline_settings = settings.clone();
    let orchestrator = tokio::task::spawn_blocking(move || Orchestrator::from_settings(&pipeline_settings))
        .await
        .context("orchestrator setup task")?
        .context("build orchestrator")?;

    let app = incident_server::webhook::webhook_router(Arc::new(orchestrator));
    let addr = format!("{}:{}", settings.api_host, settings.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    info!(%addr, "incident server listening");
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
