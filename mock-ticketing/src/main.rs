use anyhow::{Context, Result};
use mock_ticketing::{TicketSequence, TicketStore, ticket_router};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let host = std::env::var("MOCK_TICKETING_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("MOCK_TICKETING_PORT").unwrap_or_else(|_| "8001".into());
    let last_issued = std::env::var("MOCK_TICKETING_START")
        .ok()
        .map(|v| v.parse::<u64>())
        .transpose()
        .context("parse MOCK_TICKETING_START")?
        .unwrap_or(1000);

    let store = Arc::new(TicketStore::new(TicketSequence::after(last_issued)));
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    info!(%addr, "mock ticketing listening");
    axum::serve(listener, ticket_router(store)).await.context("serve")?;
    Ok(())
}
