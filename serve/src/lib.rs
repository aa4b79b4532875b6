//! HTTP surface over the Weft core.
//!
//! Minimal JSON API wired to a local adapter set: message intake, playbook
//! runs, execution control, and timeline reads. Everything routes through the
//! identity port, so the same handlers serve a remote adapter set unchanged.

mod app;
mod handlers;
mod response;

pub use app::{build_router, AppState};

use std::net::SocketAddr;
use std::sync::Arc;

use weft::{Engine, IdentityPort};

/// Binds and serves until the process ends.
pub async fn serve(
    engine: Engine,
    identity: Arc<dyn IdentityPort>,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(engine, identity);
    let router = build_router(state);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!(%addr, "weft serving");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
