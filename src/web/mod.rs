//! Web control panel
//!
//! Read-only fleet status plus a manual trigger endpoint, served over the
//! pre-bound listener socket. Every request passes the same access policy
//! the magic packet listener enforces, except that denied web clients get
//! an explicit 403 instead of silence.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::state::AppState;

/// Serve the web interface over a socket bound by the privilege sequencer
pub async fn serve(listener: std::net::TcpListener, state: Arc<AppState>) -> Result<()> {
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    info!("Web interface serving on {}", listener.local_addr()?);

    let router = create_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
