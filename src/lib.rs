//! Backend of a personal site's comment board.
//!
//!
//!
//! # General Infrastructure
//! - Browser talks only to the **site** service
//! - Site verifies the visitor with Turnstile, validates forms, then calls the **proxy**
//! - Proxy is the only writer of `comments.json` in the object store
//! - Proxy and site share one static secret, sent as `X-Custom-Auth-Key`
//!
//!
//!
//! # Storage
//!
//! The whole board is one JSON array under one key. Every operation reads it in full,
//! changes it in memory, and writes it back in full.
//!
//! - Append on create, filter by timestamp on delete
//! - Timestamps are stamped by the proxy and kept unique, they are the delete key
//! - Writes are conditional on the ETag that was read, a lost race is replayed
//! - Reads never fail the page: absent or broken object means an empty board
//!
//!
//!
//! # Notes
//!
//! ## Shared Secret
//! One static, non-rotating key with no per-caller identity. Fine for a low-stakes
//! comment board, not meant to be anything more.
//!
//! ## Read Path
//! Site reads go through the authenticated proxy unless `COMMENTS_PUBLIC_URL` is set,
//! in which case every read uses that public URL instead. Never both.
//!
//!
//!
//! # Running
//!
//! Proxy.
//! ```sh
//! AUTH_KEY_SECRET=... COMMENTS_DIR=./data comment-board proxy
//! ```
//!
//! Site.
//! ```sh
//! AUTH_KEY_SECRET=... TURNSTILE_SECRET_KEY=... comment-board site
//! ```
//!
//! Logs.
//! ```sh
//! RUST_LOG=comment_board=debug comment-board proxy
//! ```
use axum::Router;
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod board;
pub mod client;
pub mod comments;
pub mod config;
pub mod error;
pub mod routes;
pub mod site;
pub mod state;
pub mod store;
pub mod verify;

use config::{ProxyConfig, SiteConfig};
use routes::proxy_router;
use site::site_router;
use state::{ProxyState, SiteState};

pub fn init_tracing() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

pub async fn start_proxy(config: ProxyConfig) -> anyhow::Result<()> {
    info!("Initializing proxy state...");
    let port = config.port;
    let state = ProxyState::new(config)?;

    serve(port, proxy_router(state)).await
}

pub async fn start_site(config: SiteConfig) -> anyhow::Result<()> {
    info!("Initializing site state...");
    let port = config.port;
    let state = SiteState::new(config)?;

    serve(port, site_router(state)).await
}

async fn serve(port: u16, app: Router) -> anyhow::Result<()> {
    let address = format!("0.0.0.0:{port}");
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
