//! # earwig-server
//!
//! HTTP dashboard binary for earwig.
//!
//! Serves the device registry, pairing/connection operations, and capture
//! session control over a REST API with an OpenAPI description.
//!
//! ## Running
//!
//! ```bash
//! EARWIG_ENV=production ./earwig-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use earwig_core::Config;
use earwig_server::{api, logging, state::AppState};

/// Port the original dashboard always listened on.
const DEFAULT_PORT: u16 = 5000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("EARWIG_ENV").as_deref() == Ok("production");
    logging::init(is_production)?;

    info!("Starting earwig-server");

    let config = Config::load_or_detect(&Config::default_path())?;
    let state = Arc::new(AppState::new(config));
    let app = api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT));
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
