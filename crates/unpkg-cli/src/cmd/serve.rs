//! Serve command

use anyhow::{Context, Result};
use std::net::SocketAddr;

use unpkg_core::{Config, Unpkg};

use crate::server;
use crate::server::metrics::Metrics;

/// Run the HTTP server until interrupted.
pub async fn serve(config: &Config, listen: SocketAddr, metrics: bool) -> Result<()> {
    let app = Unpkg::from_config(config).context("Failed to build HTTP client")?;
    let metrics = if metrics {
        Some(Metrics::new().context("Failed to register metrics")?)
    } else {
        None
    };
    server::serve(app, listen, metrics).await
}
