//! unpkg - serve files from npm packages
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Requests name a file inside a published package, e.g.
//! `/react@16.8.0/umd/react.production.min.js`. Ranges and tags are pinned to
//! a concrete version with a redirect, and each package version is downloaded
//! and extracted into the cache directory once.
//!
//! # Cache Layout
//!
//! ```text
//! $UNPKG_HOME/cache/
//! ├── .tmp/               # Extractions in progress
//! ├── left-pad-1.3.0/     # One directory per name + version
//! └── @babel/
//!     └── core-7.24.0/
//! ```

pub mod cmd;
pub mod listing;
pub mod server;

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use unpkg_core::Config;
use unpkg_core::config::DEFAULT_REGISTRY;

#[derive(Debug, Parser)]
#[command(name = "unpkg")]
#[command(author, version, about = "unpkg - serve files from npm packages")]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Directory holding extracted packages
    #[arg(long, global = true, env = "UNPKG_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// npm-compatible registry base URL
    #[arg(long, global = true, env = "UNPKG_REGISTRY", default_value = DEFAULT_REGISTRY)]
    pub registry: String,

    /// Seconds a tag or range resolution stays cached
    #[arg(long, global = true, env = "UNPKG_CACHE_TTL", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Seconds between cache eviction sweeps (defaults to the TTL, 0 disables)
    #[arg(long, global = true, env = "UNPKG_SWEEP_INTERVAL")]
    pub sweep_interval_secs: Option<u64>,

    /// Timeout for a single registry lookup
    #[arg(long, global = true, env = "UNPKG_REGISTRY_TIMEOUT", default_value_t = 10)]
    pub registry_timeout_secs: u64,

    /// Timeout for downloading and extracting one tarball
    #[arg(long, global = true, env = "UNPKG_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    pub download_timeout_secs: u64,
}

impl ConfigArgs {
    pub fn to_config(&self) -> Config {
        let defaults = Config::default();
        Config {
            cache_dir: self.cache_dir.clone().unwrap_or(defaults.cache_dir),
            registry_url: self.registry.clone(),
            metadata_ttl: Duration::from_secs(self.cache_ttl_secs),
            sweep_interval: Duration::from_secs(
                self.sweep_interval_secs.unwrap_or(self.cache_ttl_secs),
            ),
            registry_timeout: Duration::from_secs(self.registry_timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(long, env = "UNPKG_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
        /// Expose Prometheus request counters on /metrics
        #[arg(
            long,
            env = "UNPKG_METRICS",
            default_value_t = true,
            action = clap::ArgAction::Set
        )]
        metrics: bool,
    },
    /// Print a file or directory listing from a package
    Get {
        /// Package identifier: name[@version][/path], e.g. react@^16/index.js
        identifier: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_interval_follows_ttl() {
        let cli = Cli::parse_from(["unpkg", "--cache-ttl-secs", "60", "get", "react"]);
        let config = cli.config.to_config();
        assert_eq!(config.metadata_ttl, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.registry_url, DEFAULT_REGISTRY);
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let cli = Cli::parse_from([
            "unpkg",
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--sweep-interval-secs",
            "0",
            "--cache-dir",
            "/srv/unpkg",
        ]);
        let config = cli.config.to_config();
        assert!(config.sweep_interval.is_zero());
        assert_eq!(config.cache_dir, PathBuf::from("/srv/unpkg"));
        let Commands::Serve { listen, metrics } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(listen.port(), 9000);
        assert!(metrics);
    }

    #[test]
    fn metrics_can_be_disabled() {
        let cli = Cli::parse_from(["unpkg", "serve", "--metrics", "false"]);
        let Commands::Serve { metrics, .. } = cli.command else {
            panic!("expected serve");
        };
        assert!(!metrics);
    }
}
