//! Runtime configuration for the resolver and its collaborators.

use std::path::PathBuf;
use std::time::Duration;

/// Public npm registry.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Settings injected into [`crate::Unpkg`]; nothing in the core reads globals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding extracted packages.
    pub cache_dir: PathBuf,
    /// Base URL of the npm-compatible registry.
    pub registry_url: String,
    /// How long a range/tag resolution (`latest`, `^1.0.0`) stays cached.
    pub metadata_ttl: Duration,
    /// Period of the eviction sweep; zero disables it.
    pub sweep_interval: Duration,
    /// Upper bound for a single registry lookup.
    pub registry_timeout: Duration,
    /// Upper bound for downloading, verifying and extracting one tarball.
    pub download_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: crate::paths::default_cache_dir(),
            registry_url: DEFAULT_REGISTRY.to_string(),
            metadata_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(300),
            registry_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(120),
        }
    }
}
