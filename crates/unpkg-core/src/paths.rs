use dirs::cache_dir;
use std::path::{Path, PathBuf};

use unpkg_schema::ResolvedPackage;

/// Returns the unpkg home directory, or None if no platform cache dir exists.
pub fn try_unpkg_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("UNPKG_HOME") {
        return Some(PathBuf::from(val));
    }
    cache_dir().map(|c| c.join("unpkg"))
}

/// Default package cache: `$UNPKG_HOME/cache`, falling back to `./cache`.
pub fn default_cache_dir() -> PathBuf {
    try_unpkg_home().map_or_else(|| PathBuf::from("cache"), |h| h.join("cache"))
}

/// Directory a package version is extracted into: `<root>/<name>-<version>`.
pub fn package_dir(root: &Path, pkg: &ResolvedPackage) -> PathBuf {
    root.join(pkg.dir_name())
}

/// Staging area for in-progress extractions (same volume as the cache, so
/// the final rename is atomic).
pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(".tmp")
}
