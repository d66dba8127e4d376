//! Request orchestration: metadata lookup, version pinning, download.

use parking_lot::Mutex;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use unpkg_schema::{PackageRef, ResolvedPackage};

use crate::cache::{MetadataCache, Sweeper};
use crate::config::Config;
use crate::error::Error;
use crate::io::download::Downloader;
use crate::paths;
use crate::registry::{NpmRegistry, Registry};

/// What a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The request named a range or tag; retry with this pinned identifier.
    Redirect(PackageRef),
    /// The package is on disk and `path` is what the request points at.
    Local(LocalTarget),
}

/// A file or directory inside an extracted package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    pub path: PathBuf,
    pub is_directory: bool,
    pub package: ResolvedPackage,
}

/// Shared service state: metadata cache, registry client and download
/// coordinator. One instance per process, passed to request handlers.
pub struct Unpkg {
    cache: MetadataCache,
    registry: Arc<dyn Registry>,
    downloader: Downloader,
    cache_dir: PathBuf,
    sweeper: Mutex<Option<Sweeper>>,
}

impl std::fmt::Debug for Unpkg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unpkg")
            .field("cache", &self.cache)
            .field("downloader", &self.downloader)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl Unpkg {
    /// Build the service and start the metadata eviction task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config, registry: Arc<dyn Registry>, client: Client) -> Self {
        let cache = MetadataCache::new(config.metadata_ttl);
        let sweeper = cache.spawn_sweeper(config.sweep_interval);
        let downloader = Downloader::new(
            client,
            paths::staging_dir(&config.cache_dir),
            config.download_timeout,
        );

        Self {
            cache,
            registry,
            downloader,
            cache_dir: config.cache_dir.clone(),
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Build the service against the npm registry named in `config`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        let registry = NpmRegistry::new(
            client.clone(),
            &config.registry_url,
            config.registry_timeout,
        );
        Ok(Self::new(config, Arc::new(registry), client))
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Stop the eviction task. Safe to call more than once.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }

    /// Metadata for `req`, from the cache or the registry.
    ///
    /// Registry failures are returned as-is and never cached.
    pub async fn resolve(&self, req: &PackageRef) -> Result<ResolvedPackage, Error> {
        if let Some(pkg) = self.cache.lookup(&req.name, &req.version_spec) {
            debug!(name = %req.name, spec = %req.version_spec, "Metadata cache hit");
            return Ok(pkg);
        }

        let pkg = self.registry.resolve(&req.name, &req.version_spec).await?;
        self.cache.store(&pkg, &[req.version_spec.as_str()]);
        debug!(
            name = %req.name,
            spec = %req.version_spec,
            version = %pkg.version,
            "Resolved from registry"
        );
        Ok(pkg)
    }

    /// Resolve `req` and make the package available on disk.
    ///
    /// A request whose spec is not already the concrete version is answered
    /// with [`Resolution::Redirect`] before anything is downloaded.
    pub async fn resolve_and_ensure_local(&self, req: &PackageRef) -> Result<Resolution, Error> {
        let pkg = self.resolve(req).await?;

        if !req.is_pinned_to(&pkg.version) {
            return Ok(Resolution::Redirect(req.with_version(&pkg.version)));
        }

        let subpath = if req.subpath.is_empty() && !req.is_directory {
            pkg.entry_point()
                .ok_or_else(|| Error::NoEntryPoint {
                    name: pkg.name.to_string(),
                    version: pkg.version.to_string(),
                })?
                .to_string()
        } else {
            req.subpath.clone()
        };

        let dest = paths::package_dir(&self.cache_dir, &pkg);
        self.downloader
            .ensure_available(&pkg.tarball_url, &pkg.integrity, &dest)
            .await?;

        let mut path = dest.join(&subpath);
        if req.subpath.is_empty() && !req.is_directory {
            path = with_js_fallback(path).await;
        }

        Ok(Resolution::Local(LocalTarget {
            path,
            is_directory: req.is_directory,
            package: pkg,
        }))
    }
}

/// `main: "lib/index"` conventionally means `lib/index.js`.
async fn with_js_fallback(path: PathBuf) -> PathBuf {
    if tokio::fs::try_exists(&path).await.unwrap_or(false) || path.extension().is_some() {
        return path;
    }
    let mut js = path.clone().into_os_string();
    js.push(".js");
    let js = PathBuf::from(js);
    if tokio::fs::try_exists(&js).await.unwrap_or(false) {
        js
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use mockito::{Mock, Server, ServerGuard};
    use std::time::Duration;
    use unpkg_schema::{Algorithm, Integrity};

    fn left_pad_tgz() -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in [
            ("package/package.json", r#"{"name":"left-pad","version":"1.3.0","main":"index"}"#),
            ("package/index.js", "module.exports = leftPad;"),
            ("package/lib/util.js", "exports.pad = 1;"),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, data.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn version_doc(server: &ServerGuard, shasum: &str, main: Option<&str>) -> String {
        let main = main.map_or_else(String::new, |m| format!(r#""main": "{m}","#));
        format!(
            r#"{{
                "name": "left-pad",
                "version": "1.3.0",
                {main}
                "dist": {{
                    "shasum": "{shasum}",
                    "tarball": "{}/left-pad/-/left-pad-1.3.0.tgz"
                }}
            }}"#,
            server.url()
        )
    }

    async fn mock_registry(server: &mut ServerGuard, spec: &str, body: &str, hits: usize) -> Mock {
        server
            .mock("GET", format!("/left-pad/{spec}").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    async fn mock_tarball(server: &mut ServerGuard, body: Vec<u8>, hits: usize) -> Mock {
        server
            .mock("GET", "/left-pad/-/left-pad-1.3.0.tgz")
            .with_status(200)
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    fn service(server: &ServerGuard, cache_dir: &Path) -> Unpkg {
        let config = Config {
            cache_dir: cache_dir.to_path_buf(),
            registry_url: server.url(),
            metadata_ttl: Duration::from_secs(60),
            sweep_interval: Duration::ZERO,
            registry_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(30),
        };
        Unpkg::from_config(&config).unwrap()
    }

    fn local(res: Resolution) -> LocalTarget {
        match res {
            Resolution::Local(target) => target,
            Resolution::Redirect(to) => panic!("unexpected redirect to {to}"),
        }
    }

    #[tokio::test]
    async fn pinned_request_is_served_locally() {
        let dir = tempfile::tempdir().unwrap();
        let tgz = left_pad_tgz();
        let shasum = Integrity::compute(Algorithm::Sha1, &tgz);
        let mut server = Server::new_async().await;
        let body = version_doc(&server, shasum.as_str(), Some("index.js"));
        let meta = mock_registry(&mut server, "1.3.0", &body, 1).await;
        let tarball = mock_tarball(&mut server, tgz, 1).await;

        let unpkg = service(&server, dir.path());
        let req = PackageRef::parse("left-pad@1.3.0/index.js").unwrap();
        let target = local(unpkg.resolve_and_ensure_local(&req).await.unwrap());

        assert_eq!(target.path, dir.path().join("left-pad-1.3.0").join("index.js"));
        assert!(!target.is_directory);
        assert_eq!(
            std::fs::read_to_string(&target.path).unwrap(),
            "module.exports = leftPad;"
        );

        // Same version again: metadata and tarball both come from cache
        let req = PackageRef::parse("left-pad@1.3.0/package.json").unwrap();
        let target = local(unpkg.resolve_and_ensure_local(&req).await.unwrap());
        assert!(target.path.ends_with("left-pad-1.3.0/package.json"));

        meta.assert_async().await;
        tarball.assert_async().await;
    }

    #[tokio::test]
    async fn tag_redirects_before_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let body = version_doc(&server, &"0".repeat(40), Some("index.js"));
        let meta = mock_registry(&mut server, "latest", &body, 1).await;
        let tarball = mock_tarball(&mut server, Vec::new(), 0).await;

        let unpkg = service(&server, dir.path());
        let req = PackageRef::parse("left-pad@latest/index.js").unwrap();

        for _ in 0..2 {
            let res = unpkg.resolve_and_ensure_local(&req).await.unwrap();
            let Resolution::Redirect(to) = res else {
                panic!("expected redirect");
            };
            assert_eq!(to.canonical(), "left-pad@1.3.0/index.js");
        }

        // The pinned version was cached alongside the tag
        assert_eq!(unpkg.cache().len(), (1, 1));
        meta.assert_async().await;
        tarball.assert_async().await;
        assert!(!dir.path().join("left-pad-1.3.0").exists());
    }

    #[tokio::test]
    async fn bare_request_serves_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let tgz = left_pad_tgz();
        let shasum = Integrity::compute(Algorithm::Sha1, &tgz);
        let mut server = Server::new_async().await;
        let body = version_doc(&server, shasum.as_str(), Some("./index"));
        let _meta = mock_registry(&mut server, "1.3.0", &body, 1).await;
        let _tarball = mock_tarball(&mut server, tgz, 1).await;

        let unpkg = service(&server, dir.path());
        let req = PackageRef::parse("left-pad@1.3.0").unwrap();
        let target = local(unpkg.resolve_and_ensure_local(&req).await.unwrap());

        assert_eq!(target.path, dir.path().join("left-pad-1.3.0").join("index.js"));

        let req = PackageRef::parse("left-pad@1.3.0/lib/").unwrap();
        let target = local(unpkg.resolve_and_ensure_local(&req).await.unwrap());
        assert!(target.is_directory);
        assert!(target.path.join("util.js").exists());
    }

    #[tokio::test]
    async fn missing_entry_point_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let body = version_doc(&server, &"0".repeat(40), None);
        let _meta = mock_registry(&mut server, "1.3.0", &body, 1).await;
        let tarball = mock_tarball(&mut server, Vec::new(), 0).await;

        let unpkg = service(&server, dir.path());
        let req = PackageRef::parse("left-pad@1.3.0").unwrap();
        let err = unpkg.resolve_and_ensure_local(&req).await.unwrap_err();

        assert!(matches!(err, Error::NoEntryPoint { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        tarball.assert_async().await;
    }

    #[tokio::test]
    async fn integrity_failure_is_reported_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let body = version_doc(&server, &"0".repeat(40), Some("index.js"));
        let _meta = mock_registry(&mut server, "1.3.0", &body, 1).await;
        let _tarball = mock_tarball(&mut server, left_pad_tgz(), 1).await;

        let unpkg = service(&server, dir.path());
        let req = PackageRef::parse("left-pad@1.3.0/index.js").unwrap();
        let err = unpkg.resolve_and_ensure_local(&req).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!dir.path().join("left-pad-1.3.0").exists());
    }

    #[tokio::test]
    async fn registry_failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new_async().await;
        let missing = server
            .mock("GET", "/left-pad/9.9.9")
            .with_status(404)
            .expect(2)
            .create_async()
            .await;

        let unpkg = service(&server, dir.path());
        let req = PackageRef::parse("left-pad@9.9.9/index.js").unwrap();
        for _ in 0..2 {
            let err = unpkg.resolve_and_ensure_local(&req).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        assert!(unpkg.cache().is_empty());
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn registry_timeout_is_reported_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and hold them open without answering.
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            registry_url: format!("http://{addr}"),
            metadata_ttl: Duration::from_secs(60),
            sweep_interval: Duration::ZERO,
            registry_timeout: Duration::from_millis(300),
            download_timeout: Duration::from_secs(30),
        };
        let unpkg = Unpkg::from_config(&config).unwrap();
        let req = PackageRef::parse("left-pad@latest/index.js").unwrap();

        let err = unpkg.resolve_and_ensure_local(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(unpkg.cache().is_empty());
        assert!(!dir.path().join("left-pad-1.3.0").exists());
        silent.abort();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let unpkg = Unpkg::from_config(&config).unwrap();
        unpkg.shutdown().await;
        unpkg.shutdown().await;
    }
}
