//! npm registry client.
//!
//! Only the per-version document (`GET /<name>/<spec>`) is used: the registry
//! resolves ranges and dist-tags itself, so one request yields the concrete
//! version, the tarball location and its digest.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use unpkg_schema::{Integrity, PackageName, ResolvedPackage, Version};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Package {name}@{spec} not found in registry")]
    NotFound { name: String, spec: String },

    #[error("Registry returned {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Registry lookup for {url} timed out")]
    Timeout { url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed registry response for {name}: {reason}")]
    Malformed { name: String, reason: String },
}

/// Something that can turn `name` + version spec into concrete metadata.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolve `spec` (a version, range or dist-tag) for `name`.
    async fn resolve(
        &self,
        name: &PackageName,
        spec: &str,
    ) -> Result<ResolvedPackage, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    version: String,
    #[serde(default)]
    main: Option<serde_json::Value>,
    // `browser` may also be an object of path replacements; only the string form names an entry
    #[serde(default)]
    browser: Option<serde_json::Value>,
    dist: Dist,
}

#[derive(Debug, Deserialize)]
struct Dist {
    tarball: String,
    #[serde(default)]
    shasum: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
}

/// Client for an npm-compatible registry.
#[derive(Debug, Clone)]
pub struct NpmRegistry {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl NpmRegistry {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn document_url(&self, name: &PackageName, spec: &str) -> String {
        // Scoped names travel as a single path segment: @scope%2fname
        format!("{}/{}/{spec}", self.base_url, name.replace('/', "%2f"))
    }

    fn build_package(
        &self,
        name: &PackageName,
        doc: VersionDocument,
    ) -> Result<ResolvedPackage, RegistryError> {
        let malformed = |reason: String| RegistryError::Malformed {
            name: name.to_string(),
            reason,
        };

        let version = Version::parse(&doc.version)
            .map_err(|e| malformed(format!("version '{}': {e}", doc.version)))?;

        let integrity = match (doc.dist.integrity.as_deref(), doc.dist.shasum.as_deref()) {
            (Some(sri), _) => Integrity::from_sri(sri),
            (None, Some(shasum)) => Integrity::from_hex(unpkg_schema::Algorithm::Sha1, shasum),
            (None, None) => return Err(malformed("no dist.integrity or dist.shasum".into())),
        }
        .map_err(|e| malformed(e.to_string()))?;

        let mut tarball_url = doc.dist.tarball;
        if self.base_url.starts_with("https://") && tarball_url.starts_with("http://") {
            tarball_url = tarball_url.replacen("http://", "https://", 1);
        }

        let as_path = |v: Option<serde_json::Value>| {
            v.and_then(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
        };

        Ok(ResolvedPackage {
            name: name.clone(),
            version,
            integrity,
            tarball_url,
            main: as_path(doc.main),
            browser: as_path(doc.browser),
        })
    }
}

#[async_trait]
impl Registry for NpmRegistry {
    async fn resolve(
        &self,
        name: &PackageName,
        spec: &str,
    ) -> Result<ResolvedPackage, RegistryError> {
        let url = self.document_url(name, spec);
        debug!(%url, "Querying registry");

        let timed_out = |e: reqwest::Error| {
            if e.is_timeout() {
                RegistryError::Timeout { url: url.clone() }
            } else {
                RegistryError::Http(e)
            }
        };

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(timed_out)?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound {
                    name: name.to_string(),
                    spec: spec.to_string(),
                });
            }
            status if !status.is_success() => {
                return Err(RegistryError::BadStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body = resp.bytes().await.map_err(timed_out)?;
        let doc: VersionDocument =
            serde_json::from_slice(&body).map_err(|e| RegistryError::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        self.build_package(name, doc)
    }
}
