//! Package names, versions and resolved registry metadata.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

use crate::hash::Integrity;

/// An npm package name, optionally scoped (`@scope/name`).
///
/// Unlike most identifiers in the workspace the name is not case-folded:
/// legacy packages such as `JSONStream` are only reachable with their
/// original casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name from the given string (stored as-is).
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a scoped (`@scope/name`) package.
    pub fn is_scoped(&self) -> bool {
        self.0.starts_with('@')
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A concrete semantic version string as returned by the registry.
///
/// Ranges and dist-tags (`^1.2.0`, `latest`) are never stored in a `Version`;
/// they stay plain strings on [`crate::PackageRef`] until resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(String);

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (
            semver::Version::parse(&self.0),
            semver::Version::parse(&other.0),
        ) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Version {
    /// Parse a concrete version, rejecting ranges and tags.
    ///
    /// # Errors
    ///
    /// Returns the underlying semver error if `v` is not a plain `x.y.z[-pre][+build]`.
    pub fn parse(v: &str) -> Result<Self, semver::Error> {
        semver::Version::parse(v)?;
        Ok(Self(v.to_string()))
    }

    /// Return the version string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Version {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Version {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<String> for Version {
    fn eq(&self, other: &String) -> bool {
        self.0 == *other
    }
}

/// Registry metadata for one concrete version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Package name as requested.
    pub name: PackageName,
    /// The concrete version the registry resolved the request to.
    pub version: Version,
    /// Digest the downloaded tarball must match.
    pub integrity: Integrity,
    /// Where to download the tarball from.
    pub tarball_url: String,
    /// `main` field of the package manifest.
    pub main: Option<String>,
    /// `browser` field of the package manifest, when it is a plain path.
    pub browser: Option<String>,
}

impl ResolvedPackage {
    /// The file served for a bare `name@version` request: `browser`, then `main`.
    ///
    /// Leading `./` and `/` are dropped so the result can be joined onto a
    /// package directory. Paths climbing out of the package yield `None`.
    pub fn entry_point(&self) -> Option<&str> {
        self.browser
            .as_deref()
            .or(self.main.as_deref())
            .map(|p| p.trim_start_matches("./").trim_start_matches('/'))
            .filter(|p| !p.is_empty() && !p.split('/').any(|seg| seg == ".."))
    }

    /// Directory name of this package inside the cache root (`name-version`).
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}
