//! Package identifiers: `name[@version][/path]`.

use thiserror::Error;

use crate::types::{PackageName, Version};

/// Version spec used when a request names no version.
pub const LATEST: &str = "latest";

/// Reasons an identifier string cannot be turned into a [`PackageRef`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing before the version or path separator.
    #[error("Missing package name in '{0}'")]
    EmptyName(String),

    /// A scoped name without the `/name` part (e.g. `@babel`).
    #[error("Incomplete scoped package name in '{0}'")]
    IncompleteScope(String),

    /// The subpath tried to leave the package directory.
    #[error("Invalid path segment in '{0}'")]
    InvalidPath(String),
}

/// A request decomposed into its parts. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    /// Package name, possibly scoped.
    pub name: PackageName,
    /// Concrete version, range, or dist-tag as requested.
    pub version_spec: String,
    /// Path inside the package without a leading `/`; may be empty.
    pub subpath: String,
    /// The request ended with `/` and asks for a directory listing.
    pub is_directory: bool,
}

impl PackageRef {
    /// Parse `[/]name[@version][/path]`.
    ///
    /// A missing or empty version becomes [`LATEST`]; a trailing `/` marks a
    /// directory request and is kept on the subpath.
    ///
    /// # Errors
    ///
    /// Fails on an empty name, an incomplete scope, or a subpath containing
    /// `.`/`..` segments.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let s = input.strip_prefix('/').unwrap_or(input);

        // The name ends at the first '/' (or the second one for scoped names)
        let name_end = if s.starts_with('@') {
            let slash = s
                .find('/')
                .ok_or_else(|| ParseError::IncompleteScope(input.to_string()))?;
            s[slash + 1..].find('/').map_or(s.len(), |i| slash + 1 + i)
        } else {
            s.find('/').unwrap_or(s.len())
        };

        let (name_ver, rest) = s.split_at(name_end);
        let rest = rest.strip_prefix('/');

        // Skip the scope marker when looking for the version separator
        let at = name_ver
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '@')
            .map(|(i, _)| i);
        let (name, version) = match at {
            Some(i) => (&name_ver[..i], &name_ver[i + 1..]),
            None => (name_ver, ""),
        };

        if name.is_empty() {
            return Err(ParseError::EmptyName(input.to_string()));
        }
        if let Some(scoped) = name.strip_prefix('@') {
            let mut parts = scoped.splitn(2, '/');
            let scope = parts.next().unwrap_or_default();
            let bare = parts.next().unwrap_or_default();
            if scope.is_empty() || bare.is_empty() {
                return Err(ParseError::IncompleteScope(input.to_string()));
            }
        }

        let subpath = rest.unwrap_or_default();
        if subpath
            .split('/')
            .any(|seg| seg == ".." || seg == "." || seg.contains('\\'))
        {
            return Err(ParseError::InvalidPath(input.to_string()));
        }

        let version_spec = if version.is_empty() { LATEST } else { version };

        Ok(Self {
            name: PackageName::new(name),
            version_spec: version_spec.to_string(),
            subpath: subpath.to_string(),
            is_directory: s.ends_with('/'),
        })
    }

    /// Rebuild the identifier as `name@version[/subpath]`.
    ///
    /// A directory request for the package root renders as `name@version/`.
    pub fn canonical(&self) -> String {
        let mut s = format!("{}@{}", self.name, self.version_spec);
        if !self.subpath.is_empty() {
            s.push('/');
            s.push_str(&self.subpath);
        } else if self.is_directory {
            s.push('/');
        }
        s
    }

    /// The same request pinned to a concrete version.
    pub fn with_version(&self, version: &Version) -> Self {
        Self {
            version_spec: version.to_string(),
            ..self.clone()
        }
    }

    /// Whether the requested spec already is the given concrete version.
    pub fn is_pinned_to(&self, version: &Version) -> bool {
        *version == self.version_spec
    }
}

impl std::str::FromStr for PackageRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
