//! Streaming tarball extraction.
//!
//! npm tarballs wrap every file in a single root directory (usually
//! `package/`, but not always). That component is dropped so the package
//! contents land directly in the destination.

use async_compression::tokio::bufread::GzipDecoder;
use futures::StreamExt;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_tar::Archive;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid path in archive: {0}")]
    UnsafePath(String),
}

/// Unpack a gzip-compressed tarball read from `reader` into `dest`.
///
/// Returns the number of entries written. Symlinks, hard links and other
/// special entries are skipped.
pub async fn unpack_tgz<R>(reader: R, dest: &Path) -> Result<u64, ExtractError>
where
    R: AsyncBufRead + Unpin + Send,
{
    tokio::fs::create_dir_all(dest).await?;

    let mut archive = Archive::new(GzipDecoder::new(reader));
    let mut entries = archive.entries()?;
    let mut written = 0;

    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if !entry_type.is_file() && !entry_type.is_dir() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let Some(relative) = strip_root(&path)? else {
            continue;
        };

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        entry.unpack(&target).await?;
        written += 1;
    }

    Ok(written)
}

/// Drop the archive's root directory from `path`.
///
/// Returns `None` for the root itself. Absolute paths and `..` are rejected
/// so nothing can be written outside the destination.
fn strip_root(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let unsafe_path = || ExtractError::UnsafePath(path.display().to_string());

    let mut components = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir));

    match components.next() {
        None => return Ok(None),
        Some(Component::Normal(_)) => {}
        Some(_) => return Err(unsafe_path()),
    }

    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            _ => return Err(unsafe_path()),
        }
    }

    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}
