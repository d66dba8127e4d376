//! Errors surfaced by request resolution

use thiserror::Error;
use unpkg_schema::ParseError;

use crate::io::download::DownloadError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid identifier: {0}")]
    Parse(#[from] ParseError),

    #[error("Resolution failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("{name}@{version} declares no entry point")]
    NoEntryPoint { name: String, version: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by front ends to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidIdentifier,
    NotFound,
    Resolution,
    Transport,
    Integrity,
    Extraction,
    Timeout,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::InvalidIdentifier,
            Self::NoEntryPoint { .. } => ErrorKind::NotFound,
            Self::Registry(e) => match e {
                RegistryError::NotFound { .. } => ErrorKind::NotFound,
                RegistryError::Timeout { .. } => ErrorKind::Timeout,
                RegistryError::BadStatus { .. }
                | RegistryError::Http(_)
                | RegistryError::Malformed { .. } => ErrorKind::Resolution,
            },
            Self::Download(e) => match e {
                DownloadError::Transport { .. } | DownloadError::Status { .. } => {
                    ErrorKind::Transport
                }
                DownloadError::HashMismatch { .. } => ErrorKind::Integrity,
                DownloadError::Extraction(_) => ErrorKind::Extraction,
                DownloadError::Timeout { .. } => ErrorKind::Timeout,
            },
            Self::Io(_) => ErrorKind::Extraction,
        }
    }
}
