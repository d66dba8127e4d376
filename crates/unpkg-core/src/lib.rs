pub mod cache;
pub mod config;
pub mod error;
pub mod io;
pub mod paths;
pub mod registry;
pub mod resolver;

pub use cache::{MetadataCache, Sweeper};
pub use config::Config;
pub use error::{Error, ErrorKind};
pub use io::download::{DownloadError, Downloader};
pub use registry::{NpmRegistry, Registry, RegistryError};
pub use resolver::{LocalTarget, Resolution, Unpkg};

/// User Agent string for registry and tarball requests
pub const USER_AGENT: &str = concat!("unpkg/", env!("CARGO_PKG_VERSION"));
