//! Shared types for unpkg: package identifiers, registry metadata and
//! tarball digests.

pub mod hash;
pub mod ident;
pub mod types;

// Re-exports
pub use hash::*;
pub use ident::{LATEST, PackageRef, ParseError};
pub use types::*;
