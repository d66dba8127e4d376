//! Subcommand entry points

pub mod get;
pub mod serve;
