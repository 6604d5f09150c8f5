//! Subcommand implementations

pub mod cache;
pub mod costs;
pub mod resolve;
