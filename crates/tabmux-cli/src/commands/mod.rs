//! CLI subcommand implementations.

pub mod connect;
pub mod play;
pub mod recordings;
