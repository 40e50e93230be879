//! Subcommand implementations.

pub mod config;
pub mod render;
pub mod serve;
