//! Shared types for the jobwatch engine: backend wire payloads, configuration
//! and platform directories.

pub mod config;
pub mod platform;
pub mod protocol;
