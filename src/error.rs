//! Error types for the core engine.
//!
//! Per the error handling design, workers never propagate these across
//! requests — each variant is translated to an HTTP status at the call
//! site and the connection continues or closes; it never unwinds past
//! `handle_connection`.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("file not found or unreadable: {path}")]
    NotFound { path: PathBuf, source: io::Error },
    #[error("not a regular file: {path}")]
    NotRegular { path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("failed to open access log {path}: {source}")]
    Log { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
