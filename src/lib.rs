pub mod access_log;
pub mod acceptor;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod queue;
pub mod stats;
pub mod worker;

pub use config::Config;
pub use error::{CacheError, ConfigError, StartupError};
pub use worker::ServerContext;
