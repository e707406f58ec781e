//! Command-line surface: parses flags and overrides config values.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "corehttpd", version, about = "Concurrent HTTP/1.1 static file server")]
pub struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", default_value = "server.conf")]
    pub config: PathBuf,

    /// Port to listen on (overrides config file)
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Number of workers (overrides config file)
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Threads per worker (overrides config file)
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Run in the background. Not implemented: daemonization is out of
    /// scope for this engine; accepted for CLI compatibility.
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,

    /// Enable verbose (debug-level) logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    /// Applies CLI overrides on top of a loaded config.
    pub fn apply(&self, config: &mut crate::config::Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.num_workers = workers.max(1);
        }
        if let Some(threads) = self.threads {
            config.threads_per_worker = threads.max(1);
        }
    }
}
