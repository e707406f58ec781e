//! Configuration file loading.
//!
//! Line-oriented `KEY=VALUE`, `#` comments, blank lines ignored. The CLI
//! (`src/cli.rs`) overrides whatever is loaded here.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::queue::MAX_QUEUE_SIZE;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub num_workers: usize,
    pub threads_per_worker: usize,
    pub max_queue_size: usize,
    pub document_root: PathBuf,
    pub log_file: PathBuf,
    pub cache_size_mb: i64,
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            num_workers: 1,
            threads_per_worker: 1,
            max_queue_size: MAX_QUEUE_SIZE,
            document_root: PathBuf::from("www"),
            log_file: PathBuf::from("access.log"),
            cache_size_mb: 10,
            timeout_seconds: 30,
        }
    }
}

impl Config {
    /// Loads a config file on top of the defaults. Missing keys keep
    /// their default value; unknown keys are ignored.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Config::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            config.apply(key, value);
        }

        config.max_queue_size = config.max_queue_size.clamp(1, MAX_QUEUE_SIZE);
        config.num_workers = config.num_workers.max(1);
        config.threads_per_worker = config.threads_per_worker.max(1);
        if config.cache_size_mb <= 0 {
            config.cache_size_mb = Config::default().cache_size_mb;
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "PORT" => {
                if let Ok(v) = value.parse() {
                    self.port = v;
                }
            }
            "NUM_WORKERS" => {
                if let Ok(v) = value.parse() {
                    self.num_workers = v;
                }
            }
            "THREADS_PER_WORKER" => {
                if let Ok(v) = value.parse() {
                    self.threads_per_worker = v;
                }
            }
            "MAX_QUEUE_SIZE" => {
                if let Ok(v) = value.parse() {
                    self.max_queue_size = v;
                }
            }
            "DOCUMENT_ROOT" => self.document_root = PathBuf::from(value),
            "LOG_FILE" => self.log_file = PathBuf::from(value),
            "CACHE_SIZE_MB" => {
                if let Ok(v) = value.parse() {
                    self.cache_size_mb = v;
                }
            }
            "TIMEOUT_SECONDS" => {
                if let Ok(v) = value.parse() {
                    self.timeout_seconds = v;
                }
            }
            _ => {}
        }
    }

    pub fn cache_max_bytes(&self) -> u64 {
        (self.cache_size_mb.max(1) as u64) * 1024 * 1024
    }

    pub fn total_threads(&self) -> usize {
        self.num_workers * self.threads_per_worker
    }
}
