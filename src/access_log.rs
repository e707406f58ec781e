//! Buffered, rotating access log.
//!
//! One mutex held for the entire format-append-maybe-flush-maybe-rotate
//! sequence, an 8 KiB in-memory buffer, a 10 MiB rotation threshold, and
//! a dated rename on rotation. `chrono` supplies local-time formatting
//! with a UTC offset, which `std::time` has no way to produce without a
//! hand-rolled timezone table.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

const BUFFER_CAPACITY: usize = 8 * 1024;
const ROTATE_THRESHOLD: u64 = 10 * 1024 * 1024;

struct LogState {
    file: File,
    path: PathBuf,
    buffer: Vec<u8>,
    file_size: u64,
}

pub struct AccessLog {
    state: Mutex<LogState>,
}

impl AccessLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_size = file.metadata()?.len();
        Ok(AccessLog {
            state: Mutex::new(LogState {
                file,
                path: path.to_path_buf(),
                buffer: Vec::with_capacity(BUFFER_CAPACITY),
                file_size,
            }),
        })
    }

    /// Appends one Apache-common-log-shaped line.
    pub fn log(
        &self,
        client_addr: Option<SocketAddr>,
        method: &str,
        path: &str,
        version: &str,
        status: u16,
        bytes: u64,
    ) {
        let ip = client_addr
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|| "-".to_string());
        let timestamp = Local::now().format("%d/%b/%Y:%H:%M:%S %z");
        let line = format!(
            "{ip} - - [{timestamp}] \"{method} {path} {version}\" {status} {bytes}\n"
        );
        let line_bytes = line.as_bytes();

        let mut state = self.state.lock();

        if state.file_size + state.buffer.len() as u64 + line_bytes.len() as u64 > ROTATE_THRESHOLD
        {
            Self::rotate_locked(&mut state);
        }

        if line_bytes.len() > BUFFER_CAPACITY {
            Self::flush_locked(&mut state);
            if Self::write_direct(&mut state, line_bytes).is_err() {
                // Disk full or similar: drop this line and keep serving.
            }
            return;
        }

        if state.buffer.len() + line_bytes.len() > BUFFER_CAPACITY {
            Self::flush_locked(&mut state);
        }

        state.buffer.extend_from_slice(line_bytes);

        if state.buffer.len() >= BUFFER_CAPACITY / 2 {
            Self::flush_locked(&mut state);
        }
    }

    fn write_direct(state: &mut LogState, bytes: &[u8]) -> io::Result<()> {
        state.file.write_all(bytes)?;
        state.file.flush()?;
        state.file_size += bytes.len() as u64;
        Ok(())
    }

    fn flush_locked(state: &mut LogState) {
        if state.buffer.is_empty() {
            return;
        }
        match state.file.write_all(&state.buffer) {
            Ok(()) => {
                let _ = state.file.flush();
                state.file_size += state.buffer.len() as u64;
            }
            Err(_) => {
                // Log write failure: drop buffered bytes, keep serving.
            }
        }
        state.buffer.clear();
    }

    fn rotate_locked(state: &mut LogState) {
        Self::flush_locked(state);
        let suffix = Local::now().format("%Y-%m-%d-%H-%M-%S");
        let rotated = format!("{}.{}", state.path.display(), suffix);
        let _ = fs::rename(&state.path, &rotated);
        match OpenOptions::new().create(true).append(true).open(&state.path) {
            Ok(file) => {
                state.file = file;
                state.file_size = 0;
            }
            Err(_) => {
                // Keep writing to the old (now-renamed) handle if we
                // can't reopen; better than losing subsequent lines.
            }
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn log_line_is_apache_common_log_shaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let log = AccessLog::open(&path).unwrap();

        log.log(None, "GET", "/index.html", "HTTP/1.1", 200, 5);
        log.shutdown();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"GET /index.html HTTP/1.1\" 200 5"));
        assert!(contents.starts_with("- - - ["));
    }

    #[test]
    fn flush_half_full_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let log = AccessLog::open(&path).unwrap();

        // Each line is small; write enough to cross the half-full mark
        // and confirm bytes actually land on disk without an explicit
        // shutdown.
        for _ in 0..2000 {
            log.log(None, "GET", "/a", "HTTP/1.1", 200, 1);
        }

        let on_disk = fs::metadata(&path).unwrap().len();
        assert!(on_disk > 0, "buffer should have flushed before shutdown");
    }

    #[test]
    fn shutdown_flushes_remaining_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let log = AccessLog::open(&path).unwrap();

        log.log(None, "GET", "/tiny", "HTTP/1.1", 200, 0);
        log.shutdown();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("/tiny"));
    }

    #[test]
    fn rotation_renames_with_dated_suffix_and_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let log = AccessLog::open(&path).unwrap();

        // Pre-seed the file to just under the rotation threshold so the
        // next line pushes it over.
        {
            let mut state = log.state.lock();
            state.file_size = ROTATE_THRESHOLD - 10;
        }

        log.log(None, "GET", "/after-rotation", "HTTP/1.1", 200, 3);
        log.shutdown();

        let mut entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();

        assert!(
            entries.iter().any(|name| name.starts_with("access.log.")),
            "expected a rotated file, got {entries:?}"
        );
        let fresh = fs::read_to_string(&path).unwrap();
        assert!(fresh.contains("/after-rotation"));
    }
}
