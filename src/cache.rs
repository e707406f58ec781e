//! Thread-safe LRU file cache.
//!
//! A read-then-write two-phase lookup keeps disk I/O out of any lock,
//! with a re-check under the write lock to guarantee at-most-one
//! insertion per path under concurrent misses. The hash map and
//! MRU/LRU order use `rustc_hash::FxHashMap` under a
//! `parking_lot::RwLock` rather than hand-rolled pthread rwlocks.
//!
//! `ServedBody` replaces a dual-mode "came from cache or not" boolean
//! flag with a sum type: its `Drop` does the right thing for each
//! variant, so double-free-by-omission is not representable.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::CacheError;

/// Files larger than this are served but never cached.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Bytes returned to the caller for one request. `Cached` is a shared,
/// reference-counted view into the cache; `Owned` is the caller's own
/// buffer, freed when this value is dropped. There is no flag to get
/// wrong and nothing to double-free.
#[derive(Clone)]
pub enum ServedBody {
    Cached(Arc<[u8]>),
    Owned(Arc<[u8]>),
}

impl ServedBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ServedBody::Cached(b) | ServedBody::Owned(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn from_cache(&self) -> bool {
        matches!(self, ServedBody::Cached(_))
    }
}

struct Entry {
    bytes: Arc<[u8]>,
}

struct CacheState {
    map: FxHashMap<PathBuf, Entry>,
    /// MRU at the front, LRU at the back.
    order: VecDeque<PathBuf>,
    total_bytes: u64,
}

impl CacheState {
    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            let entry = self.order.remove(pos).unwrap();
            self.order.push_front(entry);
        }
    }

    fn evict_until_fits(&mut self, incoming: u64, max_bytes: u64) {
        while self.total_bytes + incoming > max_bytes {
            let Some(victim) = self.order.pop_back() else {
                break;
            };
            if let Some(entry) = self.map.remove(&victim) {
                self.total_bytes -= entry.bytes.len() as u64;
            }
        }
    }
}

pub struct FileCache {
    max_bytes: u64,
    state: RwLock<CacheState>,
}

impl FileCache {
    pub fn new(max_bytes: u64) -> Self {
        FileCache {
            max_bytes,
            state: RwLock::new(CacheState {
                map: FxHashMap::default(),
                order: VecDeque::new(),
                total_bytes: 0,
            }),
        }
    }

    /// Resolves `path` to its bytes, checking the cache before disk.
    pub fn get(&self, path: &Path) -> Result<(ServedBody, bool /* was_hit */), CacheError> {
        // Phase 1: shared lookup. Upgradable so a hit can promote to
        // MRU without a second lock acquisition.
        let read = self.state.upgradable_read();
        if read.map.contains_key(path) {
            let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
            write.touch(path);
            let bytes = write.map.get(path).unwrap().bytes.clone();
            return Ok((ServedBody::Cached(bytes), true));
        }
        drop(read);

        // Phase 2: miss. Read from disk with no cache lock held.
        let metadata = fs::symlink_metadata(path).map_err(|source| CacheError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        // `symlink_metadata` does not follow symlinks; resolve the
        // canonical metadata to decide regularity, matching stat()'s
        // follow-then-check-S_ISREG behavior in the original.
        let resolved = if metadata.file_type().is_symlink() {
            fs::metadata(path).map_err(|source| CacheError::NotFound {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            metadata
        };
        if !resolved.is_file() {
            return Err(CacheError::NotRegular {
                path: path.to_path_buf(),
            });
        }

        let bytes = fs::read(path).map_err(|source| CacheError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let size = bytes.len() as u64;

        if size > MAX_FILE_BYTES {
            return Ok((ServedBody::Owned(Arc::from(bytes)), false));
        }

        // Phase 3: insert, with a re-check to preserve at-most-one
        // insertion under concurrent misses on the same path.
        let mut write = self.state.write();
        if let Some(entry) = write.map.get(path) {
            let existing = entry.bytes.clone();
            write.touch(path);
            return Ok((ServedBody::Cached(existing), false));
        }

        write.evict_until_fits(size, self.max_bytes);

        let shared: Arc<[u8]> = Arc::from(bytes);
        write.map.insert(
            path.to_path_buf(),
            Entry {
                bytes: shared.clone(),
            },
        );
        write.order.push_front(path.to_path_buf());
        write.total_bytes += size;

        Ok((ServedBody::Cached(shared), false))
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.read().total_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.state.read().map.len()
    }
}
