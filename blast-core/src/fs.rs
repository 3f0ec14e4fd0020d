//! Filesystem abstraction
//!
//! Builders and loaders read the filesystem through the [`FileSystem`]
//! capability rather than `std::fs` directly, so tests can substitute an
//! in-memory implementation and callers can layer a read cache on top.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Abstract filesystem interface used by the builder and loaders.
///
/// All reads in the core go through this trait; nothing in the core writes
/// to disk.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Unix permission bits of a file (e.g. 0o644), if available.
    fn file_mode(&self, path: &Path) -> Result<u32>;

    /// Size of a file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Entries of a directory as full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation backed by `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_mode(&self, path: &Path) -> Result<u32> {
        let metadata = fs::metadata(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Only the permission bits matter to callers.
            Ok(metadata.permissions().mode() & 0o777)
        }

        #[cfg(not(unix))]
        {
            let _ = metadata;
            Ok(0o644)
        }
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(metadata.len())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let iter = fs::read_dir(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        for entry in iter {
            let entry = entry.map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
            entries.push(entry.path());
        }
        Ok(entries)
    }
}

/// Read-through cache over another filesystem.
///
/// File contents are cached on first read. Existence and metadata queries
/// pass through uncached since they are cheap relative to content reads.
pub struct CachingFileSystem<F: FileSystem> {
    inner: F,
    cache: Mutex<HashMap<PathBuf, String>>,
}

impl<F: FileSystem> CachingFileSystem<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached file contents, for diagnostics.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().expect("fs cache poisoned").len()
    }
}

impl<F: FileSystem> FileSystem for CachingFileSystem<F> {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        if let Some(content) = self.cache.lock().expect("fs cache poisoned").get(path) {
            return Ok(content.clone());
        }

        let content = self.inner.read_to_string(path)?;
        self.cache
            .lock()
            .expect("fs cache poisoned")
            .insert(path.to_path_buf(), content.clone());
        Ok(content)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn file_mode(&self, path: &Path) -> Result<u32> {
        self.inner.file_mode(path)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        self.inner.file_size(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }
}
