//! Read-only file access for configuration documents and TLS material
//!
//! Configuration refers to other files by relative path. A [`Fetcher`] is
//! bound to a base (a directory, or an in-memory map in tests) and can be
//! re-rooted with [`Fetcher::open_at`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ErrorKind, InteropError, Result};

pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Read the whole file at `path`, relative to the fetcher base
    fn read_all(&self, path: &str) -> Result<Vec<u8>>;

    /// Fetcher rooted at `path`, relative to the current base
    fn open_at(&self, path: &str) -> Box<dyn Fetcher>;
}

/// Fetcher bound to a directory
#[derive(Debug, Clone)]
pub struct FsFetcher {
    base: PathBuf,
}

impl FsFetcher {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Fetcher for FsFetcher {
    fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.base.join(path);
        debug!(path = %full.display(), "Reading file");
        std::fs::read(&full).map_err(|e| {
            InteropError::new(
                ErrorKind::Internal,
                format!("failed to read {}", full.display()),
            )
            .with_source(e)
        })
    }

    fn open_at(&self, path: &str) -> Box<dyn Fetcher> {
        Box::new(FsFetcher::new(self.base.join(path)))
    }
}

/// Fetcher over an in-memory file map
#[derive(Debug, Clone, Default)]
pub struct MemFetcher {
    files: Arc<HashMap<String, Vec<u8>>>,
    root: String,
}

fn join_path(base: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, path),
    }
}

impl MemFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file; the path is relative to the map root
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.files).insert(join_path("", path), content.into());
        self
    }
}

impl Fetcher for MemFetcher {
    fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let key = join_path(&self.root, path);
        self.files
            .get(&key)
            .cloned()
            .ok_or_else(|| InteropError::internal(format!("file not found: {}", key)))
    }

    fn open_at(&self, path: &str) -> Box<dyn Fetcher> {
        Box::new(MemFetcher {
            files: Arc::clone(&self.files),
            root: join_path(&self.root, path),
        })
    }
}
