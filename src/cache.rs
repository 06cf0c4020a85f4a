use crate::error::Result;
use log::debug;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

/// Media cache consulted after resolution. The engine never downloads media itself.
pub trait MediaCache: Send + Sync {
    fn is_initialized(&self) -> bool;
    fn has(&self, url: &str) -> bool;
    fn path_for(&self, url: &str) -> String;
}

/// One file per media URL under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    root: Option<PathBuf>,
}

impl DirectoryCache {
    /// Open the cache, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!("Media cache at {}", root.display());
        Ok(Self { root: Some(root) })
    }

    /// A cache that was never set up; every resolution using it fails.
    pub fn uninitialized() -> Self {
        Self { root: None }
    }

    /// Store media bytes for `url`.
    pub fn insert(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.file_for(url).ok_or_else(|| {
            crate::error::VastError::Other("Media cache is not initialized".to_string())
        })?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Files are named by the hex SHA-256 of the URL.
    fn file_for(&self, url: &str) -> Option<PathBuf> {
        let name = hex::encode(Sha256::digest(url.as_bytes()));
        self.root.as_ref().map(|root| root.join(name))
    }
}

impl MediaCache for DirectoryCache {
    fn is_initialized(&self) -> bool {
        self.root.as_ref().is_some_and(|root| root.is_dir())
    }

    fn has(&self, url: &str) -> bool {
        self.file_for(url).is_some_and(|path| path.is_file())
    }

    fn path_for(&self, url: &str) -> String {
        self.file_for(url)
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }
}
