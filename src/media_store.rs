//! # Media Store Module
//!
//! Storage content-addressed per le immagini ottimizzate.
//!
//! ## Responsabilità:
//! - Un file piatto `{hash}.jpg` per ogni contenuto distinto
//! - `put()` idempotente: se l'hash esiste già ritorna il path esistente
//! - Scrittura su file temporaneo nella stessa directory e poi
//!   `persist_noclobber`: con writer concorrenti sullo stesso hash uno vince,
//!   tutti osservano lo stesso path finale e nessun file parziale è visibile
//!
//! ## Esempio:
//! ```rust,ignore
//! let store = MediaStore::open("media_storage")?;
//! let path = store.put(&optimized)?;
//! assert_eq!(store.path_for(&optimized.hash), Some(path));
//! ```

use crate::error::StoreError;
use crate::image_optimizer::OptimizedImage;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Scheme used for rewritten image references in documents
pub const MEDIA_URI_SCHEME: &str = "media://";

/// Flat directory of `{hash}.jpg` files
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `image` under its hash, or return the existing file
    pub fn put(&self, image: &OptimizedImage) -> Result<PathBuf, StoreError> {
        let target = self.file_path(&image.hash);
        if target.is_file() {
            debug!("Media {} already stored", image.hash);
            return Ok(target);
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StoreError::Io { path, source }
        };

        let mut temp = NamedTempFile::new_in(&self.root).map_err(io_err(&self.root))?;
        temp.write_all(&image.bytes).map_err(io_err(temp.path()))?;
        temp.as_file().sync_all().map_err(io_err(temp.path()))?;

        match temp.persist_noclobber(&target) {
            Ok(_) => {
                debug!("Stored media {} ({} bytes)", target.display(), image.byte_size());
                Ok(target)
            }
            // Lost the race to an identical write; the temp file is dropped
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(target),
            Err(e) => Err(StoreError::Io {
                path: target,
                source: e.error,
            }),
        }
    }

    /// Stored path for `hash`, if present
    pub fn path_for(&self, hash: &str) -> Option<PathBuf> {
        let path = self.file_path(hash);
        path.is_file().then_some(path)
    }

    /// `media://{hash}.jpg`
    pub fn uri_for(hash: &str) -> String {
        format!("{}{}.jpg", MEDIA_URI_SCHEME, hash)
    }

    fn file_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}.jpg", hash))
    }
}
