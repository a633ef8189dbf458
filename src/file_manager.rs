//! # File Management Module
//!
//! Questo modulo gestisce la discovery dei documenti e la risoluzione dei path.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di file `.md` / `.mdx` in una directory
//! - Risoluzione dei path immagine relativi al documento o alla root dei docs
//! - Formattazione human-readable delle dimensioni
//!
//! ## Risoluzione immagini (in ordine):
//! 1. Directory del documento + solo il nome del file
//! 2. Directory del documento + target senza `/` iniziale
//! 3. Root dei docs + target senza `/` iniziale (solo per target assoluti)
//!
//! ## Esempio:
//! ```rust,ignore
//! let files = FileManager::find_documents(Path::new("docs"))?;
//! for file in files {
//!     // process document
//! }
//! ```

use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Manages file discovery and path resolution
pub struct FileManager;

impl FileManager {
    /// Find all Markdown/MDX files under `docs_dir`, sorted by path
    pub fn find_documents(docs_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(docs_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if Self::is_document(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Check if a file is a Markdown or MDX document
    pub fn is_document(path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            matches!(ext_lower.as_str(), "md" | "mdx")
        } else {
            false
        }
    }

    /// First existing candidate for an image `target` referenced from `document`
    pub fn resolve_image(document: &Path, target: &str, docs_root: Option<&Path>) -> Option<PathBuf> {
        let doc_dir = document.parent().unwrap_or(Path::new(""));
        let stripped = target.trim_start_matches('/');

        let mut candidates = Vec::with_capacity(3);
        if let Some(file_name) = Path::new(target).file_name() {
            candidates.push(doc_dir.join(file_name));
        }
        candidates.push(doc_dir.join(stripped));
        if target.starts_with('/') {
            if let Some(root) = docs_root {
                candidates.push(root.join(stripped));
            }
        }

        candidates.into_iter().find(|path| path.is_file())
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
