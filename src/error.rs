//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della pipeline.
//!
//! ## Responsabilità:
//! - Separa gli errori per livello: immagine, media store, vision API, documento
//! - Fornisce messaggi di errore descrittivi e strutturati
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `OptimizeError`: immagine vuota, corrotta o impossibile da comprimere
//! - `StoreError`: scrittura nel media store fallita
//! - `VisionError`: chiamata alla vision API fallita o payload troppo grande
//! - `ImageError`: qualunque fallimento di una singola immagine nel documento
//! - `DocumentError`: lettura, parsing o scrittura di un documento fallita
//!
//! ## Politica di propagazione:
//! - Gli errori di immagine non escono mai dal `DocumentWorker`: diventano
//!   un fallback nel testo e una voce nelle statistiche
//! - Gli errori di documento non escono mai dall'`Orchestrator`: diventano
//!   un file fallito nel riepilogo finale
//!
//! ## Esempio:
//! ```rust,ignore
//! if raw.is_empty() {
//!     return Err(OptimizeError::EmptyInput);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while turning raw image bytes into a size-bounded JPEG
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("image data is empty")]
    EmptyInput,

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("cannot bring image under {limit} bytes (last attempt {size} bytes at {width}x{height})")]
    SizeLimitUnreachable {
        size: usize,
        limit: usize,
        width: u32,
        height: u32,
    },
}

/// Errors raised by the content-addressed media store
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("media store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the vision describer
#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("vision API error: {0}")]
    Api(String),

    #[error("transient vision API error: {0}")]
    Transient(String),

    #[error("encoded image is {encoded_size} bytes, limit is {limit}")]
    ImageTooLarge { encoded_size: usize, limit: usize },

    #[error("vision API call timed out after {0:?}")]
    Timeout(Duration),
}

impl VisionError {
    /// Rate limiting, server errors, transport failures and timeouts
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Image-level errors: degrade one reference, never the document
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("missing image: {0}")]
    Missing(String),

    #[error("invalid inline image data")]
    InvalidData,

    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("image task failed: {0}")]
    Task(String),
}

/// File-level errors: fatal for one document, never for the run
#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not valid UTF-8")]
    InvalidEncoding(PathBuf),

    #[error("invalid frontmatter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },

    #[error("worker for {path} panicked: {message}")]
    Panicked { path: PathBuf, message: String },
}
