//! # RAG Doc Packer Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione e validazione parametri
//! - `error`: Tipi di errore custom per immagini, media store, vision API e documenti
//! - `rate_limiter`: Token bucket condiviso per la vision API
//! - `image_optimizer`: Compressione JPEG progressiva sotto un limite di byte
//! - `media_store`: Storage content-addressed `{hash}.jpg`
//! - `vision`: Descrizioni AI delle immagini
//! - `document`: Frontmatter, riferimenti immagine e render del documento
//! - `file_manager`: Discovery dei documenti e risoluzione path immagine
//! - `pipeline`: Orchestratore, worker per documento e progress tracking
//! - `progress`: Progress bar e statistiche della run
//! - `json_output`: Eventi JSON per uso programmatico
//!
//! ## Utilizzo:
//! ```rust,ignore
//! use rag_doc_packer::{Config, Orchestrator};
//!
//! let config = Config::default();
//! let orchestrator = Orchestrator::new(config)?;
//! let stats = orchestrator.run().await?;
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod file_manager;
pub mod image_optimizer;
pub mod json_output;
pub mod media_store;
pub mod pipeline;
pub mod progress;
pub mod rate_limiter;
pub mod vision;

pub use config::Config;
pub use error::{DocumentError, ImageError, OptimizeError, StoreError, VisionError};
pub use image_optimizer::{ImageOptimizer, OptimizedImage};
pub use media_store::MediaStore;
pub use pipeline::Orchestrator;
pub use progress::ProcessingStats;
pub use rate_limiter::RateLimiter;
