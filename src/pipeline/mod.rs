//! # Pipeline Module
//!
//! Modulo che separa le responsabilità della pipeline in sottomoduli:
//! - `orchestrator`: Pool di worker, raccolta risultati e artifact finale
//! - `document_worker`: Worker per un singolo documento
//! - `progress_tracker`: Progress bar ed eventi JSON unificati

pub mod document_worker;
pub mod orchestrator;
pub mod progress_tracker;

pub use document_worker::{DocumentResult, DocumentWorker, ImageOutcome, ProcessedDocument};
pub use orchestrator::Orchestrator;
pub use progress_tracker::ProgressTracker;
