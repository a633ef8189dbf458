//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per l'uso da altri programmi.
//!
//! ## Responsabilità:
//! - Emette un evento JSON per riga su stdout (`--json`)
//! - Riusa `ProcessingStats` e `DocumentResult` come sorgente dei dati
//! - Fornisce un'interfaccia stabile per chi orchestra la run dall'esterno
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio della run con configurazione effettiva
//! - `file_complete`: Fine elaborazione di un documento (riuscito o fallito)
//! - `complete`: Fine della run con statistiche finali
//! - `error`: Errore che interrompe la run

use crate::config::Config;
use crate::pipeline::document_worker::{DocumentResult, ImageOutcome};
use crate::progress::ProcessingStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Inizio della run
    Start {
        docs_dir: PathBuf,
        output_path: PathBuf,
        media_dir: PathBuf,
        total_files: usize,
        config: JsonConfig,
    },

    /// Fine elaborazione di un documento
    FileComplete {
        path: PathBuf,
        success: bool,
        images: usize,
        described_images: usize,
        failed_images: usize,
        error: Option<String>,
    },

    /// Run completata
    Complete {
        processed_files: usize,
        failed_files: usize,
        processed_images: usize,
        optimized_images: usize,
        described_images: usize,
        failed_images: usize,
        duration_seconds: f64,
        output_path: PathBuf,
    },

    /// Errore generale
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonConfig {
    pub vision_model: String,
    pub workers: usize,
    pub rate_limit: f64,
    pub burst_limit: f64,
    pub max_image_size: usize,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Crea un messaggio di inizio
    pub fn start(config: &Config, total_files: usize) -> Self {
        Self::Start {
            docs_dir: config.docs_dir.clone(),
            output_path: config.output_path.clone(),
            media_dir: config.media_dir.clone(),
            total_files,
            config: JsonConfig::from(config),
        }
    }

    /// Crea un messaggio di completamento documento
    pub fn file_complete(result: &DocumentResult) -> Self {
        match &result.outcome {
            Ok(document) => {
                let described = document
                    .images
                    .iter()
                    .filter(|i| matches!(i, ImageOutcome::Described { .. }))
                    .count();
                Self::FileComplete {
                    path: result.path.clone(),
                    success: true,
                    images: document.images.len(),
                    described_images: described,
                    failed_images: document.images.len() - described,
                    error: None,
                }
            }
            Err(e) => Self::FileComplete {
                path: result.path.clone(),
                success: false,
                images: 0,
                described_images: 0,
                failed_images: 0,
                error: Some(e.to_string()),
            },
        }
    }

    /// Crea un messaggio di completamento generale
    pub fn complete(stats: &ProcessingStats, output_path: PathBuf) -> Self {
        Self::Complete {
            processed_files: stats.processed_files,
            failed_files: stats.failed_files,
            processed_images: stats.processed_images,
            optimized_images: stats.optimized_images,
            described_images: stats.described_images,
            failed_images: stats.failed_images,
            duration_seconds: stats.elapsed.as_secs_f64(),
            output_path,
        }
    }

    /// Crea un messaggio di errore
    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&Config> for JsonConfig {
    fn from(config: &Config) -> Self {
        Self {
            vision_model: config.vision_model.clone(),
            workers: config.workers,
            rate_limit: config.rate_limit,
            burst_limit: config.burst_limit,
            max_image_size: config.max_image_size,
        }
    }
}
