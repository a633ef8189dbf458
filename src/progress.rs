//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce la progress bar e le statistiche della run.
//!
//! ## Responsabilità:
//! - Progress bar visual con `indicatif` per feedback real-time
//! - Accumulo delle statistiche per file e per immagine
//! - Report finale leggibile, riusato anche in testa all'artifact
//!
//! ## Componenti principali:
//! - `ProgressManager`: Gestisce la progress bar principale (nascosta in JSON mode)
//! - `ProcessingStats`: Accumulatore unico della run
//!
//! ## Statistiche tracciate:
//! - **processed_files** / **failed_files**: esito per documento
//! - **processed_images**: immagini incontrate nei documenti riusciti
//! - **optimized_images**: immagini ottimizzate e salvate nel media store
//! - **described_images**: immagini con descrizione (API o alt text lungo)
//! - **failed_images**: immagini degradate a fallback
//! - **errors**: coppie (file, messaggio) per tutto ciò che è fallito
//!
//! `ProcessingStats` è mutato solo dall'`Orchestrator`, una volta per ogni
//! documento completato.
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:12] [========================>---------------] 24/40 (60%) [OK] intro.md: 3 images
//! ```

use crate::pipeline::document_worker::{DocumentResult, ImageOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Manages progress reporting for a packing run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Progress manager that draws nothing (JSON mode, tests)
    pub fn hidden(total_files: u64) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total_files);
        Self { bar }
    }

    /// Update progress with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

/// One failed unit of work
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub file: PathBuf,
    pub message: String,
}

/// Statistics for one run
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub processed_images: usize,
    pub optimized_images: usize,
    pub described_images: usize,
    pub failed_images: usize,
    pub errors: Vec<FailureRecord>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl ProcessingStats {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            ..Default::default()
        }
    }

    /// Fold one completed document into the totals
    pub fn record(&mut self, result: &DocumentResult) {
        match &result.outcome {
            Ok(document) => {
                self.processed_files += 1;
                for image in &document.images {
                    self.record_image(&result.path, image);
                }
            }
            Err(e) => {
                self.failed_files += 1;
                self.errors.push(FailureRecord {
                    file: result.path.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// A task that never produced a result
    pub fn record_failure(&mut self, file: PathBuf, message: String) {
        self.failed_files += 1;
        self.errors.push(FailureRecord { file, message });
    }

    fn record_image(&mut self, file: &Path, image: &ImageOutcome) {
        self.processed_images += 1;
        match image {
            ImageOutcome::Described { .. } => {
                self.optimized_images += 1;
                self.described_images += 1;
            }
            ImageOutcome::Stored { target, error, .. } => {
                self.optimized_images += 1;
                self.failed_images += 1;
                self.errors.push(FailureRecord {
                    file: file.to_path_buf(),
                    message: format!("{}: {}", target, error),
                });
            }
            ImageOutcome::Kept { target, error } => {
                self.failed_images += 1;
                self.errors.push(FailureRecord {
                    file: file.to_path_buf(),
                    message: format!("{}: {}", target, error),
                });
            }
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Failed: {} | Images: {} processed, {} optimized, {} described, {} failed | Elapsed: {:.2}s",
            self.processed_files,
            self.failed_files,
            self.processed_images,
            self.optimized_images,
            self.described_images,
            self.failed_images,
            self.elapsed.as_secs_f64()
        )
    }

    /// Summary plus the itemized error list
    pub fn format_report(&self) -> String {
        let mut report = self.format_summary();
        if self.has_failures() {
            report.push_str("\nErrors:");
            for failure in &self.errors {
                report.push_str(&format!("\n- {}: {}", failure.file.display(), failure.message));
            }
        }
        report
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
