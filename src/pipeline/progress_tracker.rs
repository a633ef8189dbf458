//! # Progress Tracking Module
//!
//! Unifica progress bar ed eventi JSON in un singolo tracker.
//! Avanzato dall'`Orchestrator` una volta per ogni documento completato.

use crate::json_output::JsonMessage;
use crate::pipeline::document_worker::DocumentResult;
use crate::progress::{ProcessingStats, ProgressManager};
use std::path::Path;

/// Progress bar in terminal mode, NDJSON events in JSON mode
pub struct ProgressTracker {
    json_output: bool,
    progress_manager: ProgressManager,
}

impl ProgressTracker {
    pub fn new(total_files: usize, json_output: bool) -> Self {
        let progress_manager = if json_output {
            ProgressManager::hidden(total_files as u64)
        } else {
            ProgressManager::new(total_files as u64)
        };

        Self {
            json_output,
            progress_manager,
        }
    }

    /// Tracker with no visible output
    pub fn silent(total_files: usize) -> Self {
        Self {
            json_output: false,
            progress_manager: ProgressManager::hidden(total_files as u64),
        }
    }

    /// Advance by one document
    pub fn file_completed(&self, result: &DocumentResult) {
        if self.json_output {
            JsonMessage::file_complete(result).emit();
        }
        self.progress_manager.update(&status_line(result));
    }

    /// Advance by one document that produced no result at all
    pub fn file_failed(&self, path: &Path, message: &str) {
        if self.json_output {
            JsonMessage::error(format!("{}: {}", path.display(), message), None).emit();
        }
        self.progress_manager
            .update(&format!("[ERROR] {}: {}", display_name(path), message));
    }

    pub fn completed(&self) -> u64 {
        self.progress_manager.position()
    }

    /// Finalizza progress bar ed emette l'evento finale
    pub fn finish(&self, stats: &ProcessingStats, output_path: &Path) {
        if self.json_output {
            JsonMessage::complete(stats, output_path.to_path_buf()).emit();
        }
        self.progress_manager.finish(&stats.format_summary());
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

fn status_line(result: &DocumentResult) -> String {
    let name = display_name(&result.path);
    match &result.outcome {
        Ok(document) => {
            let described = document.images.iter().filter(|i| i.is_described()).count();
            if document.images.is_empty() {
                format!("[OK] {}", name)
            } else {
                format!("[OK] {}: {}/{} images described", name, described, document.images.len())
            }
        }
        Err(e) => format!("[ERROR] {}: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentError;
    use crate::pipeline::document_worker::{ImageOutcome, ProcessedDocument};
    use std::path::PathBuf;

    fn ok_result(images: Vec<ImageOutcome>) -> DocumentResult {
        DocumentResult {
            path: PathBuf::from("docs/guide/intro.md"),
            outcome: Ok(ProcessedDocument {
                content: String::new(),
                frontmatter: Default::default(),
                images,
            }),
        }
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(status_line(&ok_result(vec![])), "[OK] intro.md");

        let images = vec![
            ImageOutcome::Described {
                target: "a.png".into(),
                uri: "media://a.jpg".into(),
                description: "A".into(),
            },
            ImageOutcome::Kept {
                target: "b.png".into(),
                error: "missing image: b.png".into(),
            },
        ];
        assert_eq!(status_line(&ok_result(images)), "[OK] intro.md: 1/2 images described");

        let failed = DocumentResult {
            path: PathBuf::from("docs/bad.md"),
            outcome: Err(DocumentError::InvalidEncoding(PathBuf::from("docs/bad.md"))),
        };
        assert_eq!(status_line(&failed), "[ERROR] bad.md: docs/bad.md is not valid UTF-8");
    }

    #[test]
    fn test_tracker_advances_once_per_file() {
        let tracker = ProgressTracker::silent(3);
        tracker.file_completed(&ok_result(vec![]));
        tracker.file_failed(Path::new("docs/lost.md"), "worker panicked");
        assert_eq!(tracker.completed(), 2);

        tracker.finish(&ProcessingStats::new(3), Path::new("out.md"));
    }
}
