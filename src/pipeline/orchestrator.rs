//! # Orchestrator
//!
//! Orchestratore principale: trova i documenti, li distribuisce su un pool di
//! worker limitato e raccoglie i risultati nell'ordine in cui arrivano.
//!
//! ## Responsabilità:
//! - Pool di `workers` task (Semaphore + JoinSet, `join_next()` in ordine di completamento)
//! - Unico proprietario di `ProcessingStats` e del buffer di output
//! - Un panic in un worker diventa un file fallito, non un crash della run
//! - Scrittura dell'artifact combinato con il riepilogo in testa
//!
//! ## Formato dell'artifact:
//! ```text
//! <!--
//! Processed: 9 files | Failed: 1 | ...
//! Errors:
//! - docs/broken.md: docs/broken.md is not valid UTF-8
//! -->
//!
//! ---
//! source_file: docs/a.md
//! ...
//!
//! ---
//!
//! ---
//! source_file: docs/b.md
//! ...
//! ```

use crate::config::Config;
use crate::error::DocumentError;
use crate::file_manager::FileManager;
use crate::image_optimizer::ImageOptimizer;
use crate::json_output::JsonMessage;
use crate::media_store::MediaStore;
use crate::pipeline::document_worker::{DocumentResult, DocumentWorker};
use crate::pipeline::progress_tracker::ProgressTracker;
use crate::progress::ProcessingStats;
use crate::rate_limiter::RateLimiter;
use crate::vision::{OpenAiVisionClient, VisionClient, VisionDescriber};
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Separator between documents in the combined artifact
pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

/// Runs the whole pipeline over a documents directory
pub struct Orchestrator {
    config: Config,
    worker: Arc<DocumentWorker>,
}

impl Orchestrator {
    /// Orchestrator backed by the OpenAI-compatible vision API
    pub fn new(config: Config) -> Result<Self> {
        let client = OpenAiVisionClient::new(&config.api_base_url, &config.api_key, config.request_timeout())?;
        Self::with_client(config, Arc::new(client))
    }

    pub fn with_client(config: Config, client: Arc<dyn VisionClient>) -> Result<Self> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.burst_limit));
        let store = MediaStore::open(&config.media_dir)?;
        let describer = VisionDescriber::new(client, limiter, &config);
        let worker = DocumentWorker::new(ImageOptimizer::new(config.max_image_size), store, describer, &config);

        Ok(Self {
            config,
            worker: Arc::new(worker),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process every document and write the combined artifact
    pub async fn run(&self) -> Result<ProcessingStats> {
        let start_time = Instant::now();
        let files = self.discover()?;

        self.log_configuration(&files);
        let tracker = ProgressTracker::new(files.len(), self.config.json_output);
        self.execute(files, tracker, start_time).await
    }

    /// Same as [`run`](Self::run) with no progress output
    pub async fn run_quiet(&self) -> Result<ProcessingStats> {
        let start_time = Instant::now();
        let files = self.discover()?;
        let tracker = ProgressTracker::silent(files.len());
        self.execute(files, tracker, start_time).await
    }

    fn discover(&self) -> Result<Vec<PathBuf>> {
        let files = FileManager::find_documents(&self.config.docs_dir)?;
        if files.is_empty() {
            let message = format!(
                "no Markdown (.md) or MDX (.mdx) files found in {}",
                self.config.docs_dir.display()
            );
            if self.config.json_output {
                JsonMessage::error(message.clone(), None).emit();
            }
            return Err(anyhow::anyhow!(message));
        }
        Ok(files)
    }

    async fn execute(&self, files: Vec<PathBuf>, tracker: ProgressTracker, start_time: Instant) -> Result<ProcessingStats> {
        let mut stats = ProcessingStats::new(files.len());
        let sections = self.process_files_concurrently(files, &tracker, &mut stats).await;
        stats.elapsed = start_time.elapsed();

        if tracker.completed() as usize != stats.total_files {
            warn!(
                "Tracked {} completions for {} documents",
                tracker.completed(),
                stats.total_files
            );
        }

        self.write_output(&stats, &sections).await?;
        tracker.finish(&stats, &self.config.output_path);

        if !self.config.json_output {
            info!("=== Packing Complete ===");
            info!("{}", stats.format_summary());
            for failure in &stats.errors {
                error!("{}: {}", failure.file.display(), failure.message);
            }
        }

        Ok(stats)
    }

    fn log_configuration(&self, files: &[PathBuf]) {
        if self.config.json_output {
            JsonMessage::start(&self.config, files.len()).emit();
            return;
        }

        info!("Starting documentation packing in: {}", self.config.docs_dir.display());
        info!("Found {} documents to process", files.len());
        info!(
            "Vision model: {} | workers: {} | rate: {}/s (burst {})",
            self.config.vision_model, self.config.workers, self.config.rate_limit, self.config.burst_limit
        );
        info!(
            "Media directory: {} | image limit: {}",
            self.config.media_dir.display(),
            FileManager::format_size(self.config.max_image_size as u64)
        );
    }

    /// Fan out one task per file, merge results in completion order
    async fn process_files_concurrently(
        &self,
        files: Vec<PathBuf>,
        tracker: &ProgressTracker,
        stats: &mut ProcessingStats,
    ) -> Vec<String> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();

        for path in files {
            let worker = Arc::clone(&self.worker);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                match AssertUnwindSafe(worker.process(path.clone())).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!("Worker panicked on {}: {}", path.display(), message);
                        DocumentResult {
                            outcome: Err(DocumentError::Panicked {
                                path: path.clone(),
                                message,
                            }),
                            path,
                        }
                    }
                }
            });
        }

        let mut sections = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    stats.record(&result);
                    tracker.file_completed(&result);
                    if let Ok(document) = result.outcome {
                        sections.push(document.content);
                    }
                }
                Err(e) => {
                    // Only reachable if the runtime cancels the task
                    error!("Worker task did not complete: {}", e);
                    let path = PathBuf::from("<cancelled task>");
                    tracker.file_failed(&path, &e.to_string());
                    stats.record_failure(path, e.to_string());
                }
            }
        }

        sections
    }

    async fn write_output(&self, stats: &ProcessingStats, sections: &[String]) -> Result<()> {
        let output_path = &self.config.output_path;
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DocumentError::FileWrite {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(output_path, render_artifact(stats, sections))
            .await
            .map_err(|source| DocumentError::FileWrite {
                path: output_path.clone(),
                source,
            })?;

        if !self.config.json_output {
            info!("Wrote {} documents to {}", sections.len(), output_path.display());
        }
        Ok(())
    }
}

/// Run summary as an HTML comment, then every document block
pub fn render_artifact(stats: &ProcessingStats, sections: &[String]) -> String {
    let report = stats.format_report().replace("-->", "-- >");
    format!("<!--\n{}\n-->\n\n{}\n", report, sections.join(DOCUMENT_SEPARATOR))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Bytes currently held in the media store directory
pub fn media_dir_size(media_dir: &Path) -> u64 {
    std::fs::read_dir(media_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::document_worker::tests::write_png;
    use crate::error::VisionError;
    use crate::vision::describer::tests::ScriptedClient;
    use crate::vision::VisionRequest;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Sleeps on every call, longer for images whose alt text is "slow",
    /// and records the peak number of overlapping calls
    struct PacedClient {
        delay: Duration,
        slow_delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl PacedClient {
        fn new(delay: Duration, slow_delay: Duration) -> Self {
            Self {
                delay,
                slow_delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionClient for PacedClient {
        async fn complete(&self, request: &VisionRequest) -> Result<Option<String>, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = if request.prompt.ends_with("Original description: slow") {
                self.slow_delay
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some("A figure".to_string()))
        }
    }

    fn write_image_docs(docs: &Path, count: usize) {
        for i in 0..count {
            let alt = if i == 0 { "slow" } else { "fast" };
            write_png(&docs.join(format!("a{}.png", i)), 100 + i as u32);
            fs::write(
                docs.join(format!("a{}.md", i)),
                format!("![{}](a{}.png)\n\nBody a{}", alt, i, i),
            )
            .unwrap();
        }
    }

    fn config_for(docs: &Path, work: &Path) -> Config {
        Config {
            docs_dir: docs.to_path_buf(),
            media_dir: work.join("media"),
            output_path: work.join("out/processed_content.md"),
            workers: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_one_corrupt_file_does_not_stop_the_batch() {
        let docs = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        for i in 1..=10 {
            let path = docs.path().join(format!("doc{:02}.md", i));
            if i == 5 {
                fs::write(path, [0xc3, 0x28, 0xa0, 0xa1]).unwrap();
            } else {
                fs::write(path, format!("---\nindex: {}\n---\nBody number {}", i, i)).unwrap();
            }
        }

        let config = config_for(docs.path(), work.path());
        let orchestrator = Orchestrator::with_client(config.clone(), Arc::new(ScriptedClient::answering("x"))).unwrap();
        let stats = orchestrator.run_quiet().await.unwrap();

        assert_eq!(stats.total_files, 10);
        assert_eq!(stats.processed_files, 9);
        assert_eq!(stats.failed_files, 1);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].file.ends_with("doc05.md"));

        let output = fs::read_to_string(&config.output_path).unwrap();
        assert!(output.starts_with("<!--\nProcessed: 9 files | Failed: 1 |"));
        assert_eq!(output.matches("source_file:").count(), 9);
        for i in (1..=10).filter(|i| *i != 5) {
            assert!(output.contains(&format!("Body number {}\n", i)));
        }
        assert!(!output.contains("Body number 5"));
    }

    #[tokio::test]
    async fn test_identical_images_are_stored_once() {
        let docs = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::create_dir_all(docs.path().join("a")).unwrap();
        fs::create_dir_all(docs.path().join("b")).unwrap();
        write_png(&docs.path().join("a/shot.png"), 42);
        write_png(&docs.path().join("b/copy.png"), 42);
        fs::write(docs.path().join("a/first.md"), "![shot](shot.png)").unwrap();
        fs::write(docs.path().join("b/second.md"), "![copy](copy.png)").unwrap();

        let config = config_for(docs.path(), work.path());
        let client = Arc::new(ScriptedClient::answering("Same screenshot"));
        let orchestrator = Orchestrator::with_client(config.clone(), client.clone()).unwrap();
        let stats = orchestrator.run_quiet().await.unwrap();

        assert_eq!(stats.optimized_images, 2);
        assert_eq!(stats.described_images, 2);
        assert_eq!(fs::read_dir(&config.media_dir).unwrap().count(), 1);
        assert!(media_dir_size(&config.media_dir) > 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let output = fs::read_to_string(&config.output_path).unwrap();
        let stored = fs::read_dir(&config.media_dir).unwrap().next().unwrap().unwrap();
        let uri = format!("media://{}", stored.file_name().to_string_lossy());
        assert_eq!(output.matches(&format!("[Image: Same screenshot]({})", uri)).count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_count_bounds_documents_in_flight() {
        let docs = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_image_docs(docs.path(), 8);

        let config = Config {
            workers: 2,
            ..config_for(docs.path(), work.path())
        };
        let client = Arc::new(PacedClient::new(Duration::from_millis(80), Duration::from_millis(80)));
        let orchestrator = Orchestrator::with_client(config, client.clone()).unwrap();
        let stats = orchestrator.run_quiet().await.unwrap();

        assert_eq!(stats.processed_files, 8);
        assert_eq!(client.calls.load(Ordering::SeqCst), 8);
        let peak = client.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak in flight {}", peak);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_are_merged_in_completion_order() {
        let docs = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_image_docs(docs.path(), 4);

        let config = Config {
            workers: 2,
            ..config_for(docs.path(), work.path())
        };
        let client = Arc::new(PacedClient::new(Duration::ZERO, Duration::from_millis(500)));
        let orchestrator = Orchestrator::with_client(config.clone(), client).unwrap();
        orchestrator.run_quiet().await.unwrap();

        let output = fs::read_to_string(&config.output_path).unwrap();
        let slow = output.find("Body a0").unwrap();
        let fast = output.find("Body a1").unwrap();
        assert!(fast < slow, "a1 at {}, a0 at {}", fast, slow);
        assert_eq!(output.matches("source_file:").count(), 4);
    }

    #[tokio::test]
    async fn test_empty_directory_is_an_error() {
        let docs = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        fs::write(docs.path().join("notes.txt"), "not markdown").unwrap();

        let orchestrator =
            Orchestrator::with_client(config_for(docs.path(), work.path()), Arc::new(ScriptedClient::answering("x")))
                .unwrap();
        let err = orchestrator.run_quiet().await.unwrap_err();
        assert!(err.to_string().contains("no Markdown (.md) or MDX (.mdx) files found"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = Config {
            workers: 0,
            ..Default::default()
        };
        assert!(Orchestrator::with_client(config, Arc::new(ScriptedClient::answering("x"))).is_err());
    }

    #[test]
    fn test_render_artifact() {
        let mut stats = ProcessingStats::new(2);
        stats.processed_files = 2;
        stats.record_failure(PathBuf::from("x.md"), "odd --> message".into());

        let artifact = render_artifact(&stats, &["first".to_string(), "second".to_string()]);
        assert!(artifact.starts_with("<!--\nProcessed: 2 files"));
        assert!(artifact.contains("- x.md: odd -- > message\n-->\n\nfirst\n\n---\n\nsecond\n"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
