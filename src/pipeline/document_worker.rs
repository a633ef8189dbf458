//! # Document Worker
//!
//! Worker per l'elaborazione di un singolo documento, dall'apertura del file
//! al blocco finale pronto per l'artifact combinato.
//!
//! ## Stati:
//! `Read → Parse → (per immagine: Optimize → Store → Describe → Rewrite) → Serialize`
//!
//! ## Politica degli errori:
//! - Lettura, encoding, frontmatter o render falliti: il documento fallisce,
//!   la run prosegue
//! - Immagine mancante, corrotta o non comprimibile: resta il markdown originale
//! - Descrizione fallita su un'immagine già salvata: link al media store con
//!   l'alt text come descrizione
//!
//! Decode/encode e scrittura nel media store girano in `spawn_blocking`.

use crate::config::Config;
use crate::document::{decode_data_uri, Document, Frontmatter, ImageReference, ImageSource};
use crate::error::{DocumentError, ImageError};
use crate::file_manager::FileManager;
use crate::image_optimizer::{ImageOptimizer, OptimizedImage};
use crate::media_store::MediaStore;
use crate::vision::describer::fallback_description;
use crate::vision::VisionDescriber;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What happened to one embedded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Stored and described
    Described {
        target: String,
        uri: String,
        description: String,
    },
    /// Stored, but the description failed
    Stored {
        target: String,
        uri: String,
        error: String,
    },
    /// Original reference kept as written
    Kept { target: String, error: String },
}

impl ImageOutcome {
    /// Markdown that replaces `reference` in the body
    pub fn rewrite(&self, reference: &ImageReference) -> String {
        match self {
            Self::Described { uri, description, .. } => {
                format!("[Image: {}]({})", single_line(description), uri)
            }
            Self::Stored { uri, .. } => {
                format!("[Image: {}]({})", fallback_description(&reference.alt_text), uri)
            }
            Self::Kept { .. } => reference.original.clone(),
        }
    }

    pub fn is_described(&self) -> bool {
        matches!(self, Self::Described { .. })
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A successfully processed document
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    /// Rendered block: metadata header plus rewritten body
    pub content: String,
    /// Source frontmatter, unchanged
    pub frontmatter: Frontmatter,
    pub images: Vec<ImageOutcome>,
}

/// Result of one worker run
#[derive(Debug)]
pub struct DocumentResult {
    pub path: PathBuf,
    pub outcome: Result<ProcessedDocument, DocumentError>,
}

impl DocumentResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error_summary(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}

/// Turns one source file into one rendered block
pub struct DocumentWorker {
    optimizer: Arc<ImageOptimizer>,
    store: Arc<MediaStore>,
    describer: VisionDescriber,
    docs_root: PathBuf,
    model: String,
}

impl DocumentWorker {
    pub fn new(optimizer: ImageOptimizer, store: MediaStore, describer: VisionDescriber, config: &Config) -> Self {
        Self {
            optimizer: Arc::new(optimizer),
            store: Arc::new(store),
            describer,
            docs_root: config.docs_dir.clone(),
            model: config.vision_model.clone(),
        }
    }

    /// Process `path`; never fails, the error lives in the result
    pub async fn process(&self, path: PathBuf) -> DocumentResult {
        let outcome = self.run(&path).await;
        if let Err(e) = &outcome {
            error!("Failed to process {}: {}", path.display(), e);
        }
        DocumentResult { path, outcome }
    }

    async fn run(&self, path: &Path) -> Result<ProcessedDocument, DocumentError> {
        let raw = tokio::fs::read(path).await.map_err(|source| DocumentError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(raw).map_err(|_| DocumentError::InvalidEncoding(path.to_path_buf()))?;

        let document = Document::parse(path, &text)?;
        debug!("{}: {} image reference(s)", path.display(), document.images.len());

        let mut replacements = Vec::with_capacity(document.images.len());
        let mut images = Vec::with_capacity(document.images.len());
        for reference in &document.images {
            let outcome = self.process_image(&document, reference).await;
            replacements.push(outcome.rewrite(reference));
            images.push(outcome);
        }

        let body = document.rewrite_body(&replacements);
        let content = document.render(&body, &chrono::Utc::now().to_rfc3339())?;

        Ok(ProcessedDocument {
            content,
            frontmatter: document.frontmatter,
            images,
        })
    }

    async fn process_image(&self, document: &Document, reference: &ImageReference) -> ImageOutcome {
        let target = reference.display_target();

        let optimized = match self.optimize_and_store(document, reference).await {
            Ok(optimized) => optimized,
            Err(e) => {
                warn!("{}: keeping original reference to {}: {}", document.path.display(), target, e);
                return ImageOutcome::Kept {
                    target,
                    error: e.to_string(),
                };
            }
        };

        let uri = MediaStore::uri_for(&optimized.hash);
        debug!(
            "{} -> {} ({} bytes, q{}, {}x{})",
            target,
            uri,
            optimized.byte_size(),
            optimized.quality,
            optimized.width,
            optimized.height
        );

        match self.describer.describe(&optimized, &reference.alt_text, &self.model).await {
            Ok(description) => ImageOutcome::Described {
                target,
                uri,
                description,
            },
            Err(e) => {
                warn!("{}: no description for {}: {}", document.path.display(), target, e);
                ImageOutcome::Stored {
                    target,
                    uri,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn optimize_and_store(
        &self,
        document: &Document,
        reference: &ImageReference,
    ) -> Result<OptimizedImage, ImageError> {
        let raw = self.load_image(document, reference).await?;
        let optimizer = Arc::clone(&self.optimizer);
        let store = Arc::clone(&self.store);

        tokio::task::spawn_blocking(move || -> Result<OptimizedImage, ImageError> {
            let optimized = optimizer.optimize(&raw)?;
            store.put(&optimized)?;
            Ok(optimized)
        })
        .await
        .map_err(|e| ImageError::Task(e.to_string()))?
    }

    async fn load_image(&self, document: &Document, reference: &ImageReference) -> Result<Vec<u8>, ImageError> {
        match &reference.source {
            ImageSource::Inline(uri) => decode_data_uri(uri).ok_or(ImageError::InvalidData),
            ImageSource::Local(target) => {
                let path = FileManager::resolve_image(&document.path, target, Some(self.docs_root.as_path()))
                    .ok_or_else(|| ImageError::Missing(target.clone()))?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|source| ImageError::Read { path, source })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::VisionError;
    use crate::image_optimizer::tests::{noise_image, png_bytes};
    use crate::rate_limiter::RateLimiter;
    use crate::vision::describer::tests::ScriptedClient;
    use crate::vision::VisionClient;
    use base64::Engine;
    use image::DynamicImage;
    use std::fs;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    pub(crate) fn test_worker(docs: &Path, media: &Path, client: Arc<dyn VisionClient>) -> DocumentWorker {
        let config = Config {
            docs_dir: docs.to_path_buf(),
            media_dir: media.to_path_buf(),
            ..Default::default()
        };
        let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.burst_limit));
        DocumentWorker::new(
            ImageOptimizer::new(config.max_image_size),
            MediaStore::open(media).unwrap(),
            VisionDescriber::new(client, limiter, &config),
            &config,
        )
    }

    pub(crate) fn write_png(path: &Path, seed: u32) {
        fs::write(path, png_bytes(DynamicImage::ImageRgb8(noise_image(16, 12, seed)))).unwrap();
    }

    fn images(result: &DocumentResult) -> &[ImageOutcome] {
        &result.outcome.as_ref().unwrap().images
    }

    fn content(result: &DocumentResult) -> &str {
        &result.outcome.as_ref().unwrap().content
    }

    #[tokio::test]
    async fn test_failed_description_keeps_alt_text() {
        let docs = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        for (name, seed) in [("one.png", 1), ("two.png", 2), ("three.png", 3)] {
            write_png(&docs.path().join(name), seed);
        }
        let doc = docs.path().join("page.md");
        fs::write(
            &doc,
            "---\ntitle: Page\n---\nA ![first](one.png)\nB ![second alt](two.png)\nC ![third](three.png)\n",
        )
        .unwrap();

        let client = Arc::new(
            ScriptedClient::answering("Third description")
                .then(Ok(Some("First description".into())))
                .then(Err(VisionError::Api("content rejected".into()))),
        );
        let worker = test_worker(docs.path(), media.path(), client.clone());

        let result = worker.process(doc).await;
        assert!(result.is_success());
        let outcomes = images(&result);
        assert!(outcomes[0].is_described());
        assert!(matches!(&outcomes[1], ImageOutcome::Stored { error, .. } if error.contains("content rejected")));
        assert!(outcomes[2].is_described());

        let text = content(&result);
        assert!(text.contains("A [Image: First description](media://"));
        assert!(text.contains("B [Image: second alt](media://"));
        assert!(text.contains("C [Image: Third description](media://"));
        assert!(text.contains("title: Page\n"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs::read_dir(media.path()).unwrap().count(), 3);
    }

    #[tokio::test]
    async fn test_unusable_images_keep_original_markdown() {
        let docs = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        fs::write(docs.path().join("broken.png"), b"definitely not an image").unwrap();
        let doc = docs.path().join("page.md");
        let body = "![gone](missing.png) ![bad](broken.png) ![remote](https://example.com/r.png)";
        fs::write(&doc, body).unwrap();

        let client = Arc::new(ScriptedClient::answering("unused"));
        let worker = test_worker(docs.path(), media.path(), client.clone());
        let result = worker.process(doc).await;

        let outcomes = images(&result);
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[0], ImageOutcome::Kept { error, .. } if error == "missing image: missing.png"));
        assert!(matches!(&outcomes[1], ImageOutcome::Kept { error, .. } if error.contains("decode")));
        assert!(content(&result).ends_with(body));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read_dir(media.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_inline_image_is_stored() {
        let docs = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let png = png_bytes(DynamicImage::ImageRgb8(noise_image(8, 8, 9)));
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );
        let doc = docs.path().join("inline.mdx");
        fs::write(&doc, format!("Logo: ![logo]({})", uri)).unwrap();

        let worker = test_worker(docs.path(), media.path(), Arc::new(ScriptedClient::answering("A small logo")));
        let result = worker.process(doc).await;

        match &images(&result)[0] {
            ImageOutcome::Described { target, uri, .. } => {
                assert_eq!(target, "data:image/png;base64,…");
                let file = uri.strip_prefix("media://").unwrap();
                assert!(media.path().join(file).is_file());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(content(&result).contains("Logo: [Image: A small logo](media://"));
    }

    #[tokio::test]
    async fn test_long_alt_text_is_used_verbatim() {
        let docs = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        write_png(&docs.path().join("arch.png"), 4);
        let alt = "Architecture overview showing the ingestion queue, the workers and the store";
        let doc = docs.path().join("arch.md");
        fs::write(&doc, format!("![{}](arch.png)", alt)).unwrap();

        let client = Arc::new(ScriptedClient::answering("unused"));
        let worker = test_worker(docs.path(), media.path(), client.clone());
        let result = worker.process(doc).await;

        assert!(content(&result).contains(&format!("[Image: {}](media://", alt)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_document_level_failures() {
        let docs = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let worker = test_worker(docs.path(), media.path(), Arc::new(ScriptedClient::answering("x")));

        let binary = docs.path().join("binary.md");
        fs::write(&binary, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        let result = worker.process(binary).await;
        assert!(matches!(result.outcome, Err(DocumentError::InvalidEncoding(_))));

        let yaml = docs.path().join("yaml.md");
        fs::write(&yaml, "---\nkey: [oops\n---\nbody").unwrap();
        let result = worker.process(yaml).await;
        assert!(matches!(result.outcome, Err(DocumentError::Frontmatter { .. })));
        assert!(result.error_summary().unwrap().contains("invalid frontmatter"));

        let result = worker.process(docs.path().join("absent.md")).await;
        assert!(matches!(result.outcome, Err(DocumentError::FileRead { .. })));
    }

    #[test]
    fn test_description_is_kept_on_one_line() {
        let reference = Document::parse("a.md", "![alt](a.png)").unwrap().images.remove(0);
        let outcome = ImageOutcome::Described {
            target: "a.png".into(),
            uri: "media://h.jpg".into(),
            description: "Line one.\n\nLine  two.".into(),
        };
        assert_eq!(outcome.rewrite(&reference), "[Image: Line one. Line two.](media://h.jpg)");
    }
}
