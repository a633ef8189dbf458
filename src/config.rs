//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione della pipeline.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri della run
//! - Fornisce validazione dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `docs_dir`: Directory con i file `.md`/`.mdx`
//! - `media_dir`: Directory piatta dei file `{hash}.jpg` (default: `media_storage`)
//! - `output_path`: File combinato di output (default: `processed_content.md`)
//! - `vision_model`: Modello vision (default: `gpt-4o-mini`)
//! - `workers`: Numero di worker paralleli (default: 4)
//! - `rate_limit` / `burst_limit`: Token bucket della vision API (default: 200/s, 600)
//! - `max_image_size`: Tetto in byte per le immagini ottimizzate (default: 20 MiB)
//! - `max_encoded_size`: Tetto in byte del payload base64 (default: 20 MiB)
//! - `api_key`: Credenziale API (mai serializzata)
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     docs_dir: PathBuf::from("docs"),
//!     workers: 8,
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 20 MiB, the vision API's per-image ceiling
pub const DEFAULT_MAX_IMAGE_SIZE: usize = 20 * 1024 * 1024;

/// Upper bound for `workers`
pub const MAX_WORKERS: usize = 1024;

/// Slowest accepted vision API rate, one request every ~17 minutes
pub const MIN_RATE_LIMIT: f64 = 0.001;

/// Configuration for a packing run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory containing Markdown/MDX files
    pub docs_dir: PathBuf,
    /// Directory for content-addressed optimized images
    pub media_dir: PathBuf,
    /// Combined output artifact
    pub output_path: PathBuf,
    /// Vision model identifier
    pub vision_model: String,
    /// Number of parallel workers
    pub workers: usize,
    /// Vision API requests per second
    pub rate_limit: f64,
    /// Maximum burst of vision API requests
    pub burst_limit: f64,
    /// Size ceiling for optimized images, in bytes
    pub max_image_size: usize,
    /// Size ceiling for the base64 payload sent to the vision API, in bytes
    pub max_encoded_size: usize,
    /// Base URL of the OpenAI-compatible API
    pub api_base_url: String,
    /// API credential
    #[serde(skip_serializing, default)]
    pub api_key: String,
    /// Timeout for a single vision API call
    pub request_timeout_secs: u64,
    /// Retries after the first failed vision API attempt
    pub max_retries: u32,
    /// Alt text longer than this is used as-is instead of calling the API
    pub describe_alt_threshold: usize,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("."),
            media_dir: PathBuf::from("media_storage"),
            output_path: PathBuf::from("processed_content.md"),
            vision_model: "gpt-4o-mini".to_string(),
            workers: 4,
            rate_limit: 200.0,
            burst_limit: 600.0,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            max_encoded_size: DEFAULT_MAX_IMAGE_SIZE,
            api_base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            request_timeout_secs: 120,
            max_retries: 3,
            describe_alt_threshold: 50,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(anyhow::anyhow!("Number of workers must be between 1 and {}", MAX_WORKERS));
        }

        if !(self.rate_limit.is_finite() && self.rate_limit >= MIN_RATE_LIMIT) {
            return Err(anyhow::anyhow!("Rate limit must be at least {} requests per second", MIN_RATE_LIMIT));
        }

        if !(self.burst_limit.is_finite() && self.burst_limit >= 1.0) {
            return Err(anyhow::anyhow!("Burst limit must be at least 1"));
        }

        if self.max_image_size == 0 || self.max_encoded_size == 0 {
            return Err(anyhow::anyhow!("Size limits must be greater than 0"));
        }

        if self.vision_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Vision model must not be empty"));
        }

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        if !self.docs_dir.is_dir() {
            return Err(anyhow::anyhow!("Docs directory does not exist: {}", self.docs_dir.display()));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load configuration from file
    pub async fn from_file(path: &PathBuf) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Cannot read config file {}: {}", path.display(), e))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
