//! # RAG Doc Packer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Composizione della configurazione: default, file `--config`, poi flag
//! - Avvio dell'orchestratore e stampa del riepilogo finale
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (directory, modello, workers, limiti, etc.)
//! 2. Configura il logging su stderr (INFO o DEBUG, `RUST_LOG` ha la precedenza)
//! 3. Carica l'eventuale file di configurazione e applica i flag sopra
//! 4. Valida la configurazione e la presenza della API key
//! 5. Istanzia l'Orchestrator e avvia la run
//!
//! ## Esempio di utilizzo:
//! ```bash
//! OPENAI_API_KEY=sk-... rag-doc-packer docs --output processed_content.md --workers 8 --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rag_doc_packer::file_manager::FileManager;
use rag_doc_packer::json_output::JsonMessage;
use rag_doc_packer::pipeline::orchestrator::media_dir_size;
use rag_doc_packer::{Config, Orchestrator};

#[derive(Parser)]
#[command(name = "rag-doc-packer")]
#[command(about = "Pack Markdown/MDX documentation into a single RAG-ready file with AI image descriptions")]
struct Args {
    /// Directory containing .md/.mdx documents
    docs_directory: Option<PathBuf>,

    /// Combined output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for optimized, content-addressed images
    #[arg(short, long)]
    media_dir: Option<PathBuf>,

    /// Vision model identifier
    #[arg(long)]
    model: Option<String>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Vision API requests per second
    #[arg(long)]
    rate_limit: Option<f64>,

    /// Maximum burst of vision API requests
    #[arg(long)]
    burst_limit: Option<f64>,

    /// Size ceiling for optimized images, in bytes
    #[arg(long)]
    max_image_size: Option<usize>,

    /// Size ceiling for the base64 image payload, in bytes
    #[arg(long)]
    max_encoded_size: Option<usize>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL")]
    api_base_url: Option<String>,

    /// API key for the vision API
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Timeout for a single vision API call, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries for rate-limited or failed vision API calls
    #[arg(long)]
    max_retries: Option<u32>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration (without the API key) to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Output progress and status as JSON for programmatic use
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Flags win over the config file
    fn apply(self, mut config: Config) -> Config {
        if let Some(dir) = self.docs_directory {
            config.docs_dir = dir;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(media_dir) = self.media_dir {
            config.media_dir = media_dir;
        }
        if let Some(model) = self.model {
            config.vision_model = model;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(rate) = self.rate_limit {
            config.rate_limit = rate;
        }
        if let Some(burst) = self.burst_limit {
            config.burst_limit = burst;
        }
        if let Some(size) = self.max_image_size {
            config.max_image_size = size;
        }
        if let Some(size) = self.max_encoded_size {
            config.max_encoded_size = size;
        }
        if let Some(url) = self.api_base_url {
            config.api_base_url = url;
        }
        if let Some(key) = self.api_key {
            config.api_key = key;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if self.json {
            config.json_output = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for the JSON event stream
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let base = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::from_file(path).await?
        }
        None => Config::default(),
    };
    let save_config = args.save_config.clone();
    let config = args.apply(base);

    if let Some(path) = save_config {
        config.save_to_file(&path).await?;
        info!("Saved configuration to {}", path.display());
        return Ok(());
    }

    if let Err(e) = config.validate() {
        if config.json_output {
            JsonMessage::error("invalid configuration".to_string(), Some(e.to_string())).emit();
        }
        return Err(e);
    }
    if config.api_key.is_empty() {
        let message = "no API key: set OPENAI_API_KEY or pass --api-key";
        if config.json_output {
            JsonMessage::error(message.to_string(), None).emit();
        }
        return Err(anyhow::anyhow!(message));
    }

    let orchestrator = Orchestrator::new(config)?;
    let stats = orchestrator.run().await?;

    let media_dir = &orchestrator.config().media_dir;
    info!(
        "Media store: {} ({})",
        media_dir.display(),
        FileManager::format_size(media_dir_size(media_dir))
    );
    if stats.has_failures() {
        warn!("Completed with {} failure(s)", stats.errors.len());
    }

    Ok(())
}
