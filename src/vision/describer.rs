//! # Vision Describer
//!
//! Trasforma un'immagine ottimizzata in una descrizione testuale.
//!
//! ## Flusso per chiamata:
//! 1. Alt text lungo (oltre la soglia) → usato così com'è, nessuna chiamata
//! 2. Controllo dimensione dopo l'espansione base64 → `ImageTooLarge`
//! 3. Per ogni tentativo: `RateLimiter::acquire(1.0)`, poi encode base64 e
//!    chiamata con timeout (il payload non sopravvive all'attesa o al backoff)
//! 4. Risposta vuota → alt text, poi "Image"
//! 5. Errori transitori (429, 5xx, rete, timeout) → retry con backoff doppio
//!
//! La concorrenza non è serializzata: più worker possono avere chiamate in
//! volo insieme, il limiter regola solo il ritmo.

use crate::config::Config;
use crate::error::VisionError;
use crate::image_optimizer::OptimizedImage;
use crate::rate_limiter::RateLimiter;
use crate::vision::client::{VisionClient, VisionRequest};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const FALLBACK_DESCRIPTION: &str = "Image";

/// Rate-limited, retried wrapper around a [`VisionClient`]
pub struct VisionDescriber {
    client: Arc<dyn VisionClient>,
    limiter: Arc<RateLimiter>,
    max_encoded_size: usize,
    timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    alt_threshold: usize,
}

impl VisionDescriber {
    pub fn new(client: Arc<dyn VisionClient>, limiter: Arc<RateLimiter>, config: &Config) -> Self {
        Self {
            client,
            limiter,
            max_encoded_size: config.max_encoded_size,
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(1),
            alt_threshold: config.describe_alt_threshold,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Describe `image`, falling back to `alt_text` when the model says nothing
    pub async fn describe(&self, image: &OptimizedImage, alt_text: &str, model: &str) -> Result<String, VisionError> {
        if alt_text.chars().count() > self.alt_threshold {
            debug!("Alt text is descriptive enough, skipping vision call for {}", image.hash);
            return Ok(alt_text.to_string());
        }

        let encoded_size = base64::encoded_len(image.byte_size(), true).unwrap_or(usize::MAX);
        if encoded_size > self.max_encoded_size {
            return Err(VisionError::ImageTooLarge {
                encoded_size,
                limit: self.max_encoded_size,
            });
        }

        let prompt = describe_prompt(alt_text);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;
        loop {
            let waited = self.limiter.acquire(1.0).await;
            if waited > 0.0 {
                debug!("Waited {:.3}s for a vision API token", waited);
            }

            // The payload only lives for the duration of one call
            let result = {
                let request = VisionRequest {
                    model: model.to_string(),
                    prompt: prompt.clone(),
                    image_base64: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                };
                match tokio::time::timeout(self.timeout, self.client.complete(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(VisionError::Timeout(self.timeout)),
                }
            };

            match result {
                Ok(content) => {
                    let description = content
                        .map(|text| text.trim().to_string())
                        .filter(|text| !text.is_empty())
                        .unwrap_or_else(|| fallback_description(alt_text));
                    return Ok(description);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Vision call for {} failed ({}), retry {}/{} in {:?}",
                        image.hash, e, attempt, self.max_retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn describe_prompt(alt_text: &str) -> String {
    let original = if alt_text.is_empty() {
        "No description provided"
    } else {
        alt_text
    };
    format!(
        "Please describe this image from documentation. Original description: {}",
        original
    )
}

/// Alt text, or a generic placeholder when there is none
pub fn fallback_description(alt_text: &str) -> String {
    if alt_text.trim().is_empty() {
        FALLBACK_DESCRIPTION.to_string()
    } else {
        alt_text.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted results, then answers with `default`
    pub(crate) struct ScriptedClient {
        script: Mutex<VecDeque<Result<Option<String>, VisionError>>>,
        default: Option<String>,
        delay: Duration,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
        pub payloads: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub(crate) fn answering(text: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default: Some(text.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                payloads: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn then(self, result: Result<Option<String>, VisionError>) -> Self {
            self.script.lock().unwrap().push_back(result);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl VisionClient for ScriptedClient {
        async fn complete(&self, request: &VisionRequest) -> Result<Option<String>, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.payloads.lock().unwrap().push(request.image_base64.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.default.clone()))
        }
    }

    fn image() -> OptimizedImage {
        OptimizedImage::new(vec![0xFF, 0xD8, 1, 2, 3, 4], 95, 1, 1)
    }

    fn describer(client: Arc<ScriptedClient>, limiter: Arc<RateLimiter>, config: &Config) -> VisionDescriber {
        VisionDescriber::new(client, limiter, config).with_initial_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_describe_consumes_one_token() {
        let client = Arc::new(ScriptedClient::answering("  A network diagram  "));
        let limiter = Arc::new(RateLimiter::new(0.001, 5.0));
        let describer = describer(client.clone(), limiter.clone(), &Config::default());

        let text = describer.describe(&image(), "diagram", "gpt-4o-mini").await.unwrap();

        assert_eq!(text, "A network diagram");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(limiter.available_tokens().await < 4.1);
        assert!(client.prompts.lock().unwrap()[0].contains("Original description: diagram"));
    }

    #[tokio::test]
    async fn test_long_alt_text_skips_the_call() {
        let client = Arc::new(ScriptedClient::answering("unused"));
        let limiter = Arc::new(RateLimiter::new(1.0, 1.0));
        let describer = describer(client.clone(), limiter, &Config::default());
        let alt = "A very long alternative text that already explains what the figure shows";

        let text = describer.describe(&image(), alt, "gpt-4o-mini").await.unwrap();
        assert_eq!(text, alt);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_payload_over_encoded_limit_is_rejected() {
        let client = Arc::new(ScriptedClient::answering("unused"));
        let config = Config {
            max_encoded_size: 4,
            ..Default::default()
        };
        let describer = describer(client.clone(), Arc::new(RateLimiter::new(1.0, 1.0)), &config);

        let err = describer.describe(&image(), "", "gpt-4o-mini").await.unwrap_err();
        assert!(matches!(err, VisionError::ImageTooLarge { encoded_size: 8, limit: 4 }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let client = Arc::new(
            ScriptedClient::answering("Recovered")
                .then(Err(VisionError::Transient("429".into())))
                .then(Err(VisionError::Transient("503".into()))),
        );
        let limiter = Arc::new(RateLimiter::new(100.0, 10.0));
        let describer = describer(client.clone(), limiter, &Config::default());

        let text = describer.describe(&image(), "", "gpt-4o-mini").await.unwrap();
        assert_eq!(text, "Recovered");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_carries_the_full_payload() {
        let client = Arc::new(ScriptedClient::answering("ok").then(Err(VisionError::Transient("502".into()))));
        let describer = describer(client.clone(), Arc::new(RateLimiter::new(100.0, 10.0)), &Config::default());

        describer.describe(&image(), "", "gpt-4o-mini").await.unwrap();

        let expected = base64::engine::general_purpose::STANDARD.encode(image().bytes);
        let payloads = client.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 2);
        assert!(payloads.iter().all(|p| *p == expected));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let client = Arc::new(ScriptedClient::answering("unused").then(Err(VisionError::Api("401".into()))));
        let describer = describer(client.clone(), Arc::new(RateLimiter::new(100.0, 10.0)), &Config::default());

        let err = describer.describe(&image(), "", "gpt-4o-mini").await.unwrap_err();
        assert!(matches!(err, VisionError::Api(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let client = Arc::new(ScriptedClient::answering("late").with_delay(Duration::from_secs(30)));
        let config = Config {
            request_timeout_secs: 2,
            max_retries: 1,
            ..Default::default()
        };
        let describer = describer(client.clone(), Arc::new(RateLimiter::new(100.0, 10.0)), &config);

        let err = describer.describe(&image(), "", "gpt-4o-mini").await.unwrap_err();
        assert!(matches!(err, VisionError::Timeout(d) if d == Duration::from_secs(2)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_completion_falls_back() {
        let client = Arc::new(ScriptedClient::answering("unused").then(Ok(None)).then(Ok(Some("   ".into()))));
        let describer = describer(client, Arc::new(RateLimiter::new(100.0, 10.0)), &Config::default());

        assert_eq!(describer.describe(&image(), "logo", "m").await.unwrap(), "logo");
        assert_eq!(describer.describe(&image(), "", "m").await.unwrap(), "Image");
    }
}
