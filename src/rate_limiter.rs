//! # Rate Limiter Module
//!
//! Token bucket condiviso da tutti i worker: ogni chiamata alla vision API
//! passa da qui, indipendentemente da quale documento la emette.
//!
//! ## Comportamento:
//! - Capacità = `burst_limit`, ricarica = `rate_limit` token al secondo
//! - La ricarica è calcolata dal tempo trascorso ed è limitata alla capacità
//! - `acquire()` non fallisce mai: sotto carico aumenta solo l'attesa
//! - Refill e addebito avvengono sotto un unico `tokio::sync::Mutex`, che è
//!   FIFO: le richieste vengono servite nell'ordine di arrivo
//!
//! ## Esempio:
//! ```rust,ignore
//! let limiter = Arc::new(RateLimiter::new(200.0, 600.0));
//! let waited = limiter.acquire(1.0).await;
//! debug!("waited {:.3}s for a token", waited);
//! ```

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Absorbs float drift after sleeping exactly the computed deficit
const TOKEN_EPSILON: f64 = 1e-9;

/// Longest single sleep; the loop re-checks the bucket after each one
const MAX_SLEEP: Duration = Duration::from_secs(60);
const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens added per second
    rate: f64,
    /// Maximum tokens in the bucket
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Wait until `cost` tokens are available, debit them and return the
    /// seconds spent waiting (lock contention included).
    ///
    /// The lock is held while sleeping, so later callers queue behind the
    /// current one instead of overtaking it.
    pub async fn acquire(&self, cost: f64) -> f64 {
        let started = Instant::now();

        if !(cost > 0.0) {
            return 0.0;
        }

        let cost = if cost > self.capacity {
            warn!(
                "Requested {} tokens but bucket capacity is {}, clamping",
                cost, self.capacity
            );
            self.capacity
        } else {
            cost
        };

        let mut bucket = self.bucket.lock().await;
        loop {
            self.refill(&mut bucket);
            if bucket.tokens + TOKEN_EPSILON >= cost {
                bucket.tokens = (bucket.tokens - cost).max(0.0);
                break;
            }

            let deficit = cost - bucket.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.rate)
                .unwrap_or(MAX_SLEEP)
                .clamp(MIN_SLEEP, MAX_SLEEP);
            debug!("Rate limited: {:.3} tokens short, sleeping {:?}", deficit, wait);
            tokio::time::sleep(wait).await;
        }
        drop(bucket);

        started.elapsed().as_secs_f64()
    }

    /// Current balance after refill
    pub async fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}
