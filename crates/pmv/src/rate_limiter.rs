// ai
//! 🪣 rate_limiter.rs — the bouncer at the door of every provider API.
//!
//! 🎬 *[a velvet rope. a clipboard. a token bucket that refills at a fixed rate.]*
//! *["you can come in," says the bucket, "once there's a token for you."]*
//!
//! 🧠 Knowledge graph:
//! - One `RateLimiter` per backend instance. Every page request, download and upload
//!   goes through `acquire` before touching the network.
//! - Token bucket: capacity = `burst`, refill = `rate` tokens per second.
//! - Waits are cooperative: `tokio::select!` against the cancellation token, so a
//!   shutdown never gets stuck behind a slow bucket.
//! - Clock is `tokio::time::Instant`, so tests pause time and assert exact waits
//!   without sleeping for real. No flaky CI. No CI-induced gray hairs.
//! - Not FIFO. Whoever finds a token first gets in. It's a nightclub, not a DMV. 🦆

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::errors::MigrationError;

/// 🔧 Burst size when the config doesn't pick one.
pub const DEFAULT_BURST: u32 = 5;

// -- ⏱️ floor for a single wait. float math can leave us 0.0000001 tokens short,
// -- and a zero-length sleep on a paused clock is an infinite loop with extra steps.
const MIN_WAIT: Duration = Duration::from_millis(1);

// -- 🐌 ceiling for a single wait. we re-check the bucket after it anyway.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, rate: f64, burst: u32) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst as f64);
        self.last_refill = now;
    }
}

/// 🪣 A token-bucket admission gate, safe to share between concurrent callers.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: u32,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// 🚀 A fresh limiter with a full bucket.
    ///
    /// 💀 Errors with `InvalidRateLimit` if `rate` is not a positive finite number or
    /// `burst` is zero. A bucket that never refills is a brick, not a limiter.
    pub fn new(rate: f64, burst: u32) -> Result<Self, MigrationError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(MigrationError::InvalidRateLimit {
                reason: format!("rate must be a positive number of tokens per second, got {rate}"),
            });
        }
        if burst == 0 {
            return Err(MigrationError::InvalidRateLimit {
                reason: "burst must be at least 1".to_string(),
            });
        }
        Ok(Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// 🏎️ A million tokens a second. For fixtures that want the contract without the waiting.
    pub(crate) fn unthrottled() -> Self {
        Self {
            rate: 1_000_000.0,
            burst: 1_000,
            bucket: Mutex::new(Bucket {
                tokens: 1_000.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// 🎟️ Wait until `n` tokens are available, then take them.
    ///
    /// Returns `Cancelled` the moment `cancel` fires.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<(), MigrationError> {
        self.admit(n, None, cancel).await
    }

    /// ⏳ Like [`acquire`](Self::acquire), but gives up with `RateLimitExceeded` if the
    /// tokens can't be had before `deadline`. We don't wait around to find out: if the
    /// math says we'd miss it, we fail right away.
    pub async fn acquire_before(
        &self,
        n: u32,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        self.admit(n, Some(deadline), cancel).await
    }

    async fn admit(
        &self,
        n: u32,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        if n > self.burst {
            return Err(MigrationError::RateLimitExceeded {
                requested: n,
                reason: format!("request exceeds the bucket capacity of {}", self.burst),
            });
        }

        loop {
            if cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            let now = Instant::now();
            let the_wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill(now, self.rate, self.burst);
                if bucket.tokens >= n as f64 {
                    bucket.tokens -= n as f64;
                    trace!(tokens_left = bucket.tokens, "🎟️ admitted {} token(s)", n);
                    return Ok(());
                }
                let the_shortfall = n as f64 - bucket.tokens;
                // -- a glacial rate can ask for more seconds than a Duration holds
                Duration::try_from_secs_f64(the_shortfall / self.rate)
                    .unwrap_or(MAX_WAIT)
                    .clamp(MIN_WAIT, MAX_WAIT)
            };

            if let Some(deadline) = deadline {
                if now.checked_add(the_wait).is_none_or(|ready| ready > deadline) {
                    return Err(MigrationError::RateLimitExceeded {
                        requested: n,
                        reason: format!(
                            "would need to wait {:?}, which is past the caller's deadline",
                            the_wait
                        ),
                    });
                }
            }

            trace!(wait = ?the_wait, "🪣 bucket is dry, waiting for a refill");
            tokio::select! {
                _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = tokio::time::sleep(the_wait) => {}
            }
        }
    }
}
