// ai
//! 📦 **Common Backend Configs** — the shared DNA of every backend configuration.
//!
//! 🧠 Knowledge graph:
//! - `RateLimitConfig`: embedded as `rate_limit` in every backend config (`S3Config`,
//!   `GoogleDriveConfig`, `LocalDirConfig`, `InMemoryConfig`). How fast may we knock
//!   on the provider's door? That's a backend-level concern, so it lives here.
//! - Re-exported from `backends.rs` so callers can `use crate::backends::RateLimitConfig`.
//!
//! ⚠️ Lives in `backends` (not `app_config`) to dodge a circular import:
//!   `app_config` → `backends/s3` → `app_config` is a circle, and the module system
//!   has opinions about circles. 🦆

use serde::Deserialize;

use crate::errors::MigrationError;
use crate::rate_limiter::{DEFAULT_BURST, RateLimiter};

/// 🪣 Shared rate-limit knobs embedded by every backend config.
///
/// `requests_per_second` must be > 0. `burst` defaults to 5, which is what the
/// providers tolerated back when someone tuned this by hand and called it science.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// 🚦 Sustained requests per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    /// 💥 Max bucket capacity — how many requests may fire back-to-back
    #[serde(default = "default_burst")]
    pub burst: u32,
}

// 🚦 10 rps — polite enough for S3, polite enough for Drive's per-user quota.
fn default_requests_per_second() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    DEFAULT_BURST
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl RateLimitConfig {
    /// 🏗️ Turn the knobs into an actual bucket.
    pub fn build_limiter(&self) -> Result<RateLimiter, MigrationError> {
        RateLimiter::new(self.requests_per_second, self.burst)
    }

    /// 🔍 Cheap validation for `AppConfig::validate`.
    pub(crate) fn problems(&self) -> Option<String> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Some(format!(
                "rate_limit.requests_per_second must be > 0, got {}",
                self.requests_per_second
            ));
        }
        if self.burst == 0 {
            return Some("rate_limit.burst must be at least 1".to_string());
        }
        None
    }
}
