// ai
//! 💀 errors.rs — the official registry of everything that can go wrong.
//!
//! 🧠 Knowledge graph:
//! - `MigrationError` is the typed taxonomy the orchestrator reasons about. It has to be typed,
//!   because "was that a cancellation or a 503?" decides whether we retry or go home.
//! - Backends produce `Authentication`, `Connection`, `NotConnected`, `List`, `NotFound`,
//!   `Download`, `Upload`, `RateLimitExceeded`, `Cancelled`.
//! - The migrator produces `InvalidPhoto`, `MigrationFailed`, `Connect`, `Internal`.
//! - Building a limiter from bad knobs produces `InvalidRateLimit`.
//! - App edges (config, CLI) stay on `anyhow`. The core speaks thiserror. 🦆

use std::fmt;

use thiserror::Error;

/// 🎭 Which end of the migration pipe misbehaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSide {
    Source,
    Destination,
}

impl fmt::Display for BackendSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSide::Source => write!(f, "source"),
            BackendSide::Destination => write!(f, "destination"),
        }
    }
}

/// 💀 Every way a photo migration can disappoint you, sorted by genre.
///
/// `Clone` because a failure gets recorded in the report AND logged AND sometimes
/// wrapped as the `last_error` of a `MigrationFailed`. Errors are cheap. Feelings are not.
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// 🔒 Credentials missing, wrong, expired, or simply unloved.
    #[error("authentication failed for {backend}: {reason}")]
    Authentication { backend: String, reason: String },

    /// 📡 Transport setup failed. The network said "new phone who dis".
    #[error("could not connect to {backend}: {reason}")]
    Connection { backend: String, reason: String },

    /// 🚪 Someone called list/download/upload before connect() succeeded.
    #[error("{backend} was used before connect() succeeded")]
    NotConnected { backend: String },

    /// 📜 Listing blew up. All-or-nothing: no partial list is ever returned.
    #[error("listing photos from {backend} failed: {reason}")]
    List { backend: String, reason: String },

    /// 🚫 The photo can't be migrated as-is (e.g. empty name). Never retried.
    #[error("invalid photo: {reason}")]
    InvalidPhoto { reason: String },

    /// 🔍 The backend has never heard of this photo.
    #[error("photo '{name}' not found in {backend}")]
    NotFound { backend: String, name: String },

    /// 📥 Fetching the bytes failed.
    #[error("download of '{name}' from {backend} failed: {reason}")]
    Download {
        backend: String,
        name: String,
        reason: String,
    },

    /// 📤 Writing the bytes failed.
    #[error("upload of '{name}' to {backend} failed: {reason}")]
    Upload {
        backend: String,
        name: String,
        reason: String,
    },

    /// 🔄 Every outer attempt for one photo failed. Recorded, skipped, batch goes on.
    #[error("failed to migrate photo '{name}' after {attempts} attempts: {last_error}")]
    MigrationFailed {
        name: String,
        attempts: u32,
        #[source]
        last_error: Box<MigrationError>,
    },

    /// 🔌 Connecting one side of the pipe failed. Fatal to the run.
    #[error("failed to connect {side} backend: {source}")]
    Connect {
        side: BackendSide,
        #[source]
        source: Box<MigrationError>,
    },

    /// 🪣 The token bucket could not admit the request in time (or ever).
    #[error("rate limiter could not admit {requested} token(s): {reason}")]
    RateLimitExceeded { requested: u32, reason: String },

    /// 🚦 The limiter knobs make no sense (zero rate, zero burst, NaN).
    #[error("invalid rate limit: {reason}")]
    InvalidRateLimit { reason: String },

    /// 🛑 The big red button was pressed. Never retried, always wins.
    #[error("operation cancelled")]
    Cancelled,

    /// 🐛 Something we did not plan for. Usually a caught panic.
    #[error("internal fault: {0}")]
    Internal(String),
}

impl MigrationError {
    /// 🛑 True if this error is (or wraps) a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            MigrationError::Cancelled => true,
            MigrationError::MigrationFailed { last_error, .. } => last_error.is_cancelled(),
            MigrationError::Connect { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_wrapped_cancellations_still_count_as_cancellations() {
        let the_wrapped = MigrationError::Connect {
            side: BackendSide::Destination,
            source: Box::new(MigrationError::Cancelled),
        };
        assert!(the_wrapped.is_cancelled());
        assert!(
            !MigrationError::InvalidPhoto {
                reason: "name is empty".into()
            }
            .is_cancelled()
        );
    }

    #[test]
    fn the_one_where_migration_failed_names_the_photo_and_the_culprit() {
        let the_error = MigrationError::MigrationFailed {
            name: "b.jpg".into(),
            attempts: 3,
            last_error: Box::new(MigrationError::Upload {
                backend: "in-memory".into(),
                name: "b.jpg".into(),
                reason: "disk full of regrets".into(),
            }),
        };
        let the_message = the_error.to_string();
        assert!(the_message.contains("b.jpg"));
        assert!(the_message.contains("3 attempts"));
        assert!(the_message.contains("disk full of regrets"));
        assert_eq!(BackendSide::Source.to_string(), "source");
    }
}
