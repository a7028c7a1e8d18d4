// ai
//! 🚚 migrator.rs — the moving truck between two photo homes.
//!
//! 🎬 *[a source. a destination. a list of photos. one very patient loop.]*
//!
//! 🧠 Knowledge graph:
//! - `PhotoMigrator<S, D>` owns both backends, the retry policy, the metrics and the
//!   progress bar. Generic over `PhotoBackend` so tests plug in fixtures and the CLI plugs
//!   in the `Backend` enum.
//! - Run lifecycle: `Idle → Connecting → Listing → Migrating(i) → Done | Failed`,
//!   published through a `tokio::sync::watch` so anyone can peek without locking.
//! - Listing is fatal, photos are not: a list failure aborts the run, a photo failure
//!   gets recorded and the loop moves on.
//! - Single photo: an outer loop of `max_attempts` (exponential backoff between), each
//!   attempt downloading then uploading with `io_attempts` tries apiece (linear backoff).
//!   Every wait goes through [`sleep_or_cancel`], so Ctrl-C never waits out a backoff.
//! - A panic inside the loop is caught and reported as `RunStatus::Faulted`. The failures
//!   collected up to that point survive.
//! - Sequential on purpose: list order in, list order out. No fan-out. 🦆

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app_config::RetryConfig;
use crate::backends::PhotoBackend;
use crate::common::Photo;
use crate::errors::{BackendSide, MigrationError};
use crate::progress::MigrationProgress;

/// 🔄 How hard we try, and how long we wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Outer attempts per photo (download + upload each time).
    pub max_attempts: u32,
    /// Wait after the first failed outer attempt; doubles after each one after that.
    pub initial_backoff: Duration,
    /// Tries per download and per upload inside one attempt.
    pub io_attempts: u32,
    /// Wait after the k-th failed download/upload is `k * io_backoff_step`.
    pub io_backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            io_attempts: config.io_attempts,
            io_backoff_step: Duration::from_millis(config.io_backoff_step_ms),
        }
    }
}

impl RetryPolicy {
    /// ⏳ 1, 2, 4, ... units after outer attempt 1, 2, 3, ... (1-based).
    pub fn outer_backoff(&self, failed_attempt: u32) -> Duration {
        let the_factor = 1u32
            .checked_shl(failed_attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(the_factor)
    }

    /// ⏳ 1, 2, 3, ... units after the 1st, 2nd, 3rd, ... failed I/O try.
    pub fn io_backoff(&self, failures: u32) -> Duration {
        self.io_backoff_step.saturating_mul(failures)
    }
}

/// 📊 Run counters. Atomics, so a snapshot never needs a lock and never tears.
#[derive(Debug, Default)]
pub struct MigrationMetrics {
    photos_migrated: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl MigrationMetrics {
    fn record_success(&self, bytes: u64) {
        self.photos_migrated.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            photos_migrated: self.photos_migrated.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

/// 📸 Read-only copy of the counters at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub photos_migrated: u64,
    pub bytes_transferred: u64,
}

/// 🚦 Where a run is right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connecting,
    Listing,
    /// Working on the photo at this index of the listing.
    Migrating(usize),
    Done,
    Failed,
}

/// 💀 A photo that didn't make it, and why.
#[derive(Debug, Clone)]
pub struct PhotoFailure {
    pub name: String,
    pub error: MigrationError,
}

/// 🏁 How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    CompletedWithErrors,
    Cancelled,
    /// Something panicked mid-run. The message is whatever the panic carried.
    Faulted(String),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::CompletedWithErrors => write!(f, "completed with errors"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::Faulted(message) => write!(f, "faulted: {message}"),
        }
    }
}

/// 📜 Everything a caller needs to know once `migrate_all` returns.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub status: RunStatus,
    pub metrics: MetricsSnapshot,
    /// In list order.
    pub failures: Vec<PhotoFailure>,
    pub listed: usize,
    pub attempted: usize,
    pub elapsed: Duration,
}

impl MigrationReport {
    /// A run that ended before any photo was touched.
    pub fn untouched(status: RunStatus) -> Self {
        Self {
            status,
            metrics: MetricsSnapshot::default(),
            failures: Vec::new(),
            listed: 0,
            attempted: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// 🚪 0 success, 130 cancelled (128 + SIGINT), 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Cancelled => 130,
            RunStatus::CompletedWithErrors | RunStatus::Faulted(_) => 1,
        }
    }
}

/// ⏳ Sleep for `duration`, unless `cancel` fires first.
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrationError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

enum LoopEnd {
    Finished,
    Cancelled,
}

/// 🚚 Moves every photo from `S` to `D`, one at a time.
#[derive(Debug)]
pub struct PhotoMigrator<S, D> {
    source: S,
    destination: D,
    policy: RetryPolicy,
    metrics: MigrationMetrics,
    progress: MigrationProgress,
    state: watch::Sender<RunState>,
}

impl<S: PhotoBackend, D: PhotoBackend> PhotoMigrator<S, D> {
    pub fn new(source: S, destination: D) -> Self {
        Self {
            source,
            destination,
            policy: RetryPolicy::default(),
            metrics: MigrationMetrics::default(),
            progress: MigrationProgress::hidden(),
            state: watch::Sender::new(RunState::Idle),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// 👀 Follow state changes as they happen.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// 🔌 Source first, then destination. No retries here: a bad credential stays bad.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        self.state.send_replace(RunState::Connecting);

        if let Err(e) = self.source.connect(cancel).await {
            self.state.send_replace(RunState::Failed);
            error!(backend = %self.source.label(), error = %e, "💀 could not connect to the source");
            return Err(MigrationError::Connect {
                side: BackendSide::Source,
                source: Box::new(e),
            });
        }
        if let Err(e) = self.destination.connect(cancel).await {
            self.state.send_replace(RunState::Failed);
            error!(backend = %self.destination.label(), error = %e, "💀 could not connect to the destination");
            return Err(MigrationError::Connect {
                side: BackendSide::Destination,
                source: Box::new(e),
            });
        }

        info!(
            source = %self.source.label(),
            destination = %self.destination.label(),
            "🔌 both backends connected"
        );
        Ok(())
    }

    /// 🚚 List the source and migrate every photo in list order.
    ///
    /// `Err` only when listing fails. Everything else, including cancellation and panics,
    /// comes back as a report.
    pub async fn migrate_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigrationError> {
        let started = Instant::now();
        self.state.send_replace(RunState::Listing);

        let the_photos = match self.source.list_photos(cancel).await {
            Ok(photos) => photos,
            Err(e) if e.is_cancelled() => {
                self.state.send_replace(RunState::Done);
                warn!("🛑 cancelled while listing the source");
                let mut the_report = MigrationReport::untouched(RunStatus::Cancelled);
                the_report.elapsed = started.elapsed();
                return Ok(the_report);
            }
            Err(e) => {
                self.state.send_replace(RunState::Failed);
                error!(backend = %self.source.label(), error = %e, "💀 listing the source failed, nothing was migrated");
                return Err(e);
            }
        };

        info!(count = the_photos.len(), "📜 source listed");
        self.progress.set_total(the_photos.len() as u64);

        let mut the_failures: Vec<PhotoFailure> = Vec::new();
        let mut the_attempted = 0usize;

        let the_outcome = AssertUnwindSafe(async {
            for (index, photo) in the_photos.iter().enumerate() {
                if cancel.is_cancelled() {
                    return LoopEnd::Cancelled;
                }
                self.state.send_replace(RunState::Migrating(index));
                self.progress.photo_started(&photo.name);
                the_attempted += 1;

                match self.migrate_one(photo, cancel).await {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return LoopEnd::Cancelled,
                    Err(e) => {
                        self.progress.photo_failed();
                        the_failures.push(PhotoFailure {
                            name: photo.name.clone(),
                            error: e,
                        });
                    }
                }
            }
            LoopEnd::Finished
        })
        .catch_unwind()
        .await;

        let the_status = match the_outcome {
            Ok(LoopEnd::Finished) if the_failures.is_empty() => RunStatus::Success,
            Ok(LoopEnd::Finished) => RunStatus::CompletedWithErrors,
            Ok(LoopEnd::Cancelled) => RunStatus::Cancelled,
            Err(panic) => RunStatus::Faulted(panic_message(panic.as_ref())),
        };

        let the_report = MigrationReport {
            status: the_status,
            metrics: self.metrics.snapshot(),
            failures: the_failures,
            listed: the_photos.len(),
            attempted: the_attempted,
            elapsed: started.elapsed(),
        };
        self.finish(&the_report);
        Ok(the_report)
    }

    fn finish(&self, report: &MigrationReport) {
        let the_final_state = match report.status {
            RunStatus::Faulted(_) => RunState::Failed,
            _ => RunState::Done,
        };
        self.state.send_replace(the_final_state);
        self.progress.finish(&report.status);

        let migrated = report.metrics.photos_migrated;
        let bytes = report.metrics.bytes_transferred;
        let failed = report.failures.len();
        match &report.status {
            RunStatus::Success => {
                info!(migrated, bytes, "✅ migration complete, every photo made it")
            }
            RunStatus::CompletedWithErrors => {
                warn!(migrated, bytes, failed, "⚠️ migration completed with errors")
            }
            RunStatus::Cancelled => {
                warn!(migrated, bytes, failed, attempted = report.attempted, "🛑 migration cancelled")
            }
            RunStatus::Faulted(message) => {
                error!(migrated, bytes, failed, panic = %message, "💀 migration faulted")
            }
        }
    }

    /// 📸 Move one photo, retries and all. Metrics move by exactly one photo on success.
    pub async fn migrate_one(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        if photo.name.is_empty() {
            return Err(MigrationError::InvalidPhoto {
                reason: format!("photo with id {:?} has an empty name", photo.id),
            });
        }

        let mut the_last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(photo, cancel).await {
                Ok(bytes) => {
                    self.metrics.record_success(bytes);
                    self.progress.photo_migrated(bytes);
                    info!(photo = %photo.name, attempt, bytes, "✅ photo migrated");
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(photo = %photo.name, attempt, error = %e, "⚠️ migration attempt failed");
                    the_last_error = Some(e);
                    sleep_or_cancel(self.policy.outer_backoff(attempt), cancel).await?;
                }
            }
        }

        Err(MigrationError::MigrationFailed {
            name: photo.name.clone(),
            attempts: self.policy.max_attempts,
            last_error: Box::new(the_last_error.unwrap_or_else(|| {
                MigrationError::Internal("retry policy allows zero attempts".to_string())
            })),
        })
    }

    // -- 📥📤 one outer attempt: download (with retries), then upload (with retries)
    async fn attempt(&self, photo: &Photo, cancel: &CancellationToken) -> Result<u64, MigrationError> {
        let the_bytes = self
            .with_io_retries("download", photo, cancel, || {
                self.source.download_photo(photo, cancel)
            })
            .await?;
        self.with_io_retries("upload", photo, cancel, || {
            self.destination.upload_photo(photo, &the_bytes, cancel)
        })
        .await?;
        Ok(the_bytes.len() as u64)
    }

    async fn with_io_retries<T, F, Fut>(
        &self,
        what: &str,
        photo: &Photo,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let mut the_failures = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    the_failures += 1;
                    debug!(photo = %photo.name, try_number = the_failures, error = %e, "🔁 {what} failed");
                    sleep_or_cancel(self.policy.io_backoff(the_failures), cancel).await?;
                    if the_failures >= self.policy.io_attempts {
                        return Err(e);
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
