//! 📸 pmv — move every photo from one storage backend to another, politely.
//!
//! 🧠 Knowledge graph:
//! - `app_config`: figment-loaded `AppConfig` (source, destination, runtime knobs).
//! - `backends`: the `PhotoBackend` contract plus S3, Google Drive, local-dir and
//!   in-memory implementations, dispatched through the `Backend` enum.
//! - `rate_limiter`: one token bucket per backend, cancellation-aware.
//! - `migrator`: connect, list, then migrate photo by photo with layered retries.
//! - `progress`: the live bar and the end-of-run summary table.
//! - `errors`: the typed `MigrationError` taxonomy everything above speaks.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod errors;
pub mod migrator;
pub mod progress;
pub mod rate_limiter;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::{Backend, PhotoBackend};
use crate::migrator::{MigrationReport, PhotoMigrator, RetryPolicy, RunStatus};
use crate::progress::MigrationProgress;

/// 🚀 Validate, build both backends, connect, migrate. The whole show.
///
/// `Err` is reserved for runs that never got going: bad config, connect failures,
/// a source that won't list. Cancellation before any photo moved is an `Ok` report
/// with `RunStatus::Cancelled`, same as cancellation halfway through.
pub async fn run(app_config: AppConfig, cancel: CancellationToken) -> Result<MigrationReport> {
    app_config
        .validate()
        .context("💀 The configuration loaded, but it doesn't make sense yet.")?;

    let source = Backend::from_config(&app_config.source)
        .context("💀 Couldn't build the source backend from its config.")?;
    let destination = Backend::from_config(&app_config.destination)
        .context("💀 Couldn't build the destination backend from its config.")?;

    let progress = if app_config.runtime.show_progress {
        MigrationProgress::new()
    } else {
        MigrationProgress::hidden()
    };
    info!(
        source = %source.label(),
        destination = %destination.label(),
        "🚀 starting migration"
    );

    let mut migrator = PhotoMigrator::new(source, destination)
        .with_policy(RetryPolicy::from(&app_config.runtime.retry))
        .with_progress(progress);

    match migrator.connect(&cancel).await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => return Ok(MigrationReport::untouched(RunStatus::Cancelled)),
        Err(e) => {
            return Err(e).context(
                "💀 Couldn't connect to both backends. Check credentials, endpoints, and paths.",
            );
        }
    }

    migrator
        .migrate_all(&cancel)
        .await
        .context("💀 Listing the source failed, so not a single photo was moved.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{BackendConfig, RuntimeConfig};
    use crate::backends::{InMemoryConfig, LocalDirConfig, RateLimitConfig, SeedPhoto};

    fn in_memory_to_dir(root: &std::path::Path) -> AppConfig {
        AppConfig {
            source: BackendConfig::InMemory(InMemoryConfig {
                label: Some("seeded".into()),
                photos: vec![
                    SeedPhoto {
                        name: "a.jpg".into(),
                        content: "alpha".into(),
                    },
                    SeedPhoto {
                        name: "nested/b.png".into(),
                        content: "bravo".into(),
                    },
                ],
                rate_limit: RateLimitConfig::default(),
            }),
            destination: BackendConfig::LocalDir(LocalDirConfig {
                root: root.to_path_buf(),
                extensions: Vec::new(),
                create: true,
                rate_limit: RateLimitConfig::default(),
            }),
            runtime: RuntimeConfig {
                show_progress: false,
                ..RuntimeConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn the_one_where_photos_land_on_disk_end_to_end() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        let the_root = the_dir.path().join("out");

        let the_report = run(in_memory_to_dir(&the_root), CancellationToken::new())
            .await
            .expect("run succeeds");

        assert_eq!(the_report.status, RunStatus::Success);
        assert_eq!(the_report.exit_code(), 0);
        assert_eq!(the_report.metrics.photos_migrated, 2);
        assert_eq!(the_report.metrics.bytes_transferred, 10);
        assert_eq!(std::fs::read(the_root.join("a.jpg")).expect("a.jpg"), b"alpha");
        assert_eq!(std::fs::read(the_root.join("nested/b.png")).expect("b.png"), b"bravo");
    }

    #[tokio::test]
    async fn the_one_where_a_cancelled_run_never_starts() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let the_report = run(in_memory_to_dir(&the_dir.path().join("out")), cancel)
            .await
            .expect("cancellation is a report, not an error");

        assert_eq!(the_report.status, RunStatus::Cancelled);
        assert_eq!(the_report.exit_code(), 130);
    }

    #[tokio::test]
    async fn the_one_where_a_broken_config_never_reaches_the_network() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        let mut the_config = in_memory_to_dir(the_dir.path());
        the_config.runtime.retry.max_attempts = 0;

        let the_error = run(the_config, CancellationToken::new())
            .await
            .expect_err("invalid config");
        assert!(format!("{the_error:#}").contains("max_attempts"));
    }
}
