//! 🔌 Backends — where the real I/O happens.
//!
//! 📸 A backend holds photos. One of them gives photos up (the source), the other
//! receives them (the destination). Same trait, two independent instances. No base
//! class, no inheritance drama, just a contract both sides sign.
//!
//! 🎭 This module is the casting agency. Need an S3 bucket? A Google Drive?
//! A folder on disk? Something that lives entirely in RAM and forgets you on exit?
//! We've got a backend for that.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::app_config::BackendConfig;
use crate::common::Photo;
use crate::errors::MigrationError;

pub mod common_config;
pub mod google_drive;
pub mod in_mem;
pub mod local_dir;
pub mod s3;

// 🎯 Re-export backend-specific configs so callers can do `backends::S3Config`
// instead of spelunking into `backends::s3::S3Config`.
pub use common_config::RateLimitConfig;
pub use google_drive::{GoogleDriveBackend, GoogleDriveConfig};
pub use in_mem::{InMemoryBackend, InMemoryConfig, SeedPhoto};
pub use local_dir::{LocalDirBackend, LocalDirConfig};
pub use s3::{S3Backend, S3Config};

/// 📸 A place photos live. Implement this and the migrator will happily drain you or fill you.
///
/// # Contract 📜
/// - `connect` first. Everything else before a successful `connect` is `NotConnected`.
/// - `list_photos` is eager and all-or-nothing: every page, or an error. Never half a list.
/// - Every network-touching call goes through the backend's own `RateLimiter`.
/// - Every call observes `cancel` and returns `MigrationError::Cancelled` promptly when it fires.
/// - `&self` on the I/O calls, because the limiter and the clients are internally synchronized.
///   `&mut self` on `connect`, because that's where the state actually changes.
#[async_trait]
pub trait PhotoBackend: std::fmt::Debug + Send + Sync {
    /// 🏷️ Human label for logs: `s3://bucket`, `google-drive`, `dir:/mnt/photos`.
    fn label(&self) -> String;

    /// 🔌 Establish credentials and a session.
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError>;

    /// 📜 Enumerate every photo, in a stable order.
    async fn list_photos(&self, cancel: &CancellationToken) -> Result<Vec<Photo>, MigrationError>;

    /// 📥 Fetch the full content of one photo.
    async fn download_photo(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MigrationError>;

    /// 📤 Write one photo's content under the backend's naming convention.
    async fn upload_photo(
        &self,
        photo: &Photo,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError>;
}

/// 🎭 The many faces of a Backend — a polymorphic casting call for photo homes.
///
/// Each variant wraps a concrete implementation; the enum dispatches via
/// `impl PhotoBackend for Backend`, so the migrator never needs to know whether it's
/// talking to AWS, Google, a disk, or a Vec.
#[derive(Debug)]
pub enum Backend {
    S3(S3Backend),
    GoogleDrive(GoogleDriveBackend),
    LocalDir(LocalDirBackend),
    InMemory(InMemoryBackend),
}

impl Backend {
    /// 🏗️ Build a backend from its config. Nothing touches the network here — that's `connect`'s job.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let the_backend = match config {
            BackendConfig::S3(c) => Backend::S3(S3Backend::new(c.clone())?),
            BackendConfig::GoogleDrive(c) => Backend::GoogleDrive(GoogleDriveBackend::new(c.clone())?),
            BackendConfig::LocalDir(c) => Backend::LocalDir(LocalDirBackend::new(c.clone())?),
            BackendConfig::InMemory(c) => Backend::InMemory(InMemoryBackend::from_config(c)?),
        };
        Ok(the_backend)
    }
}

#[async_trait]
impl PhotoBackend for Backend {
    fn label(&self) -> String {
        match self {
            Backend::S3(b) => b.label(),
            Backend::GoogleDrive(b) => b.label(),
            Backend::LocalDir(b) => b.label(),
            Backend::InMemory(b) => b.label(),
        }
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        match self {
            Backend::S3(b) => b.connect(cancel).await,
            Backend::GoogleDrive(b) => b.connect(cancel).await,
            Backend::LocalDir(b) => b.connect(cancel).await,
            Backend::InMemory(b) => b.connect(cancel).await,
        }
    }

    async fn list_photos(&self, cancel: &CancellationToken) -> Result<Vec<Photo>, MigrationError> {
        match self {
            Backend::S3(b) => b.list_photos(cancel).await,
            Backend::GoogleDrive(b) => b.list_photos(cancel).await,
            Backend::LocalDir(b) => b.list_photos(cancel).await,
            Backend::InMemory(b) => b.list_photos(cancel).await,
        }
    }

    async fn download_photo(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MigrationError> {
        match self {
            Backend::S3(b) => b.download_photo(photo, cancel).await,
            Backend::GoogleDrive(b) => b.download_photo(photo, cancel).await,
            Backend::LocalDir(b) => b.download_photo(photo, cancel).await,
            Backend::InMemory(b) => b.download_photo(photo, cancel).await,
        }
    }

    async fn upload_photo(
        &self,
        photo: &Photo,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        match self {
            Backend::S3(b) => b.upload_photo(photo, data, cancel).await,
            Backend::GoogleDrive(b) => b.upload_photo(photo, data, cancel).await,
            Backend::LocalDir(b) => b.upload_photo(photo, data, cancel).await,
            Backend::InMemory(b) => b.upload_photo(photo, data, cancel).await,
        }
    }
}

/// 🛑 Run a backend future unless the token fires first. Network calls don't know about
/// our cancellation token, so we race them against it.
pub(crate) async fn or_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T, MigrationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrationError::Cancelled),
        value = fut => Ok(value),
    }
}
