//! # Previously, on pmv...
//!
//! 🎬 The photos were trapped. Stranded between two clouds like a traveler stuck in
//! a connecting airport with no WiFi and a dead phone. Someone had to move them.
//! Someone had to write a backend so simple it lives entirely in RAM, gone the
//! moment you blink.
//!
//! That someone was this module.
//!
//! `in_mem` provides an [`InMemoryBackend`] for tests, dry runs and local development.
//! Its state sits behind an `Arc<Mutex<...>>` so a test can hand a clone to the
//! migrator and still peek inside afterwards — great for assertions, great for trust
//! issues, great for both.
//!
//! 🧪 It can also be told to misbehave: fail the next N downloads of a photo, fail
//! uploads, fail listing outright. Scripted chaos. The best kind.
//!
//! ⚠️ This is NOT for production. If you're migrating your wedding photos into RAM,
//! please also deploy a therapist.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::backends::{PhotoBackend, RateLimitConfig};
use crate::common::Photo;
use crate::errors::MigrationError;
use crate::rate_limiter::RateLimiter;

/// 🌱 One photo to plant in the in-memory garden at startup.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SeedPhoto {
    pub name: String,
    /// 📦 Stored as UTF-8 bytes. It's a test fixture, not a Hasselblad.
    #[serde(default)]
    pub content: String,
}

/// 🔧 Config for the in-memory backend — handy for `pmv --config dry-run.toml` smoke tests.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct InMemoryConfig {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub photos: Vec<SeedPhoto>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Default)]
struct InMemoryState {
    connected: bool,
    photos: Vec<(Photo, Vec<u8>)>,
    // -- 🎭 scripted failures: name → how many more calls should fail
    download_failures: HashMap<String, u32>,
    upload_failures: HashMap<String, u32>,
    list_failure: Option<String>,
    connect_failure: Option<MigrationError>,
    // -- 📊 call ledgers, for the "how many I/O calls did that take" crowd
    download_calls: HashMap<String, u32>,
    upload_calls: HashMap<String, u32>,
    list_calls: u32,
}

/// 📦 A backend that never forgets. Until the process exits. Then it forgets everything.
///
/// Clone-able because tests need to peek inside after handing `self` off to the
/// migrator. The `Arc` means every clone shares the same photos, failures and counters.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    label: String,
    state: Arc<Mutex<InMemoryState>>,
    limiter: Arc<RateLimiter>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// 🚀 An empty backend with a limiter so generous it may as well not exist.
    pub fn new() -> Self {
        Self::with_photos(Vec::<(String, Vec<u8>)>::new())
    }

    /// 🌱 Pre-seeded with `(name, bytes)` pairs, in that order.
    pub fn with_photos<N, B>(photos: impl IntoIterator<Item = (N, B)>) -> Self
    where
        N: Into<String>,
        B: Into<Vec<u8>>,
    {
        let the_photos = photos
            .into_iter()
            .map(|(name, bytes)| {
                let bytes = bytes.into();
                let mut photo = Photo::named(name);
                photo.size = Some(bytes.len() as u64);
                (photo, bytes)
            })
            .collect();
        Self {
            label: "in-memory".to_string(),
            state: Arc::new(Mutex::new(InMemoryState {
                photos: the_photos,
                ..InMemoryState::default()
            })),
            // -- 🪣 tests measure backoff, not bucket refills
            limiter: Arc::new(RateLimiter::unthrottled()),
        }
    }

    /// 🏗️ Build from config: seeds, label and a real rate limiter.
    pub fn from_config(config: &InMemoryConfig) -> Result<Self> {
        let the_seeds = config
            .photos
            .iter()
            .map(|seed| (seed.name.clone(), seed.content.clone().into_bytes()));
        let mut the_backend = Self::with_photos(the_seeds);
        the_backend.limiter = Arc::new(config.rate_limit.build_limiter()?);
        if let Some(label) = &config.label {
            the_backend.label = label.clone();
        }
        Ok(the_backend)
    }

    /// 🏷️ Rename for logs. Two in-memory backends in one test deserve two names.
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 🪣 Swap in a specific limiter (for the tests that DO care about the bucket).
    pub fn with_rate_limit(mut self, config: &RateLimitConfig) -> Result<Self, MigrationError> {
        self.limiter = Arc::new(config.build_limiter()?);
        Ok(self)
    }

    /// 💥 The next `times` downloads of `name` fail. `u32::MAX` is "forever", give or take.
    pub async fn fail_downloads(&self, name: &str, times: u32) {
        self.state
            .lock()
            .await
            .download_failures
            .insert(name.to_string(), times);
    }

    /// 💥 The next `times` uploads of `name` fail.
    pub async fn fail_uploads(&self, name: &str, times: u32) {
        self.state
            .lock()
            .await
            .upload_failures
            .insert(name.to_string(), times);
    }

    /// 💥 Every listing fails with `reason` until further notice.
    pub async fn fail_listing(&self, reason: &str) {
        self.state.lock().await.list_failure = Some(reason.to_string());
    }

    /// 💥 `connect` returns this error instead of succeeding.
    pub async fn fail_connect(&self, error: MigrationError) {
        self.state.lock().await.connect_failure = Some(error);
    }

    /// 📜 Names of everything currently stored, in insertion order.
    pub async fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .photos
            .iter()
            .map(|(photo, _)| photo.name.clone())
            .collect()
    }

    /// 📦 The stored bytes for `name`, if any.
    pub async fn content_of(&self, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .photos
            .iter()
            .find(|(photo, _)| photo.name == name)
            .map(|(_, bytes)| bytes.clone())
    }

    pub async fn download_calls(&self, name: &str) -> u32 {
        self.state.lock().await.download_calls.get(name).copied().unwrap_or(0)
    }

    pub async fn upload_calls(&self, name: &str) -> u32 {
        self.state.lock().await.upload_calls.get(name).copied().unwrap_or(0)
    }

    pub async fn list_calls(&self) -> u32 {
        self.state.lock().await.list_calls
    }

    fn not_connected(&self) -> MigrationError {
        MigrationError::NotConnected {
            backend: self.label.clone(),
        }
    }
}

// -- 🎭 burns one scripted failure, if any are left. true = "fail this call".
fn take_scripted_failure(failures: &mut HashMap<String, u32>, name: &str) -> bool {
    match failures.get_mut(name) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl PhotoBackend for InMemoryBackend {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        let mut state = self.state.lock().await;
        if let Some(error) = state.connect_failure.clone() {
            return Err(error);
        }
        state.connected = true;
        Ok(())
    }

    async fn list_photos(&self, cancel: &CancellationToken) -> Result<Vec<Photo>, MigrationError> {
        self.limiter.acquire(1, cancel).await?;
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(self.not_connected());
        }
        state.list_calls += 1;
        if let Some(reason) = &state.list_failure {
            return Err(MigrationError::List {
                backend: self.label.clone(),
                reason: reason.clone(),
            });
        }
        Ok(state.photos.iter().map(|(photo, _)| photo.clone()).collect())
    }

    async fn download_photo(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MigrationError> {
        self.limiter.acquire(1, cancel).await?;
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(self.not_connected());
        }
        *state.download_calls.entry(photo.name.clone()).or_default() += 1;

        if take_scripted_failure(&mut state.download_failures, &photo.name) {
            trace!(photo = %photo.name, "🎭 scripted download failure");
            return Err(MigrationError::Download {
                backend: self.label.clone(),
                name: photo.name.clone(),
                reason: "scripted download failure".to_string(),
            });
        }

        state
            .photos
            .iter()
            .find(|(stored, _)| stored.name == photo.name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| MigrationError::NotFound {
                backend: self.label.clone(),
                name: photo.name.clone(),
            })
    }

    async fn upload_photo(
        &self,
        photo: &Photo,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        self.limiter.acquire(1, cancel).await?;
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(self.not_connected());
        }
        *state.upload_calls.entry(photo.name.clone()).or_default() += 1;

        if take_scripted_failure(&mut state.upload_failures, &photo.name) {
            trace!(photo = %photo.name, "🎭 scripted upload failure");
            return Err(MigrationError::Upload {
                backend: self.label.clone(),
                name: photo.name.clone(),
                reason: "scripted upload failure".to_string(),
            });
        }

        let mut the_stored = photo.clone();
        the_stored.size = Some(data.len() as u64);
        match state.photos.iter_mut().find(|(stored, _)| stored.name == photo.name) {
            Some(slot) => *slot = (the_stored, data.to_vec()),
            None => state.photos.push((the_stored, data.to_vec())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_nothing_works_before_connect() {
        let the_backend = InMemoryBackend::with_photos([("a.jpg", b"a".to_vec())]);
        let cancel = CancellationToken::new();

        assert!(matches!(
            the_backend.list_photos(&cancel).await,
            Err(MigrationError::NotConnected { .. })
        ));
        assert!(matches!(
            the_backend.download_photo(&Photo::named("a.jpg"), &cancel).await,
            Err(MigrationError::NotConnected { .. })
        ));
        assert!(matches!(
            the_backend.upload_photo(&Photo::named("b.jpg"), b"b", &cancel).await,
            Err(MigrationError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_listing_twice_gives_the_same_answer() {
        let mut the_backend =
            InMemoryBackend::with_photos([("a.jpg", b"a".to_vec()), ("b.jpg", b"bb".to_vec())]);
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");

        let the_first = the_backend.list_photos(&cancel).await.expect("first listing");
        let the_second = the_backend.list_photos(&cancel).await.expect("second listing");
        assert_eq!(the_first, the_second);
        assert_eq!(the_first[1].size, Some(2));
        assert_eq!(the_backend.list_calls().await, 2);
    }

    #[tokio::test]
    async fn the_one_where_scripted_failures_run_out_eventually() {
        let mut the_backend = InMemoryBackend::with_photos([("a.jpg", b"abc".to_vec())]);
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");
        the_backend.fail_downloads("a.jpg", 2).await;
        let the_photo = Photo::named("a.jpg");

        for _ in 0..2 {
            assert!(matches!(
                the_backend.download_photo(&the_photo, &cancel).await,
                Err(MigrationError::Download { .. })
            ));
        }
        let the_bytes = the_backend
            .download_photo(&the_photo, &cancel)
            .await
            .expect("third time's the charm");
        assert_eq!(the_bytes, b"abc");
        assert_eq!(the_backend.download_calls("a.jpg").await, 3);
    }

    #[tokio::test]
    async fn the_one_where_missing_photos_are_not_found_and_uploads_overwrite() {
        let mut the_backend = InMemoryBackend::new();
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");

        assert!(matches!(
            the_backend.download_photo(&Photo::named("ghost.jpg"), &cancel).await,
            Err(MigrationError::NotFound { .. })
        ));

        let the_photo = Photo::named("cat.png");
        the_backend.upload_photo(&the_photo, b"v1", &cancel).await.expect("upload v1");
        the_backend.upload_photo(&the_photo, b"v2", &cancel).await.expect("upload v2");
        assert_eq!(the_backend.names().await, vec!["cat.png".to_string()]);
        assert_eq!(the_backend.content_of("cat.png").await, Some(b"v2".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_three_rapid_downloads_feel_the_bucket() {
        let mut the_backend = InMemoryBackend::with_photos([("a.jpg", b"a".to_vec())])
            .with_rate_limit(&RateLimitConfig {
                requests_per_second: 1.0,
                burst: 1,
            })
            .expect("valid limiter");
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");
        let the_photo = Photo::named("a.jpg");

        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            the_backend
                .download_photo(&the_photo, &cancel)
                .await
                .expect("download once the bucket allows");
        }

        let the_wait = started.elapsed();
        assert!(the_wait >= std::time::Duration::from_secs(2), "waited only {the_wait:?}");
        assert_eq!(the_backend.download_calls("a.jpg").await, 3);
    }

    #[tokio::test]
    async fn the_one_where_config_seeds_become_photos() {
        let the_config = InMemoryConfig {
            label: None,
            photos: vec![SeedPhoto {
                name: "seed.jpg".into(),
                content: "sprout".into(),
            }],
            rate_limit: RateLimitConfig::default(),
        };
        let the_backend = InMemoryBackend::from_config(&the_config).expect("builds");
        assert_eq!(the_backend.label(), "in-memory");
        assert_eq!(the_backend.content_of("seed.jpg").await, Some(b"sprout".to_vec()));
    }
}
