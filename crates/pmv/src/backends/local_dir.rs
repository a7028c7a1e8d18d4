// ai
//! 📂 Local directory backend — "It's just a folder", said no sysadmin ever before the disk filled up.
//!
//! 🧠 Knowledge graph:
//! - `LocalDirConfig`: root directory, optional extension filter, `create` flag, rate limit.
//! - Listing walks the tree (iteratively, no recursion-induced stack drama) and sorts by
//!   relative path, so two listings of an unchanged directory are identical.
//! - Photo name = path relative to root, `/`-separated. Same convention as S3 keys, so a
//!   bucket mirrored to disk and back keeps its names.
//! - Upload writes `<target>.pmv-partial` then renames. A failed upload leaves nothing
//!   half-written behind. All-or-nothing, like a good buffet plate.
//! - Names with `..` or absolute components are refused. No escaping the sandbox. 🦆

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::backends::{PhotoBackend, RateLimitConfig, or_cancelled};
use crate::common::{Photo, mime_type_for};
use crate::errors::MigrationError;
use crate::rate_limiter::RateLimiter;

const PARTIAL_SUFFIX: &str = ".pmv-partial";

// -- 📂 co-located config: no scavenger hunts at 2am wondering where this struct lives.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LocalDirConfig {
    /// 📁 Where the photos live (or will live).
    pub root: PathBuf,
    /// 🎯 Only list files with these extensions (case-insensitive). Empty = everything.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// 🏗️ Create `root` on connect if it doesn't exist. Handy for destinations.
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// 📂 A directory on disk pretending to be a photo cloud. It's very convincing.
#[derive(Debug)]
pub struct LocalDirBackend {
    config: LocalDirConfig,
    limiter: Arc<RateLimiter>,
    // -- 🔒 Some(root) once connected. RwLock because connect writes once, everybody else reads.
    connected_root: RwLock<Option<PathBuf>>,
}

impl LocalDirBackend {
    pub fn new(config: LocalDirConfig) -> Result<Self> {
        let limiter = config
            .rate_limit
            .build_limiter()
            .context("💀 The local directory backend got a rate limit it can't work with.")?;
        Ok(Self {
            config,
            limiter: Arc::new(limiter),
            connected_root: RwLock::new(None),
        })
    }

    async fn root(&self) -> Result<PathBuf, MigrationError> {
        self.connected_root
            .read()
            .await
            .clone()
            .ok_or_else(|| MigrationError::NotConnected {
                backend: self.label(),
            })
    }

    fn wants(&self, path: &Path) -> bool {
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
        {
            return false;
        }
        if self.config.extensions.is_empty() {
            return true;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config
            .extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }

    async fn walk(&self, root: &Path) -> std::io::Result<Vec<Photo>> {
        let mut the_photos = Vec::new();
        let mut the_pending = vec![root.to_path_buf()];

        while let Some(dir) = the_pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    the_pending.push(path);
                    continue;
                }
                if !file_type.is_file() || !self.wants(&path) {
                    continue;
                }
                let Some(name) = relative_name(root, &path) else {
                    warn!(path = ?path, "⚠️ skipping a file whose name isn't valid UTF-8");
                    continue;
                };
                let metadata = entry.metadata().await?;
                let created_at = metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .ok()
                    .map(OffsetDateTime::from);
                the_photos.push(Photo {
                    id: name.clone(),
                    path: Some(name.clone()),
                    mime_type: mime_type_for(&name).map(str::to_string),
                    size: Some(metadata.len()),
                    created_at,
                    name,
                    ..Photo::default()
                });
            }
        }

        the_photos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(the_photos)
    }
}

// -- 🧭 `a/b/c.jpg` relative to root, forward slashes regardless of OS.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    Some(parts?.join("/"))
}

// -- 🔒 turn a photo key back into a path under root, refusing anything that climbs out.
fn resolve_under(root: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    if key.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

#[async_trait]
impl PhotoBackend for LocalDirBackend {
    fn label(&self) -> String {
        format!("dir:{}", self.config.root.display())
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        let root = self.config.root.clone();
        if self.config.create {
            fs::create_dir_all(&root)
                .await
                .map_err(|e| MigrationError::Connection {
                    backend: self.label(),
                    reason: format!("could not create root directory: {e}"),
                })?;
        }
        let metadata = fs::metadata(&root)
            .await
            .map_err(|e| MigrationError::Connection {
                backend: self.label(),
                reason: format!("root directory is not reachable: {e}"),
            })?;
        if !metadata.is_dir() {
            return Err(MigrationError::Connection {
                backend: self.label(),
                reason: "root exists but is not a directory".to_string(),
            });
        }
        debug!(backend = %self.label(), "📂 local directory ready");
        *self.connected_root.write().await = Some(root);
        Ok(())
    }

    async fn list_photos(&self, cancel: &CancellationToken) -> Result<Vec<Photo>, MigrationError> {
        let root = self.root().await?;
        self.limiter.acquire(1, cancel).await?;
        let the_photos = or_cancelled(cancel, self.walk(&root))
            .await?
            .map_err(|e| MigrationError::List {
                backend: self.label(),
                reason: e.to_string(),
            })?;
        trace!(count = the_photos.len(), "📂 walked the directory tree");
        Ok(the_photos)
    }

    async fn download_photo(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MigrationError> {
        let root = self.root().await?;
        let not_found = || MigrationError::NotFound {
            backend: self.label(),
            name: photo.name.clone(),
        };
        let path = resolve_under(&root, photo.storage_key()).ok_or_else(not_found)?;

        self.limiter.acquire(1, cancel).await?;
        match or_cancelled(cancel, fs::read(&path)).await? {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(MigrationError::Download {
                backend: self.label(),
                name: photo.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn upload_photo(
        &self,
        photo: &Photo,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        let root = self.root().await?;
        let upload_error = |reason: String| MigrationError::Upload {
            backend: self.label(),
            name: photo.name.clone(),
            reason,
        };
        // -- 🎯 destinations are addressed by name; a source-specific path means nothing here
        let target = resolve_under(&root, &photo.name)
            .ok_or_else(|| upload_error("name does not resolve to a path inside the root".into()))?;

        self.limiter.acquire(1, cancel).await?;
        let partial = target.with_file_name(format!(
            "{}{}",
            target
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("photo"),
            PARTIAL_SUFFIX
        ));

        let the_write = async {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&partial, data).await?;
            fs::rename(&partial, &target).await
        };
        match or_cancelled(cancel, the_write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let _ = fs::remove_file(&partial).await;
                Err(upload_error(e.to_string()))
            }
            Err(cancelled) => {
                let _ = fs::remove_file(&partial).await;
                Err(cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(root: &Path) -> LocalDirConfig {
        LocalDirConfig {
            root: root.to_path_buf(),
            extensions: Vec::new(),
            create: false,
            rate_limit: RateLimitConfig::default(),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_tree_is_walked_and_sorted() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(the_dir.path().join("2024/summer")).expect("mkdir");
        std::fs::write(the_dir.path().join("b.jpg"), b"bb").expect("write");
        std::fs::write(the_dir.path().join("a.png"), b"a").expect("write");
        std::fs::write(the_dir.path().join("2024/summer/beach.jpg"), b"sand").expect("write");
        std::fs::write(the_dir.path().join("notes.txt"), b"not a photo").expect("write");

        let mut the_config = config_for(the_dir.path());
        the_config.extensions = vec!["jpg".into(), ".PNG".into()];
        let mut the_backend = LocalDirBackend::new(the_config).expect("backend");
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");

        let the_photos = the_backend.list_photos(&cancel).await.expect("list");
        let the_names: Vec<&str> = the_photos.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(the_names, vec!["2024/summer/beach.jpg", "a.png", "b.jpg"]);
        assert_eq!(the_photos[0].size, Some(4));
        assert_eq!(the_photos[0].mime_type.as_deref(), Some("image/jpeg"));

        let the_again = the_backend.list_photos(&cancel).await.expect("list again");
        assert_eq!(the_photos, the_again);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn the_one_where_a_mangled_file_name_is_skipped_not_fatal() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let the_dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(the_dir.path().join("good.jpg"), b"ok").expect("write");
        std::fs::write(the_dir.path().join(OsStr::from_bytes(b"\xffbad.jpg")), b"??").expect("write");

        let mut the_backend = LocalDirBackend::new(config_for(the_dir.path())).expect("backend");
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");

        let the_photos = the_backend.list_photos(&cancel).await.expect("list");
        let the_names: Vec<&str> = the_photos.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(the_names, vec!["good.jpg"]);
    }

    #[tokio::test]
    async fn the_one_where_uploads_land_atomically_and_downloads_find_them() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        let the_root = the_dir.path().join("dest");
        let mut the_config = config_for(&the_root);
        the_config.create = true;
        let mut the_backend = LocalDirBackend::new(the_config).expect("backend");
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect creates the root");

        let the_photo = Photo::named("albums/cat.png");
        the_backend
            .upload_photo(&the_photo, b"meow", &cancel)
            .await
            .expect("upload");

        assert_eq!(
            std::fs::read(the_root.join("albums/cat.png")).expect("file landed"),
            b"meow"
        );
        assert!(!the_root.join("albums/cat.png.pmv-partial").exists());
        let the_bytes = the_backend
            .download_photo(&the_photo, &cancel)
            .await
            .expect("download");
        assert_eq!(the_bytes, b"meow");
    }

    #[tokio::test]
    async fn the_one_where_escape_artists_and_ghosts_are_turned_away() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        let mut the_backend = LocalDirBackend::new(config_for(the_dir.path())).expect("backend");
        let cancel = CancellationToken::new();
        the_backend.connect(&cancel).await.expect("connect");

        let the_escapee = Photo::named("../outside.jpg");
        assert!(matches!(
            the_backend.upload_photo(&the_escapee, b"x", &cancel).await,
            Err(MigrationError::Upload { .. })
        ));
        assert!(matches!(
            the_backend.download_photo(&Photo::named("ghost.jpg"), &cancel).await,
            Err(MigrationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_missing_root_is_a_connection_problem() {
        let the_dir = tempfile::tempdir().expect("temp dir");
        let mut the_backend =
            LocalDirBackend::new(config_for(&the_dir.path().join("nope"))).expect("backend");
        let cancel = CancellationToken::new();

        assert!(matches!(
            the_backend.list_photos(&cancel).await,
            Err(MigrationError::NotConnected { .. })
        ));
        assert!(matches!(
            the_backend.connect(&cancel).await,
            Err(MigrationError::Connection { .. })
        ));
    }
}
