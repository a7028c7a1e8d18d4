// ai
//! 📡 Google Drive Backend — photos by way of a REST API and an OAuth token.
//!
//! 🎬 COLD OPEN — INT. SOMEONE'S DRIVE — 11 YEARS OF "IMG_0001 (3).jpg"
//!
//! Nobody organizes their Drive. Nobody. The photos sit in the root, next to a
//! spreadsheet called "budget FINAL final v2". This backend finds every file whose
//! mimeType starts with `image/` and carries it out, one rate-limited request at a time.
//!
//! 🧠 Knowledge graph:
//! - `GoogleDriveConfig`: token file path, optional client id/secret (needed only to
//!   refresh), base URLs (overridable so tests can point at a mock server), optional
//!   parent folder, rate limit.
//! - Token file: `{"access_token", "refresh_token"?, "token_type"?, "expiry"?}`. If the
//!   token is expired or empty and we can refresh it, we do, once, at connect.
//! - `connect`: `GET /drive/v3/about?fields=user` as a handshake. 401/403 → Authentication.
//! - `list_photos`: `GET /drive/v3/files`, `pageToken` chained until it stops showing up.
//!   Drive reports `size` as a string, because of course it does.
//! - `download_photo`: `GET /drive/v3/files/{id}?alt=media`. 404 → NotFound.
//! - `upload_photo`: `POST /upload/drive/v3/files?uploadType=multipart` with a
//!   hand-built `multipart/related` body (metadata part + media part).
//!
//! 🦆 The duck asked for Drive access. The duck was asked to re-authenticate. The duck gave up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backends::{PhotoBackend, RateLimitConfig, or_cancelled};
use crate::common::Photo;
use crate::errors::MigrationError;
use crate::rate_limiter::RateLimiter;

const LIST_QUERY: &str = "mimeType contains 'image/'";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,createdTime)";
const PAGE_SIZE: &str = "1000";
const MULTIPART_BOUNDARY: &str = "pmv-photo-boundary-7f3a9c";
// -- ⏳ refresh a little before the wall clock says so; clocks drift, tokens don't wait
const EXPIRY_SLACK: time::Duration = time::Duration::seconds(60);

/// 🔧 Google Drive connection knobs.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GoogleDriveConfig {
    /// 🔒 Path to the OAuth token JSON.
    pub token_path: PathBuf,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// 📁 Listing is scoped to this folder and uploads land in it. None = whole Drive.
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// -- 🔒 what the token file holds. Extra fields (scope, etc.) are ignored.
#[derive(Debug, Deserialize)]
struct StoredToken {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
}

/// 📡 A Google Drive account, spoken to over plain HTTPS.
pub struct GoogleDriveBackend {
    config: GoogleDriveConfig,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    // -- 🔒 bearer token, Some once connect() has proven it works
    access_token: Option<String>,
}

// 🐛 Manual Debug so the bearer token never lands in a log line.
impl std::fmt::Debug for GoogleDriveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveBackend")
            .field("config", &self.config)
            .field("connected", &self.access_token.is_some())
            .finish()
    }
}

impl GoogleDriveBackend {
    /// 🚀 Builds the HTTP client (10s connect, 60s total; photos can be hefty). No network yet.
    pub fn new(config: GoogleDriveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a cursed TLS setup.")?;
        let limiter = config.rate_limit.build_limiter()?;
        Ok(Self {
            config,
            client,
            limiter: Arc::new(limiter),
            access_token: None,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    fn token(&self) -> Result<&str, MigrationError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| MigrationError::NotConnected {
                backend: self.label(),
            })
    }

    fn auth_error(&self, reason: impl Into<String>) -> MigrationError {
        MigrationError::Authentication {
            backend: self.label(),
            reason: reason.into(),
        }
    }

    async fn read_token_file(&self) -> Result<StoredToken, MigrationError> {
        let the_raw = tokio::fs::read_to_string(&self.config.token_path)
            .await
            .map_err(|e| {
                self.auth_error(format!(
                    "could not read token file {}: {e}",
                    self.config.token_path.display()
                ))
            })?;
        serde_json::from_str(&the_raw).map_err(|e| {
            self.auth_error(format!(
                "token file {} is not valid token JSON: {e}",
                self.config.token_path.display()
            ))
        })
    }

    fn needs_refresh(token: &StoredToken) -> bool {
        if token.access_token.is_empty() {
            return true;
        }
        token
            .expiry
            .as_deref()
            .and_then(|e| OffsetDateTime::parse(e, &Rfc3339).ok())
            .is_some_and(|expiry| expiry - EXPIRY_SLACK <= OffsetDateTime::now_utc())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, MigrationError> {
        let (Some(client_id), Some(client_secret)) =
            (self.config.client_id.as_deref(), self.config.client_secret.as_deref())
        else {
            return Err(self.auth_error(
                "token needs a refresh but client_id/client_secret are not configured",
            ));
        };

        let the_response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| MigrationError::Connection {
                backend: self.label(),
                reason: format!("token endpoint unreachable: {e}"),
            })?;

        let status = the_response.status();
        if !status.is_success() {
            let body = the_response.text().await.unwrap_or_default();
            return Err(self.auth_error(format!("token refresh rejected ({status}): {body}")));
        }
        let the_refreshed: RefreshResponse = the_response
            .json()
            .await
            .map_err(|e| self.auth_error(format!("token endpoint sent gibberish: {e}")))?;
        info!(backend = %self.label(), "🔒 refreshed the Drive access token");
        Ok(the_refreshed.access_token)
    }

    async fn fetch_page(
        &self,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, MigrationError> {
        let list_error = |reason: String| MigrationError::List {
            backend: self.label(),
            reason,
        };
        let the_query = match self.config.folder_id.as_deref() {
            Some(folder) => format!("{LIST_QUERY} and '{folder}' in parents"),
            None => LIST_QUERY.to_string(),
        };
        let mut the_params = vec![
            ("q", the_query),
            ("fields", LIST_FIELDS.to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
        ];
        if let Some(page_token) = page_token {
            the_params.push(("pageToken", page_token.to_string()));
        }

        let the_response = self
            .client
            .get(self.api_url("/drive/v3/files"))
            .bearer_auth(token)
            .query(&the_params)
            .send()
            .await
            .map_err(|e| list_error(format!("request failed: {e}")))?;
        let status = the_response.status();
        if !status.is_success() {
            let body = the_response.text().await.unwrap_or_default();
            return Err(list_error(format!("Drive said {status}: {body}")));
        }
        the_response
            .json()
            .await
            .map_err(|e| list_error(format!("unparseable file list: {e}")))
    }

    // -- 🕰️ createdTime is decoration; a garbled one costs the timestamp, not the photo
    fn photo_from(file: DriveFile) -> Photo {
        let created_at = file.created_time.as_deref().and_then(|raw| {
            OffsetDateTime::parse(raw, &Rfc3339)
                .inspect_err(|e| {
                    warn!(file = %file.id, raw, error = %e, "⚠️ unparseable createdTime, leaving it blank")
                })
                .ok()
        });
        Photo {
            size: file.size.as_deref().and_then(|s| s.parse().ok()),
            mime_type: file.mime_type,
            created_at,
            id: file.id,
            name: file.name,
            ..Photo::default()
        }
    }

    // -- 📦 multipart/related: JSON metadata part, then the raw bytes. Drive is picky about CRLFs.
    fn multipart_body(&self, photo: &Photo, data: &[u8]) -> Vec<u8> {
        let mut the_metadata = serde_json::json!({
            "name": photo.name,
            "mimeType": photo.content_type(),
        });
        if let Some(folder) = &self.config.folder_id {
            the_metadata["parents"] = serde_json::json!([folder]);
        }

        let mut the_body = Vec::with_capacity(data.len() + 512);
        the_body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{the_metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: {}\r\n\r\n",
                photo.content_type()
            )
            .as_bytes(),
        );
        the_body.extend_from_slice(data);
        the_body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
        the_body
    }
}

#[async_trait]
impl PhotoBackend for GoogleDriveBackend {
    fn label(&self) -> String {
        match self.config.folder_id.as_deref() {
            Some(folder) => format!("google-drive:{folder}"),
            None => "google-drive".to_string(),
        }
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        let the_stored = or_cancelled(cancel, self.read_token_file()).await??;
        if let Some(kind) = the_stored.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(self.auth_error(format!("unsupported token type {kind:?}")));
            }
        }

        let the_token = match (Self::needs_refresh(&the_stored), the_stored.refresh_token.as_deref()) {
            (true, Some(refresh_token)) => or_cancelled(cancel, self.refresh(refresh_token)).await??,
            (true, None) if the_stored.access_token.is_empty() => {
                return Err(self.auth_error("token file has no access_token and no refresh_token"));
            }
            // -- ⏳ expired and no way to refresh: try it anyway, the about ping will tell us
            _ => the_stored.access_token.clone(),
        };

        // -- 📡 "Hello? Is this thing on?" — a developer, gesturing at an OAuth scope
        let the_ping = or_cancelled(
            cancel,
            self.client
                .get(self.api_url("/drive/v3/about"))
                .bearer_auth(&the_token)
                .query(&[("fields", "user")])
                .send(),
        )
        .await?
        .map_err(|e| MigrationError::Connection {
            backend: self.label(),
            reason: format!("Drive API unreachable: {e}"),
        })?;

        let status = the_ping.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(self.auth_error(format!("Drive rejected the token ({status})")));
        }
        if !status.is_success() {
            return Err(MigrationError::Connection {
                backend: self.label(),
                reason: format!("about endpoint answered {status}"),
            });
        }

        debug!(backend = %self.label(), "📡 Drive session established");
        self.access_token = Some(the_token);
        Ok(())
    }

    async fn list_photos(&self, cancel: &CancellationToken) -> Result<Vec<Photo>, MigrationError> {
        let the_token = self.token()?;
        let mut the_photos = Vec::new();
        let mut the_page_token: Option<String> = None;

        loop {
            self.limiter.acquire(1, cancel).await?;
            let the_page =
                or_cancelled(cancel, self.fetch_page(the_token, the_page_token.as_deref())).await??;
            for file in the_page.files {
                the_photos.push(Self::photo_from(file));
            }
            match the_page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => the_page_token = Some(next),
                None => break,
            }
        }

        trace!(count = the_photos.len(), "📡 listed Drive images");
        Ok(the_photos)
    }

    async fn download_photo(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MigrationError> {
        let the_token = self.token()?;
        let not_found = || MigrationError::NotFound {
            backend: self.label(),
            name: photo.name.clone(),
        };
        let download_error = |reason: String| MigrationError::Download {
            backend: self.label(),
            name: photo.name.clone(),
            reason,
        };
        // -- 🆔 Drive addresses files by id only; no id, nothing to fetch
        if photo.id.is_empty() {
            return Err(not_found());
        }

        self.limiter.acquire(1, cancel).await?;
        let the_fetch = async {
            let the_response = self
                .client
                .get(self.api_url(&format!("/drive/v3/files/{}", photo.id)))
                .bearer_auth(the_token)
                .query(&[("alt", "media")])
                .send()
                .await
                .map_err(|e| download_error(format!("request failed: {e}")))?;
            let status = the_response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(not_found());
            }
            if !status.is_success() {
                return Err(download_error(format!("Drive said {status}")));
            }
            the_response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| download_error(format!("body broke mid-download: {e}")))
        };
        or_cancelled(cancel, the_fetch).await?
    }

    async fn upload_photo(
        &self,
        photo: &Photo,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        let the_token = self.token()?;
        let upload_error = |reason: String| MigrationError::Upload {
            backend: self.label(),
            name: photo.name.clone(),
            reason,
        };
        let the_body = self.multipart_body(photo, data);

        self.limiter.acquire(1, cancel).await?;
        let the_response = or_cancelled(
            cancel,
            self.client
                .post(self.api_url("/upload/drive/v3/files"))
                .bearer_auth(the_token)
                .query(&[("uploadType", "multipart")])
                .header(
                    reqwest::header::CONTENT_TYPE,
                    format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
                )
                .body(the_body)
                .send(),
        )
        .await?
        .map_err(|e| upload_error(format!("request failed: {e}")))?;

        let status = the_response.status();
        if !status.is_success() {
            let body = the_response.text().await.unwrap_or_default();
            return Err(upload_error(format!("Drive said {status}: {body}")));
        }
        trace!(photo = %photo.name, bytes = data.len(), "📡 uploaded to Drive");
        Ok(())
    }
}
