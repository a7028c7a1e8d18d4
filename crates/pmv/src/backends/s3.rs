// ai
//! 🪣🚀🌐 S3 Backend — the cloud bucket on either end of the pipe.
//!
//! INT. AWS CONSOLE — NIGHT. A lone bucket in us-east-1, full of vacation photos
//! someone uploaded in 2016 and never looked at again. Tonight they're moving.
//!
//! 🧠 Knowledge graph:
//! - `S3Config`: bucket, region, static credentials, optional endpoint (MinIO & friends),
//!   optional key prefix, rate limit. Co-located, like every other backend config.
//! - `connect`: credentials must be in the config (no ambient env/IMDS guessing), then a
//!   `HeadBucket` proves the bucket is there and we're allowed in.
//! - `list_photos`: `ListObjectsV2` with continuation tokens, one limiter token per page.
//!   Photo name = key minus the configured prefix; `path` keeps the full key.
//! - `download_photo`: `GetObject` on `photo.storage_key()`. `NoSuchKey` → `NotFound`.
//! - `upload_photo`: `PutObject` at `prefix + photo.name`, content type from the photo.
//!
//! 🦆 The duck has no clearance for AWS. It watches from the edge of the VPC.

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backends::{PhotoBackend, RateLimitConfig, or_cancelled};
use crate::common::{Photo, mime_type_for};
use crate::errors::MigrationError;
use crate::rate_limiter::RateLimiter;

/// 🔧 Configuration for one S3 bucket, source or destination.
///
/// `bucket` is required. `region` defaults to "us-east-1" because that's where data
/// goes to retire. Credentials are optional at parse time and required at connect time,
/// so a config can be validated without secrets in it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct S3Config {
    /// 🪣 The bucket name — where the photos live, sleep, and wait for us
    pub bucket: String,
    /// 🌎 AWS region
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// 🔌 Custom endpoint for S3-compatible stores. Turns on path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 📁 Only list keys under this prefix; uploads land under it too.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

/// 🪣 An S3 bucket that speaks `PhotoBackend`.
#[derive(Debug)]
pub struct S3Backend {
    config: S3Config,
    limiter: Arc<RateLimiter>,
    // -- 🔌 None until connect() succeeds. The SDK client is a cheap Arc inside, clone freely.
    client: Option<aws_sdk_s3::Client>,
}

impl S3Backend {
    pub fn new(config: S3Config) -> Result<Self> {
        let limiter = config.rate_limit.build_limiter()?;
        Ok(Self {
            config,
            limiter: Arc::new(limiter),
            client: None,
        })
    }

    fn client(&self) -> Result<&aws_sdk_s3::Client, MigrationError> {
        self.client.as_ref().ok_or_else(|| MigrationError::NotConnected {
            backend: self.label(),
        })
    }

    fn prefix(&self) -> &str {
        self.config.prefix.as_deref().unwrap_or("")
    }

    fn key_for_upload(&self, photo: &Photo) -> String {
        join_key(self.prefix(), &photo.name)
    }
}

// -- 📁 "albums", "/albums/" → "albums/". ListObjectsV2 matches raw string prefixes, so the
// -- trailing slash is what keeps "albums-old/x.jpg" out of an "albums" listing.
fn listing_prefix(prefix: &str) -> Option<String> {
    let the_folder = prefix.trim_matches('/');
    (!the_folder.is_empty()).then(|| format!("{the_folder}/"))
}

// -- 🔗 "albums" + "cat.jpg" → "albums/cat.jpg", without doubling or inventing slashes.
fn join_key(prefix: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    match listing_prefix(prefix) {
        Some(folder) => format!("{folder}{name}"),
        None => name.to_string(),
    }
}

// -- 🧹 the inverse of join_key for listing. None for keys outside the folder and for
// -- "folder" placeholder objects, neither of which is a photo.
fn name_for_key(prefix: &str, key: &str) -> Option<String> {
    let name = match listing_prefix(prefix) {
        Some(folder) => key.strip_prefix(folder.as_str())?,
        None => key,
    };
    (!name.is_empty() && !name.ends_with('/')).then(|| name.to_string())
}

fn http_status<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

#[async_trait]
impl PhotoBackend for S3Backend {
    fn label(&self) -> String {
        match self.config.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                format!("s3://{}/{}", self.config.bucket, prefix.trim_matches('/'))
            }
            _ => format!("s3://{}", self.config.bucket),
        }
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), MigrationError> {
        let (Some(access_key_id), Some(secret_access_key)) = (
            self.config.access_key_id.as_deref().filter(|s| !s.is_empty()),
            self.config.secret_access_key.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err(MigrationError::Authentication {
                backend: self.label(),
                reason: "access_key_id and secret_access_key must both be configured".to_string(),
            });
        };

        let the_credentials =
            Credentials::new(access_key_id, secret_access_key, None, None, "pmv-config");
        let the_aws_config = or_cancelled(
            cancel,
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(self.config.region.clone()))
                .credentials_provider(the_credentials)
                .load(),
        )
        .await?;

        let mut the_builder = aws_sdk_s3::config::Builder::from(&the_aws_config);
        if let Some(endpoint) = self.config.endpoint_url.as_deref() {
            the_builder = the_builder.endpoint_url(endpoint).force_path_style(true);
        }
        let the_client = aws_sdk_s3::Client::from_conf(the_builder.build());

        // 📏 HeadBucket — fail loud here at startup, not silent in the hot path.
        let the_head_bucket = or_cancelled(
            cancel,
            the_client.head_bucket().bucket(&self.config.bucket).send(),
        )
        .await?;
        if let Err(err) = the_head_bucket {
            let reason = DisplayErrorContext(&err).to_string();
            return Err(match http_status(&err) {
                Some(401) | Some(403) => MigrationError::Authentication {
                    backend: self.label(),
                    reason,
                },
                _ => MigrationError::Connection {
                    backend: self.label(),
                    reason,
                },
            });
        }

        debug!(backend = %self.label(), region = %self.config.region, "🪣 connected to bucket");
        self.client = Some(the_client);
        Ok(())
    }

    async fn list_photos(&self, cancel: &CancellationToken) -> Result<Vec<Photo>, MigrationError> {
        let the_client = self.client()?;
        let the_prefix = listing_prefix(self.prefix());
        let mut the_photos = Vec::new();
        let mut the_token: Option<String> = None;
        let mut the_pages = 0usize;

        loop {
            self.limiter.acquire(1, cancel).await?;
            let the_page = or_cancelled(
                cancel,
                the_client
                    .list_objects_v2()
                    .bucket(&self.config.bucket)
                    .set_prefix(the_prefix.clone())
                    .set_continuation_token(the_token.clone())
                    .send(),
            )
            .await?
            .map_err(|err| MigrationError::List {
                backend: self.label(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;
            the_pages += 1;

            for object in the_page.contents() {
                let Some(key) = object.key() else { continue };
                let Some(name) = name_for_key(self.prefix(), key) else {
                    trace!(key, "🪣 not a photo under our prefix, skipping");
                    continue;
                };
                the_photos.push(Photo {
                    id: key.to_string(),
                    path: Some(key.to_string()),
                    mime_type: mime_type_for(&name).map(str::to_string),
                    size: object.size().and_then(|s| u64::try_from(s).ok()),
                    created_at: object
                        .last_modified()
                        .and_then(|t| OffsetDateTime::from_unix_timestamp(t.secs()).ok()),
                    name,
                    ..Photo::default()
                });
            }

            match the_page.next_continuation_token() {
                Some(next) if the_page.is_truncated().unwrap_or(false) => {
                    the_token = Some(next.to_string());
                }
                _ => break,
            }
        }

        trace!(pages = the_pages, count = the_photos.len(), "🪣 listed bucket");
        Ok(the_photos)
    }

    async fn download_photo(
        &self,
        photo: &Photo,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MigrationError> {
        let the_client = self.client()?;
        let the_key = photo.storage_key();
        self.limiter.acquire(1, cancel).await?;

        let the_response = or_cancelled(
            cancel,
            the_client
                .get_object()
                .bucket(&self.config.bucket)
                .key(the_key)
                .send(),
        )
        .await?;
        let the_object = match the_response {
            Ok(object) => object,
            Err(err) => {
                let is_missing = err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                    || http_status(&err) == Some(404);
                return Err(if is_missing {
                    MigrationError::NotFound {
                        backend: self.label(),
                        name: photo.name.clone(),
                    }
                } else {
                    MigrationError::Download {
                        backend: self.label(),
                        name: photo.name.clone(),
                        reason: DisplayErrorContext(&err).to_string(),
                    }
                });
            }
        };

        let the_bytes = or_cancelled(cancel, the_object.body.collect())
            .await?
            .map_err(|err| MigrationError::Download {
                backend: self.label(),
                name: photo.name.clone(),
                reason: format!("body stream broke mid-download: {err}"),
            })?;
        Ok(the_bytes.into_bytes().to_vec())
    }

    async fn upload_photo(
        &self,
        photo: &Photo,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        let the_client = self.client()?;
        let the_key = self.key_for_upload(photo);
        self.limiter.acquire(1, cancel).await?;

        or_cancelled(
            cancel,
            the_client
                .put_object()
                .bucket(&self.config.bucket)
                .key(&the_key)
                .content_type(photo.content_type())
                .body(ByteStream::from(data.to_vec()))
                .send(),
        )
        .await?
        .map_err(|err| MigrationError::Upload {
            backend: self.label(),
            name: photo.name.clone(),
            reason: DisplayErrorContext(&err).to_string(),
        })?;

        trace!(key = %the_key, bytes = data.len(), "🪣 object written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, path_regex, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUCKET_PATH: &str = r"^/vacation-2016/?$";

    fn the_config() -> S3Config {
        serde_json::from_str(r#"{ "bucket": "vacation-2016" }"#).expect("minimal s3 config")
    }

    #[test]
    fn the_one_where_the_region_defaults_to_where_data_retires() {
        let the_config = the_config();
        assert_eq!(the_config.region, "us-east-1");
        assert_eq!(the_config.access_key_id, None);
        assert_eq!(the_config.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn the_one_where_prefixes_join_and_unjoin_cleanly() {
        assert_eq!(join_key("", "cat.jpg"), "cat.jpg");
        assert_eq!(join_key("albums/", "/cat.jpg"), "albums/cat.jpg");
        assert_eq!(join_key("/albums", "2024/cat.jpg"), "albums/2024/cat.jpg");
        assert_eq!(listing_prefix("albums").as_deref(), Some("albums/"));
        assert_eq!(listing_prefix("/"), None);
        assert_eq!(name_for_key("albums", "albums/2024/cat.jpg").as_deref(), Some("2024/cat.jpg"));
        assert_eq!(name_for_key("", "cat.jpg").as_deref(), Some("cat.jpg"));
        assert_eq!(name_for_key("albums", "albums/"), None);
        assert_eq!(name_for_key("", "albums/"), None);
    }

    #[test]
    fn the_one_where_a_lookalike_folder_is_not_our_folder() {
        // -- "albums-old" shares a string prefix with "albums" but is a different folder
        assert_eq!(name_for_key("albums", "albums-old/x.jpg"), None);
        assert_eq!(name_for_key("albums/", "albumsx.jpg"), None);
    }

    #[test]
    fn the_one_where_the_label_shows_bucket_and_prefix() {
        let mut the_config = the_config();
        assert_eq!(S3Backend::new(the_config.clone()).expect("backend").label(), "s3://vacation-2016");
        the_config.prefix = Some("/albums/".into());
        assert_eq!(S3Backend::new(the_config).expect("backend").label(), "s3://vacation-2016/albums");
    }

    #[tokio::test]
    async fn the_one_where_missing_credentials_are_an_authentication_problem() {
        let mut the_backend = S3Backend::new(the_config()).expect("backend");
        let cancel = CancellationToken::new();

        assert!(matches!(
            the_backend.connect(&cancel).await,
            Err(MigrationError::Authentication { .. })
        ));
        assert!(matches!(
            the_backend.list_photos(&cancel).await,
            Err(MigrationError::NotConnected { .. })
        ));
        assert!(matches!(
            the_backend.download_photo(&Photo::named("a.jpg"), &cancel).await,
            Err(MigrationError::NotConnected { .. })
        ));
    }

    async fn connected_to(server: &MockServer, prefix: Option<&str>) -> S3Backend {
        Mock::given(method("HEAD"))
            .and(path_regex(BUCKET_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        let mut the_config = the_config();
        the_config.access_key_id = Some("AKIDEXAMPLE".into());
        the_config.secret_access_key = Some("not-so-secret".into());
        the_config.endpoint_url = Some(server.uri());
        the_config.prefix = prefix.map(str::to_string);
        let mut the_backend = S3Backend::new(the_config).expect("backend");
        the_backend
            .connect(&CancellationToken::new())
            .await
            .expect("connect against the mock bucket");
        the_backend
    }

    fn list_page(keys: &[(&str, u64)], next_token: Option<&str>) -> ResponseTemplate {
        let the_contents: String = keys
            .iter()
            .map(|(key, size)| {
                format!(
                    "<Contents><Key>{key}</Key><LastModified>2024-05-01T12:00:00.000Z</LastModified>\
                     <ETag>&quot;abc&quot;</ETag><Size>{size}</Size><StorageClass>STANDARD</StorageClass></Contents>"
                )
            })
            .collect();
        let the_tail = match next_token {
            Some(token) => format!(
                "<IsTruncated>true</IsTruncated><NextContinuationToken>{token}</NextContinuationToken>"
            ),
            None => "<IsTruncated>false</IsTruncated>".to_string(),
        };
        let the_body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>vacation-2016</Name><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys>{the_tail}{the_contents}</ListBucketResult>"#,
            keys.len()
        );
        ResponseTemplate::new(200)
            .insert_header("content-type", "application/xml")
            .set_body_string(the_body)
    }

    fn s3_error(status: u16, code: &str) -> ResponseTemplate {
        ResponseTemplate::new(status)
            .insert_header("content-type", "application/xml")
            .set_body_string(format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>{code}</Code><Message>{code}</Message><RequestId>req-1</RequestId></Error>"#
            ))
    }

    #[tokio::test]
    async fn the_one_where_listing_follows_continuation_tokens_inside_the_folder() {
        let the_server = MockServer::start().await;
        let the_backend = connected_to(&the_server, Some("albums")).await;

        Mock::given(method("GET"))
            .and(path_regex(BUCKET_PATH))
            .and(query_param("list-type", "2"))
            .and(query_param("prefix", "albums/"))
            .and(query_param_is_missing("continuation-token"))
            .respond_with(list_page(&[("albums/", 0), ("albums/cat.jpg", 3)], Some("page-2")))
            .expect(1)
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(BUCKET_PATH))
            .and(query_param("prefix", "albums/"))
            .and(query_param("continuation-token", "page-2"))
            .respond_with(list_page(&[("albums/2024/dog.png", 5)], None))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_photos = the_backend
            .list_photos(&CancellationToken::new())
            .await
            .expect("listing");

        let the_names: Vec<&str> = the_photos.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(the_names, vec!["cat.jpg", "2024/dog.png"]);
        assert_eq!(the_photos[0].id, "albums/cat.jpg");
        assert_eq!(the_photos[0].storage_key(), "albums/cat.jpg");
        assert_eq!(the_photos[0].size, Some(3));
        assert!(the_photos[0].created_at.is_some());
        assert_eq!(the_photos[1].mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn the_one_where_one_bad_page_sinks_the_whole_listing() {
        let the_server = MockServer::start().await;
        let the_backend = connected_to(&the_server, None).await;

        Mock::given(method("GET"))
            .and(path_regex(BUCKET_PATH))
            .and(query_param_is_missing("continuation-token"))
            .respond_with(list_page(&[("cat.jpg", 3)], Some("page-2")))
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(BUCKET_PATH))
            .and(query_param("continuation-token", "page-2"))
            .respond_with(s3_error(403, "AccessDenied"))
            .mount(&the_server)
            .await;

        assert!(matches!(
            the_backend.list_photos(&CancellationToken::new()).await,
            Err(MigrationError::List { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_downloads_find_the_key_and_ghosts_are_not_found() {
        let the_server = MockServer::start().await;
        let the_backend = connected_to(&the_server, Some("albums")).await;

        Mock::given(method("GET"))
            .and(path("/vacation-2016/albums/cat.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"meow".to_vec()))
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacation-2016/albums/ghost.jpg"))
            .respond_with(s3_error(404, "NoSuchKey"))
            .mount(&the_server)
            .await;

        let cancel = CancellationToken::new();
        let mut the_cat = Photo::named("cat.jpg");
        the_cat.path = Some("albums/cat.jpg".into());
        let the_bytes = the_backend
            .download_photo(&the_cat, &cancel)
            .await
            .expect("download");
        assert_eq!(the_bytes, b"meow");

        let mut the_ghost = Photo::named("ghost.jpg");
        the_ghost.path = Some("albums/ghost.jpg".into());
        assert!(matches!(
            the_backend.download_photo(&the_ghost, &cancel).await,
            Err(MigrationError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_uploads_land_under_the_prefix_with_a_content_type() {
        let the_server = MockServer::start().await;
        let the_backend = connected_to(&the_server, Some("albums/")).await;

        Mock::given(method("PUT"))
            .and(path("/vacation-2016/albums/2024/dog.png"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&the_server)
            .await;

        the_backend
            .upload_photo(&Photo::named("2024/dog.png"), b"woof", &CancellationToken::new())
            .await
            .expect("upload");

        let the_requests = the_server.received_requests().await.expect("recording on");
        let the_put = the_requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .expect("a PUT went out");
        assert!(the_put.body.windows(4).any(|w| w == b"woof"));
    }
}
