// ai
//! 📦 Common data structures — the building blocks of pmv
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. SOMEONE'S CAMERA ROLL — 2:14 AM
//!
//! Eleven thousand photos of brunch. Four hundred of a cat named Biscuit.
//! One blurry shot of what may or may not be the Northern Lights.
//! They live in a bucket. They want to live in a Drive. Nobody asked them.
//!
//! ✅ And then — a `Photo` arrives. Quietly. It knows its name. It might know
//! its id. It has opinions about its MIME type that nobody is obligated to share.
//! It is immutable, because once `list_photos` hands it over, the orchestrator
//! only ever borrows it. Like a library book. A library book of Biscuit.
//!
//! 🦆

use std::collections::BTreeMap;
use std::path::Path;

use time::OffsetDateTime;

/// 📸 A `Photo` — one remote object plus whatever the backend knew about it at list time.
///
/// 🧠 Knowledge graph:
/// - `name` is the migration key: retries, logs, and the failure list all speak in names.
/// - `id` is provider-assigned. Drive fills it. S3 mirrors the key. Empty is legal.
/// - `path` is the backend's own address for the object, when it has one.
/// - `mime_type`, `size`, `created_at` are descriptive, never authoritative.
/// - `metadata` is passed through untouched. The orchestrator does not read it. Ever.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Photo {
    pub id: String,
    pub name: String,
    pub path: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub created_at: Option<OffsetDateTime>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Photo {
    /// 🚀 A photo that only knows its name. Id and path mirror it, MIME is guessed.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            path: Some(name.clone()),
            mime_type: mime_type_for(&name).map(str::to_string),
            name,
            ..Self::default()
        }
    }

    /// 🗝️ Where this photo lives from a key/value store's point of view.
    /// Path wins, then id, then name. Somebody has to be the address.
    pub fn storage_key(&self) -> &str {
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ if !self.id.is_empty() => &self.id,
            _ => &self.name,
        }
    }

    /// 🎨 The MIME type, or `application/octet-stream` when nobody knows.
    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .or_else(|| mime_type_for(&self.name))
            .unwrap_or("application/octet-stream")
    }
}

/// 🔮 Guess a MIME type from a file extension.
///
/// Covers the formats cameras and phones actually produce. Anything else gets `None`,
/// and callers fall back to octet-stream like adults.
pub fn mime_type_for(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let the_guess = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "dng" => "image/x-adobe-dng",
        _ => return None,
    };
    Some(the_guess)
}
