//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Shape of a config file:
//! ```toml
//! [source.GoogleDrive]
//! token_path = "token.json"
//!
//! [destination.S3]
//! bucket = "photos-archive"
//! access_key_id = "..."
//! secret_access_key = "..."
//! rate_limit = { requests_per_second = 5.0, burst = 5 }
//!
//! [runtime.retry]
//! max_attempts = 3
//! ```

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::backends::{
    GoogleDriveConfig, InMemoryConfig, LocalDirConfig, RateLimitConfig, S3Config,
};

/// 📦 The AppConfig: where the photos come from, where they go, and how hard we try.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: BackendConfig,
    pub destination: BackendConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🎭 One photo home, externally tagged: `[source.S3]`, `[destination.LocalDir]`, ...
///
/// Env vars arrive lowercased (`PMV_SOURCE__LOCAL_DIR__ROOT` → `source.local_dir.root`),
/// hence the lowercase aliases on every variant.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum BackendConfig {
    #[serde(alias = "s3")]
    S3(S3Config),
    #[serde(alias = "googledrive", alias = "google_drive")]
    GoogleDrive(GoogleDriveConfig),
    #[serde(alias = "localdir", alias = "local_dir")]
    LocalDir(LocalDirConfig),
    #[serde(alias = "inmemory", alias = "in_memory")]
    InMemory(InMemoryConfig),
}

impl BackendConfig {
    pub fn rate_limit(&self) -> &RateLimitConfig {
        match self {
            BackendConfig::S3(c) => &c.rate_limit,
            BackendConfig::GoogleDrive(c) => &c.rate_limit,
            BackendConfig::LocalDir(c) => &c.rate_limit,
            BackendConfig::InMemory(c) => &c.rate_limit,
        }
    }

    fn validate(&self, side: &str) -> anyhow::Result<()> {
        if let Some(problem) = self.rate_limit().problems() {
            bail!("💀 {side}: {problem}");
        }
        match self {
            BackendConfig::S3(c) if c.bucket.trim().is_empty() => {
                bail!("💀 {side}: S3 bucket name is empty. Buckets need names. Even the sad ones.")
            }
            BackendConfig::GoogleDrive(c) if c.token_path.as_os_str().is_empty() => {
                bail!("💀 {side}: Google Drive token_path is empty. We can't knock without a key.")
            }
            BackendConfig::LocalDir(c) if c.root.as_os_str().is_empty() => {
                bail!("💀 {side}: local directory root is empty. Which folder? All of them?")
            }
            _ => Ok(()),
        }
    }
}

/// ⚙️ Run-level knobs. Everything has a default, so `[runtime]` can be omitted entirely.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    /// 📊 Draw the progress bar. Turn off for CI logs that hate carriage returns.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            show_progress: default_show_progress(),
        }
    }
}

fn default_show_progress() -> bool {
    true
}

/// 🔄 Retry knobs, in milliseconds because TOML has no duration type and we have no patience.
///
/// Outer attempts back off exponentially from `initial_backoff_ms` (1s, 2s, 4s...).
/// Each download and each upload gets `io_attempts` tries of its own, backing off
/// linearly by `io_backoff_step_ms` (1s, 2s, 3s...).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_attempts")]
    pub io_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub io_backoff_step_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            initial_backoff_ms: default_backoff_ms(),
            io_attempts: default_attempts(),
            io_backoff_step_ms: default_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// 🔍 Catch the nonsense before any network traffic happens.
    ///
    /// Credentials are deliberately not checked here: missing secrets show up as an
    /// `Authentication` error at connect time, attributed to the right side.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        if self.runtime.retry.max_attempts == 0 {
            bail!("💀 runtime.retry.max_attempts must be at least 1. Zero attempts is just giving up early.");
        }
        if self.runtime.retry.io_attempts == 0 {
            bail!("💀 runtime.retry.io_attempts must be at least 1.");
        }
        if let (BackendConfig::LocalDir(src), BackendConfig::LocalDir(dst)) =
            (&self.source, &self.destination)
        {
            if src.root == dst.root {
                bail!(
                    "💀 source and destination are the same directory ({}). That's not a migration, that's a mirror.",
                    src.root.display()
                );
            }
        }
        Ok(())
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`PMV_*`, nested with `__`, e.g.
/// `PMV_DESTINATION__S3__BUCKET` or `PMV_SOURCE__GOOGLE_DRIVE__TOKEN_PATH`) with an
/// optional TOML file. TOML wins on conflicts.
///   - `None`  → env vars only. No file. No assumptions.
///   - `Some`  → env vars + TOML file, merged.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("PMV_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 💬 A context message that actually TELLS you what went wrong. No "error: error" energy.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (PMV_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (PMV_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
