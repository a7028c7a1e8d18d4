//! 🚀 pmv-cli — the front door, the bouncer, the maitre d' of pmv.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up logging,
//! wires Ctrl-C to the cancellation token, and then lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 📸 Migrate every photo from one storage backend to another.
#[derive(Debug, Parser)]
#[command(name = "pmv", version, about)]
struct Args {
    /// 🔧 TOML config file. Env vars (`PMV_*`, nested with `__`) are merged underneath it.
    #[arg(short, long, default_value = "pmv.toml")]
    config: PathBuf,

    /// 🍞 How the log lines look.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Parse args, init tracing
/// 2. Load config (the moment of truth)
/// 3. Arm the big red button (Ctrl-C / SIGTERM)
/// 4. Run the thing, print the summary
/// 5. Exit with a code that tells scripts how it went (0 / 1 / 130)
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }

    // 🔒 Validate the config file exists before we get too emotionally attached.
    // A missing file is fine: the whole config can come from PMV_* env vars.
    let config_file = args.config.as_path();
    let config_file_if_it_exists = match config_file.try_exists()
        .context(format!("💀 Couldn't check whether the configuration file exists. Maybe it's a permissions thing, maybe it's a pwd/cwd thing. Use an absolute path to be absolutely certain. Was checking here: '{}'", config_file.display()))
    /* ? */ ?
    {
        true => Some(config_file),
        false => {
            warn!(
                "🔍 No config file at '{}'. Going with PMV_* environment variables alone.",
                config_file.display()
            );
            None
        }
    };

    let app_config = pmv::app_config::load_config(config_file_if_it_exists)
        .context("💀 In pmv-cli, main, we couldn't load the config. Take a look at the file and the PMV_* env vars, make sure you didn't forget something obvious.")
    /* ? */ ?;

    // 🛑 The big red button. First Ctrl-C (or SIGTERM) cancels; the run winds down
    // at the next photo boundary or backoff sleep and still prints a summary.
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    // 🚀 SEND IT. No take-backs. This is not a drill.
    let result = pmv::run(app_config, cancel).await;

    match result {
        Ok(report) => {
            println!("{}", pmv::progress::render_summary(&report));
            info!(status = %report.status, "🏁 migration finished");
            std::process::exit(report.exit_code());
        }
        Err(err) => {
            // 💀 Error handling: the part where we find out what went wrong
            // and print it in a way that's helpful at 3am
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                // -- 🕵️ sniff the cause like a truffle pig hunting for connection problems
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                    || cause_str.contains("could not connect")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            // -- 📡 if it smells like a connection problem, it's probably a connection problem
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like a backend isn't reachable. \
                    Double-check the endpoint URLs, that the S3 endpoint (MinIO, LocalStack, etc.) \
                    is actually running, and that the local directory exists. \
                    Even servers need a nudge sometimes. ☕"
                );
            }

            // 🗑️ Exit with prejudice. Process exitus maximus.
            std::process::exit(1);
        }
    }
}

/// 🛑 Wait for Ctrl-C (or SIGTERM on unix), then pull the cord.
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("⚠️ couldn't install the SIGTERM handler ({e}); Ctrl-C still works");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    warn!("🛑 shutdown requested, cancelling the migration");
    cancel.cancel();
}
