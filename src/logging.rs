// ABOUTME: tracing-subscriber setup writing to a dated log file, optionally mirrored to stderr
// ABOUTME: RUST_LOG overrides the configured level; noisy client crates are capped at warn

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const DEFAULT_LOG_PREFIX: &str = "mysql_back";

const NOISY_TARGETS: &[(&str, &str)] = &[
    ("sqlx", "warn"),
    ("aws_config", "warn"),
    ("aws_smithy_runtime", "warn"),
    ("aws_sdk_s3", "warn"),
    ("hyper", "warn"),
    ("rustls", "warn"),
];

/// `{dir}/{prefix}_{YYYYMMDD}.log`
pub fn log_file_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}_{}.log", prefix, Local::now().format("%Y%m%d")))
}

fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![level.to_string()];
    for (target, lvl) in NOISY_TARGETS {
        directives.push(format!("{}={}", target, lvl));
    }
    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str)
        .with_context(|| format!("Invalid log level '{}'", level))
}

/// Install the global subscriber. Returns the log file path in use.
pub fn init(level: &str, log_dir: &Path, console: bool) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_file_path(log_dir, DEFAULT_LOG_PREFIX);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_target(true)
        .with_filter(build_env_filter(level)?);

    let console_layer = if console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(build_env_filter(level)?),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logging was already initialized")?;

    Ok(path)
}
