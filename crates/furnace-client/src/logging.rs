use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

pub const LOG_FORMAT_ENV: &str = "FURNACE_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    Discard,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn json_requested() -> bool {
    matches!(
        std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
        Some("json") | Some("JSON")
    )
}

pub fn init(target: LogTarget) -> Result<()> {
    let json = json_requested();
    let installed = match target {
        LogTarget::Stderr if json => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(io::stderr)
            .json()
            .try_init(),
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(io::stderr)
            .try_init(),
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| Error::msg(format!("failed to open log file {}: {e}", path.display())))?;
            if json {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_writer(Mutex::new(file))
                    .json()
                    .try_init()
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init()
            }
        }
        LogTarget::Discard => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(io::sink)
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
