//! Logging setup for `rundown` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--debug`, which also sends logs to `rundown.log`
//! 2. `RUNDOWN_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `warn`
//!
//! Otherwise logs go to STDERR so that stdout carries only the rendered
//! document.

use std::fs::File;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::fmt;

pub const DEBUG_LOG: &str = "rundown.log";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(debug: bool) -> Result<()> {
    if debug {
        let file = File::create(DEBUG_LOG).with_context(|| format!("cannot create {DEBUG_LOG}"))?;
        fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
        return Ok(());
    }

    let level = std::env::var("RUNDOWN_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(tracing::Level::WARN);
    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
