//! Logger setup
//!
//! Library code logs through the `log` facade; this module wires the
//! `env_logger` sink with an explicit level and an optional file target.
//! `RUST_LOG` still overrides the level, matching the usual env_logger
//! behavior.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use env_logger::{Builder, Target};
use log::LevelFilter;

/// Initialize the process-wide logger.
///
/// With `log_file` set, records go to that file instead of stderr.
///
/// # Errors
/// Fails if the log file cannot be created or a logger is already
/// installed.
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::from_default_env();
    builder.filter_level(level);

    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("logger already initialized")?;
    Ok(())
}
