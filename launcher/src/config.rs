//! Launcher configuration
//!
//! Settings can be loaded from a JSON file and are then overridden by
//! command-line flags.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strata_common::{FileSystemBackend, FileSystemConfig};
use strata_core::{ParquetOptions, ScanOptions};

/// Configuration for the `strata` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LauncherConfig {
    /// Where datasets are read from.
    pub filesystem: FileSystemConfig,
    pub scan: ScanOptions,
    pub parquet: ParquetOptions,
    /// Log level used when no `-v` flag is given.
    pub log_level: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            filesystem: FileSystemConfig {
                backend: FileSystemBackend::LocalFileSystem {
                    root_path: ".".to_string(),
                },
                ..FileSystemConfig::default()
            },
            scan: ScanOptions::default(),
            parquet: ParquetOptions::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl LauncherConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid config file '{}'", path.display()))
    }

    /// The log level from `-v` occurrences, falling back to the configured one.
    pub fn log_level(&self, verbose: u8) -> Result<tracing::Level> {
        Ok(match verbose {
            0 => tracing::Level::from_str(&self.log_level)
                .map_err(|_| anyhow::anyhow!("unknown log level '{}'", self.log_level))?,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        })
    }
}
