//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_LEVEL_INTERVAL_MS: u64 = 100;
const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Where exports land when a client does not name a path
    pub export_dir: PathBuf,

    /// Read `down` / `up` lines from stdin
    pub stdin_input: bool,

    /// Cadence of the input level sampler
    pub level_interval: Duration,

    /// Engine output sample rate
    pub sample_rate: u32,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("LOOPER_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home).join(".local").join("share").join("looper")
            }
        };

        let socket_path = lookup("LOOPER_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let export_dir = lookup("LOOPER_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("exports"));

        let stdin_input = match lookup("LOOPER_STDIN_INPUT") {
            Some(value) => parse_flag(&value)
                .with_context(|| format!("invalid LOOPER_STDIN_INPUT: {value:?}"))?,
            None => true,
        };

        let level_interval_ms = match lookup("LOOPER_LEVEL_INTERVAL_MS") {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .with_context(|| format!("invalid LOOPER_LEVEL_INTERVAL_MS: {value:?}"))?,
            None => DEFAULT_LEVEL_INTERVAL_MS,
        };

        let sample_rate = match lookup("LOOPER_SAMPLE_RATE") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|rate| *rate > 0)
                .with_context(|| format!("invalid LOOPER_SAMPLE_RATE: {value:?}"))?,
            None => DEFAULT_SAMPLE_RATE,
        };

        Ok(Self {
            socket_path,
            data_dir,
            export_dir,
            stdin_input,
            level_interval: Duration::from_millis(level_interval_ms),
            sample_rate,
        })
    }

    /// Ensure data and export directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        std::fs::create_dir_all(&self.export_dir)
            .with_context(|| format!("failed to create {}", self.export_dir.display()))?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
