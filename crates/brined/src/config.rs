//! Daemon settings: defaults, optional TOML config file, CLI overrides.
//!
//! Precedence is flag over file over default, per key.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Default storage byte budget (1 MiB).
pub const DEFAULT_MAX_BYTES: usize = 1 << 20;

/// Failure to read or parse the config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read config file: {e}"),
            Self::Parse(e) => write!(f, "cannot parse config file: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Keys accepted in the TOML config file. Every key is optional; unknown
/// keys are rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub listen: Option<SocketAddr>,
    pub workers: Option<usize>,
    pub max_bytes: Option<usize>,
    pub single_threaded: Option<bool>,
}

impl ConfigFile {
    /// Parse config file contents.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::parse(&text)
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, PartialEq, Eq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub workers: usize,
    pub max_bytes: usize,
    pub single_threaded: bool,
}

impl Settings {
    /// Merge CLI values over file values over defaults.
    pub fn resolve(
        file: ConfigFile,
        listen: Option<SocketAddr>,
        workers: Option<usize>,
        max_bytes: Option<usize>,
        single_threaded: bool,
    ) -> Self {
        Settings {
            listen: listen
                .or(file.listen)
                .unwrap_or_else(|| DEFAULT_LISTEN.parse().expect("default listen address")),
            workers: workers.or(file.workers).unwrap_or_else(default_workers),
            max_bytes: max_bytes.or(file.max_bytes).unwrap_or(DEFAULT_MAX_BYTES),
            single_threaded: single_threaded || file.single_threaded.unwrap_or(false),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
