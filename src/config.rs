//! Server configuration.
//!
//! Settings come from an optional JSON file (`--config <path>`) and are then
//! overridden by command-line flags. Every field has a default, so an empty
//! file or no file at all is a valid configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidArgument(String),
}

/// Recognized options. Keys in the file use these names verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub namespace: String,
    pub set: String,
    pub backward_write_compat: bool,
    /// TTL in seconds for expanded-map field records; `-1` is the namespace default
    pub expanded_map_default_ttl: i64,
    pub expanded_map_cache: bool,
    /// Seconds a resolved composite key stays cached; `0` never expires
    pub expanded_map_cache_ttl: u64,
    pub expanded_map_cache_capacity: usize,
    /// `host:port` receiving write-back datagrams
    pub write_back_target: Option<String>,
    #[serde(rename = "write_back_setTimeout")]
    pub write_back_set_timeout: bool,
    #[serde(rename = "write_back_hIncrBy")]
    pub write_back_hincrby: bool,
    /// Namespace default TTL of the in-process store, in seconds; `0` never expires
    pub store_default_ttl: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            namespace: "test".to_string(),
            set: "cache".to_string(),
            backward_write_compat: false,
            expanded_map_default_ttl: -1,
            expanded_map_cache: false,
            expanded_map_cache_ttl: 60,
            expanded_map_cache_capacity: 100_000,
            write_back_target: None,
            write_back_set_timeout: false,
            write_back_hincrby: false,
            store_default_ttl: 0,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Serve(Config),
    Help,
    Version,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Parses command-line arguments (without the program name).
    ///
    /// The config file is loaded first; `--host` and `--port` then override it
    /// regardless of their position.
    pub fn from_args<I>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut file = None;
        let mut host = None;
        let mut port = None;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => file = Some(PathBuf::from(value_for(&arg, args.next())?)),
                "--host" | "-h" => host = Some(value_for(&arg, args.next())?),
                "--port" | "-p" => {
                    let value = value_for(&arg, args.next())?;
                    port = Some(value.parse::<u16>().map_err(|_| {
                        ConfigError::InvalidArgument(format!("invalid port number: {}", value))
                    })?);
                }
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                other => {
                    return Err(ConfigError::InvalidArgument(format!(
                        "unknown argument: {}",
                        other
                    )))
                }
            }
        }

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        if let Some(host) = host {
            config.host = host;
        }
        if let Some(port) = port {
            config.port = port;
        }
        Ok(CliAction::Serve(config))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn value_for(flag: &str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::InvalidArgument(format!("{} requires a value", flag)))
}
