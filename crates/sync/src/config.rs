//! Sync settings read from a `key=value` conf file.
//!
//! Lines are trimmed; `#` and `;` start comments; a bare key means `1`; keys
//! are case-insensitive and the last occurrence wins. Unknown keys are
//! ignored so the same file can carry settings for other components.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use spvd_consensus::{chain_params, Network};
use spvd_log::{Format, Level, LogConfig};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    InvalidValue { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config: {err}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {key}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub network: Network,
    /// Bound on in-flight blocks and transaction groups; intake holds twice this.
    pub queue_size: usize,
    pub request_timeout: Duration,
    pub log_level: Level,
    pub log_format: Format,
    pub log_timestamps: bool,
}

impl SyncConfig {
    pub fn for_network(network: Network) -> Self {
        let params = chain_params(network);
        let log = LogConfig::default();
        Self {
            network,
            queue_size: params.request_queue_size,
            request_timeout: Duration::from_secs(params.request_timeout_secs),
            log_level: log.level,
            log_format: log.format,
            log_timestamps: log.timestamps,
        }
    }

    /// Reads `path` over the network defaults. A missing file yields the
    /// defaults unchanged.
    pub fn load(path: &Path, network: Network) -> Result<Self, ConfigError> {
        let mut config = Self::for_network(network);
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(config),
            Err(err) => return Err(err.into()),
        };
        config.apply(&parse_conf(&contents))?;
        Ok(config)
    }

    pub fn from_conf_str(contents: &str, network: Network) -> Result<Self, ConfigError> {
        let mut config = Self::for_network(network);
        config.apply(&parse_conf(contents))?;
        Ok(config)
    }

    pub fn apply(&mut self, entries: &HashMap<String, Vec<String>>) -> Result<(), ConfigError> {
        if let Some(value) = last(entries, "requestqueuesize") {
            self.queue_size = match value.parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => return Err(invalid("requestqueuesize", value)),
            };
        }
        if let Some(value) = last(entries, "requesttimeout") {
            self.request_timeout = match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(invalid("requesttimeout", value)),
            };
        }
        if let Some(value) = last(entries, "loglevel") {
            self.log_level = Level::parse(value).ok_or_else(|| invalid("loglevel", value))?;
        }
        if let Some(value) = last(entries, "logformat") {
            self.log_format = Format::parse(value).ok_or_else(|| invalid("logformat", value))?;
        }
        if let Some(value) = last(entries, "logtimestamps") {
            self.log_timestamps =
                parse_conf_bool(value).ok_or_else(|| invalid("logtimestamps", value))?;
        }
        Ok(())
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            format: self.log_format,
            timestamps: self.log_timestamps,
        }
    }
}

fn last<'a>(entries: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    entries
        .get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

pub fn parse_conf(contents: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find('#') {
            line = &line[..idx];
        }
        if let Some(idx) = line.find(';') {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    out
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
