use super::units;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Where buckets go, derived from `--remote-url` / `--target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// No collector configured: accumulate only.
    None,
    /// Raw TCP, wire content is exactly the bucket bytes.
    Raw { addr: String },
    /// HTTP/1.1 POST per bucket.
    Http {
        addr: String,
        host: String,
        uri: String,
    },
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Bounded-memory log forwarding agent", long_about = None)]
#[serde(default)]
pub struct Config {
    /// HTTP collector URL (enables HTTP framing)
    #[arg(long, env = "LOGSHIP_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Raw TCP collector as host:port (enables raw framing)
    #[arg(long, env = "LOGSHIP_TARGET")]
    pub target: Option<String>,

    /// Memory ceiling for buffered plus queued data (accepts 16K/4M/1G)
    #[arg(long, env = "LOGSHIP_MAX_MEMORY", default_value = "32M", value_parser = units::parse_size)]
    pub max_memory: u64,

    /// Treat input as binary (disables line-boundary cutting)
    #[arg(long, env = "LOGSHIP_BINARY")]
    pub binary: bool,

    /// Compress buckets with gzip
    #[arg(long, env = "LOGSHIP_COMPRESSION")]
    pub compression: bool,

    /// Gzip level (0-9)
    #[arg(long, env = "LOGSHIP_COMPRESSION_LEVEL", default_value = "6")]
    pub compression_level: u32,

    /// Bytes per input read
    #[arg(long, env = "LOGSHIP_READ_SIZE", default_value = "8K", value_parser = units::parse_size)]
    pub read_size: u64,

    /// Nominal bucket size before compression
    #[arg(long, env = "LOGSHIP_WRITE_SIZE", default_value = "128K", value_parser = units::parse_size)]
    pub write_size: u64,

    /// Seconds to back off after a transport failure
    #[arg(long, env = "LOGSHIP_THROTTLE_TIME_ON_FAIL", default_value = "5")]
    pub throttle_time_on_fail: u64,

    /// Seconds before a partial buffer is flushed anyway
    #[arg(long, env = "LOGSHIP_BUFFER_LIFETIME", default_value = "60")]
    pub buffer_lifetime_before_flush: u64,

    /// Zero-progress poll iterations before a send attempt is abandoned
    #[arg(long, env = "LOGSHIP_MAX_RETRY_WITHOUT_TRANSFER", default_value = "500")]
    pub max_retry_without_transfer: u32,

    /// Requeue buckets the collector rejected with a non-200 status
    #[arg(long, env = "LOGSHIP_RETRY_ON_REJECT")]
    pub retry_on_reject: bool,

    /// Read from a file instead of standard input
    #[arg(long, env = "LOGSHIP_INPUT_FILE")]
    pub input_file: Option<PathBuf>,

    /// Seconds between periodic status lines (0 disables)
    #[arg(long, env = "LOGSHIP_STATUS_INTERVAL", default_value = "10")]
    pub status_interval_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Configuration file path (optional)
    #[arg(long, env = "LOGSHIP_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub throttle_time: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub buffer_lifetime: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub status_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_url: None,
            target: None,
            max_memory: 32 * 1024 * 1024,
            binary: false,
            compression: false,
            compression_level: 6,
            read_size: 8 * 1024,
            write_size: 128 * 1024,
            throttle_time_on_fail: 5,
            buffer_lifetime_before_flush: 60,
            max_retry_without_transfer: 500,
            retry_on_reject: false,
            input_file: None,
            status_interval_secs: 10,
            log_level: LogLevel::Info,
            config_file: None,
            throttle_time: Duration::from_secs(5),
            buffer_lifetime: Duration::from_secs(60),
            status_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) {
        self.throttle_time = Duration::from_secs(self.throttle_time_on_fail);
        self.buffer_lifetime = Duration::from_secs(self.buffer_lifetime_before_flush);
        self.status_interval = Duration::from_secs(self.status_interval_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_level > 9 {
            return Err(ConfigError::InvalidConfig(format!(
                "compression level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.read_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "read size must be non-zero".to_string(),
            ));
        }
        if self.write_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "write size must be non-zero".to_string(),
            ));
        }
        if self.max_retry_without_transfer == 0 {
            return Err(ConfigError::InvalidConfig(
                "max retry without transfer must be at least 1".to_string(),
            ));
        }
        // Destination parsing doubles as validation.
        self.destination().map(|_| ())
    }

    /// Resolve the configured collector endpoint.
    pub fn destination(&self) -> Result<Destination, ConfigError> {
        match (&self.remote_url, &self.target) {
            (Some(_), Some(_)) => Err(ConfigError::InvalidConfig(
                "--remote-url and --target are mutually exclusive".to_string(),
            )),
            (Some(remote_url), None) => {
                let url = Url::parse(remote_url)?;
                if url.scheme() != "http" {
                    return Err(ConfigError::InvalidConfig(format!(
                        "unsupported scheme '{}': only plain http collectors are supported",
                        url.scheme()
                    )));
                }
                let host = url
                    .host_str()
                    .ok_or_else(|| {
                        ConfigError::InvalidConfig(format!("URL has no host: {remote_url}"))
                    })?
                    .to_string();
                let port = url.port().unwrap_or(80);
                let mut uri = url.path().to_string();
                if uri.is_empty() {
                    uri.push('/');
                }
                if let Some(query) = url.query() {
                    uri.push('?');
                    uri.push_str(query);
                }
                Ok(Destination::Http {
                    addr: format!("{host}:{port}"),
                    host,
                    uri,
                })
            }
            (None, Some(target)) => {
                if !target.contains(':') {
                    return Err(ConfigError::InvalidConfig(format!(
                        "target must be host:port, got {target}"
                    )));
                }
                Ok(Destination::Raw {
                    addr: target.clone(),
                })
            }
            (None, None) => Ok(Destination::None),
        }
    }
}
