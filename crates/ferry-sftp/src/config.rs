//! Configuration for the SFTP client

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::protocol::{MAX_MSG_LENGTH, MIN_READ_SIZE};

/// Bytes a WRITE request needs besides its payload: type, id, handle
/// (length + up to 256 bytes), offset and data length
const WRITE_OVERHEAD: u32 = 1 + 4 + 4 + 256 + 8 + 4;

/// SFTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bytes requested per READ / sent per WRITE
    #[serde(default = "default_transfer_chunk_size")]
    pub transfer_chunk_size: u32,

    /// Maximum number of transfer requests outstanding at once
    #[serde(default = "default_max_pipeline_depth")]
    pub max_pipeline_depth: u32,

    /// Program used by the command line client to reach the server
    #[serde(default)]
    pub ssh: SshConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the command line client starts its transport.
///
/// The library never uses this: it only sees the two streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// ssh executable
    pub program: String,
    /// Extra arguments placed before the destination
    pub args: Vec<String>,
    /// Subsystem name requested on the server
    pub subsystem: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            args: Vec::new(),
            subsystem: "sftp".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfer_chunk_size: default_transfer_chunk_size(),
            max_pipeline_depth: default_max_pipeline_depth(),
            ssh: SshConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.transfer_chunk_size < MIN_READ_SIZE {
            return Err(crate::Error::Config(format!(
                "transfer_chunk_size must be at least {} bytes",
                MIN_READ_SIZE
            )));
        }

        if self.transfer_chunk_size > MAX_MSG_LENGTH - WRITE_OVERHEAD {
            return Err(crate::Error::Config(format!(
                "transfer_chunk_size must not exceed {} bytes",
                MAX_MSG_LENGTH - WRITE_OVERHEAD
            )));
        }

        if self.max_pipeline_depth == 0 {
            return Err(crate::Error::Config(
                "max_pipeline_depth must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_transfer_chunk_size() -> u32 {
    32768 // OpenSSH sftp default buffer length
}

fn default_max_pipeline_depth() -> u32 {
    64
}
