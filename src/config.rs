//! Configuration module for the conversion server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::convert::office::{DEFAULT_PROGRAM, DEFAULT_SPREADSHEET_FORMAT};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the conversion server
#[derive(Parser, Debug)]
#[command(name = "convertd")]
#[command(author = "convertd authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP document conversion server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:65432)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of sessions served at once
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Directory for uploaded source documents
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory for converted output files
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Largest accepted upload in bytes
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Deadline in seconds for each socket read/write (0 = none)
    #[arg(long)]
    pub io_timeout: Option<u64>,

    /// Deadline in seconds for a whole session (0 = none)
    #[arg(long)]
    pub session_timeout: Option<u64>,

    /// Office suite executable used for conversion
    #[arg(long)]
    pub converter: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Concurrent session ceiling
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Largest control frame accepted from a client
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Per-operation socket deadline in seconds (0 = none)
    #[serde(default)]
    pub io_timeout_secs: u64,
    /// Whole-session deadline in seconds (0 = none)
    #[serde(default)]
    pub session_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            max_frame_len: default_max_frame_len(),
            io_timeout_secs: 0,
            session_timeout_secs: 0,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Where uploaded documents are written
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Where converted files are collected
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Largest accepted upload in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Converter configuration
#[derive(Debug, Deserialize)]
pub struct ConverterConfig {
    /// Office suite executable
    #[serde(default = "default_program")]
    pub program: String,
    /// Target format for spreadsheets
    #[serde(default = "default_spreadsheet_format")]
    pub spreadsheet_format: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            spreadsheet_format: default_spreadsheet_format(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:65432".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_backlog() -> u32 {
    1024
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("converted_files")
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_spreadsheet_format() -> String {
    DEFAULT_SPREADSHEET_FORMAT.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub backlog: u32,
    pub max_frame_len: usize,
    pub io_timeout: Option<Duration>,
    pub session_timeout: Option<Duration>,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_file_size: u64,
    pub converter_program: String,
    pub spreadsheet_format: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(
            CliArgs {
                config: None,
                listen: None,
                max_connections: None,
                upload_dir: None,
                output_dir: None,
                max_file_size: None,
                io_timeout: None,
                session_timeout: None,
                converter: None,
                workers: None,
                log_level: None,
            },
            TomlConfig::default(),
        )
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args, reading the TOML file they name.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections)
                .max(1),
            backlog: toml_config.server.backlog,
            max_frame_len: toml_config.server.max_frame_len,
            io_timeout: seconds(
                cli.io_timeout
                    .unwrap_or(toml_config.server.io_timeout_secs),
            ),
            session_timeout: seconds(
                cli.session_timeout
                    .unwrap_or(toml_config.server.session_timeout_secs),
            ),
            upload_dir: cli.upload_dir.unwrap_or(toml_config.storage.upload_dir),
            output_dir: cli.output_dir.unwrap_or(toml_config.storage.output_dir),
            max_file_size: cli
                .max_file_size
                .unwrap_or(toml_config.storage.max_file_size),
            converter_program: cli.converter.unwrap_or(toml_config.converter.program),
            spreadsheet_format: toml_config.converter.spreadsheet_format,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
