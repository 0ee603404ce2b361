use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors raised by monitor modules and the polling orchestrator
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("unable to find crawler executable at '{0}'")]
    ToolMissing(PathBuf),

    #[error("crawler invocation failed: {0}")]
    ToolFailed(String),

    #[error("crawler produced non-UTF-8 output: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("failed to parse crawler output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    SchemaDrift(String),

    #[error("reporting sink rejected a call: {0}")]
    Report(#[from] ReportError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by the results reporting sink
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    #[error("measurement series {0} is already closed")]
    SeriesClosed(u64),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
