use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("motion sensor not available: {0}")]
    Unsupported(String),

    #[error("acceleration axis '{0}' is missing")]
    MissingAxis(char),

    #[error("malformed motion reading {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio capture not available: {0}")]
    Unsupported(String),

    #[error("microphone access denied: {0}")]
    AccessDenied(String),

    #[error("audio stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
