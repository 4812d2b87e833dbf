//! Error types shared across the harness.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single operation against the remote share.
///
/// Load drivers count these instead of propagating them; every other
/// caller treats them as fatal for the check at hand.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not connected: {0}")]
    NotConnected(String),
}

impl TransportError {
    pub fn io(context: &str, detail: impl std::fmt::Display) -> Self {
        TransportError::Io(format!("{context}: {detail}"))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => TransportError::Timeout(err.to_string()),
            std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportError::NotConnected(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

/// Errors raised while loading or querying the test-info document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse test info: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate share name present: {0}")]
    DuplicateShare(String),

    #[error("share not found: {0}")]
    ShareNotFound(String),

    #[error("share {0} has no credentials")]
    NoCredentials(String),

    #[error("no test info file given (use --test-info or TEST_INFO_FILE)")]
    MissingTestInfo,
}

/// Data-integrity failures detected by consistency and stress checks.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("stat size mismatch: {actual} != {expected} {path}")]
    StatMismatch {
        path: String,
        actual: u64,
        expected: u64,
    },

    #[error("data length mismatch: {actual} != {expected} {path}")]
    LengthMismatch {
        path: String,
        actual: usize,
        expected: usize,
    },

    #[error("data mismatch at {path}")]
    ContentMismatch { path: String },

    #[error("still exists: {path}")]
    StillExists { path: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("stress client {client_id} failed: {source}")]
    StressClient {
        client_id: usize,
        #[source]
        source: Box<CheckError>,
    },

    #[error("task failed: {0}")]
    Join(String),
}

impl CheckError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        CheckError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Errors of the load-test coordinator and its fan-out.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to setup connection: {0}")]
    Setup(#[source] TransportError),

    #[error("invalid operation weights: {0}")]
    InvalidMix(#[from] rand::distributions::WeightedError),

    #[error("worker {process_number} failed: {message}")]
    Worker {
        process_number: usize,
        message: String,
    },

    #[error("server side errors seen when running load tests: {0}")]
    ServerErrors(u64),
}
