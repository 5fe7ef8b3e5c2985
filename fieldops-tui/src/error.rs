//! Error types for the terminal client.

use crate::config::ConfigError;
use fieldops_client::{ClientError, PersistenceError};

#[derive(Debug, thiserror::Error)]
pub enum TuiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Session file error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
