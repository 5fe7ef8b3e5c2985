//! Adapter errors and their mapping into the core taxonomy.

use fieldops_core::error::{FieldOpsError, RemoteError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl ClientError {
    /// Classify into the core remote-error taxonomy for `resource`.
    pub fn into_remote(self, resource: &str) -> RemoteError {
        let resource = resource.to_string();
        match self {
            ClientError::Status { status, message } => RemoteError::Rejected {
                resource,
                status,
                message,
            },
            ClientError::Serde(err) => RemoteError::Decode {
                resource,
                reason: err.to_string(),
            },
            ClientError::InvalidResponse(reason) => RemoteError::Decode { resource, reason },
            ClientError::Http(err) if err.is_decode() => RemoteError::Decode {
                resource,
                reason: err.to_string(),
            },
            other => RemoteError::RequestFailed {
                resource,
                reason: other.to_string(),
            },
        }
    }

    pub fn into_field_ops(self, resource: &str) -> FieldOpsError {
        self.into_remote(resource).into()
    }
}

/// PostgREST error body.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct PostgrestErrorBody {
    pub message: Option<String>,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl PostgrestErrorBody {
    pub(crate) fn describe(self) -> Option<String> {
        let head = self.message.or(self.error)?;
        Some(match self.details {
            Some(details) if !details.is_empty() => format!("{} ({})", head, details),
            _ => head,
        })
    }
}

/// Turn a non-success body into a [`ClientError::Status`].
pub(crate) fn status_error(status: u16, body: &str) -> ClientError {
    let message = serde_json::from_str::<PostgrestErrorBody>(body)
        .ok()
        .and_then(PostgrestErrorBody::describe)
        .unwrap_or_else(|| body.trim().to_string());
    ClientError::Status { status, message }
}
