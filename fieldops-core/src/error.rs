//! Error types for field operations

use crate::identity::LapId;
use crate::lap::Checkpoint;
use thiserror::Error;

/// Device location errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Remote backend errors (network, rejection, malformed payloads).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Request to {resource} failed: {reason}")]
    RequestFailed { resource: String, reason: String },

    #[error("Request to {resource} rejected with status {status}: {message}")]
    Rejected {
        resource: String,
        status: u16,
        message: String,
    },

    #[error("Invalid payload from {resource}: {reason}")]
    Decode { resource: String, reason: String },

    #[error("Subscription to {channel} failed: {reason}")]
    SubscriptionFailed { channel: String, reason: String },
}

/// Validation errors, raised before any remote call is issued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Lap not loaded: {lap_id}")]
    LapNotFound { lap_id: LapId },

    #[error("Checkpoint {checkpoint:?} out of order for lap {lap_id}")]
    CheckpointOutOfOrder { lap_id: LapId, checkpoint: Checkpoint },

    #[error("Lap {lap_id} is not the latest lap (latest is #{latest_number})")]
    NotLatestLap { lap_id: LapId, latest_number: u32 },

    #[error("Lap {lap_id} has not been completed")]
    LapNotCompleted { lap_id: LapId },

    #[error("Another operation is still in flight")]
    OperationInFlight,

    #[error("Photo limit reached: at most {max} photos")]
    PhotoLimit { max: usize },

    #[error("No active session")]
    NoSession,

    #[error("Record not found: {resource} {key}")]
    RecordNotFound { resource: String, key: String },
}

/// Local session store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session store failed: {reason}")]
    StoreFailed { reason: String },
}

/// Master error type for all field operations errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldOpsError {
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl FieldOpsError {
    /// Human-readable message suitable for an alert shown to the driver.
    pub fn user_message(&self) -> String {
        match self {
            FieldOpsError::Location(LocationError::PermissionDenied) => {
                "Location permission denied. Enable it in settings.".to_string()
            }
            FieldOpsError::Location(LocationError::Unavailable { .. }) => {
                "Could not obtain a location fix. Try again.".to_string()
            }
            FieldOpsError::Remote(RemoteError::Rejected { message, .. }) => message.clone(),
            FieldOpsError::Remote(err) => format!("Backend unavailable: {}", err),
            FieldOpsError::Validation(ValidationError::RequiredFieldMissing { field }) => {
                format!("Please fill in {}.", field.replace('_', " "))
            }
            FieldOpsError::Validation(err) => err.to_string(),
            FieldOpsError::Session(err) => err.to_string(),
        }
    }
}

/// Result type alias for field operations.
pub type FieldOpsResult<T> = Result<T, FieldOpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_rejected() {
        let err = RemoteError::Rejected {
            resource: "asignaciones_transporte".to_string(),
            status: 401,
            message: "JWT expired".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("401"));
        assert!(msg.contains("JWT expired"));
    }

    #[test]
    fn test_validation_error_display_out_of_order() {
        let err = ValidationError::CheckpointOutOfOrder {
            lap_id: LapId(7),
            checkpoint: Checkpoint::Departure,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Departure"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn test_field_ops_error_from_variants() {
        let location = FieldOpsError::from(LocationError::PermissionDenied);
        assert!(matches!(location, FieldOpsError::Location(_)));

        let validation = FieldOpsError::from(ValidationError::NoSession);
        assert!(matches!(validation, FieldOpsError::Validation(_)));

        let session = FieldOpsError::from(SessionError::StoreFailed {
            reason: "disk full".to_string(),
        });
        assert!(matches!(session, FieldOpsError::Session(_)));
    }

    #[test]
    fn test_user_message_permission_denied() {
        let err = FieldOpsError::from(LocationError::PermissionDenied);
        assert!(err.user_message().contains("permission denied"));
    }

    #[test]
    fn test_user_message_required_field() {
        let err = FieldOpsError::from(ValidationError::RequiredFieldMissing {
            field: "vehicle_id".to_string(),
        });
        assert_eq!(err.user_message(), "Please fill in vehicle id.");
    }
}
