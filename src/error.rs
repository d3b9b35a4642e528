//! Crate-level error types
//!
//! Request handlers return these directly to the caller. `NotFound` is
//! deliberately absent: a sender who is not a room member gets
//! `PermissionDenied`, not a 404.

use crate::message::RecordError;
use crate::store::StoreError;

/// Convenience result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A required field was missing or empty; rejected before any store mutation
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The sender is not a member of the room; rejected before side effects
    #[error("user {user_id} is not a member of room {room_id}")]
    PermissionDenied { user_id: String, room_id: String },

    /// Store read/write failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A stored message record could not be decoded
    #[error("message record error: {0}")]
    Record(#[from] RecordError),

    /// Writing to the client transport failed; terminates the stream session
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl RelayError {
    /// Wire-level error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidArgument(_) => "invalid_argument",
            RelayError::PermissionDenied { .. } => "permission_denied",
            RelayError::Store(_) | RelayError::Record(_) | RelayError::Transport(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RelayError::InvalidArgument("user_id is required").code(),
            "invalid_argument"
        );
        assert_eq!(
            RelayError::PermissionDenied {
                user_id: "u1".into(),
                room_id: "weather".into(),
            }
            .code(),
            "permission_denied"
        );
        assert_eq!(
            RelayError::Store(StoreError::Backend("connection reset".into())).code(),
            "internal"
        );
    }

    #[test]
    fn test_permission_denied_display() {
        let err = RelayError::PermissionDenied {
            user_id: "alice".into(),
            room_id: "weather".into(),
        };
        assert_eq!(
            err.to_string(),
            "user alice is not a member of room weather"
        );
    }
}
