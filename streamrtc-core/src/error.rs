//! Error types for StreamRTC

use thiserror::Error;

/// Error reported by a document store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// Backend error code (e.g. `permission-denied`, `unavailable`)
    pub code: String,
    /// Human-readable message from the backend
    pub message: String,
}

impl StoreError {
    /// Create a store error from a code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Store rejected the write for authorization reasons
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new("permission-denied", message)
    }

    /// Store is unreachable
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("unavailable", message)
    }

    /// Payload was rejected as non-serializable or malformed
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("invalid-argument", message)
    }
}

/// Main error type for StreamRTC operations
#[derive(Error, Debug)]
pub enum StreamRtcError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Caller is not signed in
    #[error("Not authenticated: {operation} requires a signed-in user")]
    NotAuthenticated {
        /// Operation that required authentication
        operation: String,
    },

    /// Credential gate refused the caller
    #[error("Credential rejected for {identity}")]
    CredentialRejected {
        /// Identity that was refused
        identity: String,
    },

    /// Camera or microphone access was denied
    #[error("Permission denied for {device}")]
    PermissionDenied {
        /// Device that was denied
        device: String,
    },

    /// Media could not be acquired for a reason other than permission
    #[error("Media acquisition failed: {reason}")]
    MediaAcquisition {
        /// Reason for failure
        reason: String,
    },

    /// Viewer polled for an offer and none appeared
    #[error("No offer found for stream {stream_id} after {attempts} attempts")]
    NoOfferFound {
        /// Stream that was polled
        stream_id: String,
        /// Number of reads performed
        attempts: u32,
    },

    /// Offer/answer/candidate application failed
    #[error("Negotiation failed: {reason}")]
    Negotiation {
        /// Reason for negotiation failure
        reason: String,
    },

    /// Signal write rejected by the store
    #[error("Signal write '{label}' to {path} failed: {source}")]
    SignalWrite {
        /// Label of the write, for diagnostics
        label: String,
        /// Path that was written
        path: String,
        /// Underlying store error
        source: StoreError,
    },

    /// Store read failed
    #[error("Read of {path} failed: {source}")]
    StoreRead {
        /// Path that was read
        path: String,
        /// Underlying store error
        source: StoreError,
    },

    /// Malformed document path
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// Invalid data error
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Reason for invalid data
        reason: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Transport error
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Operation was cancelled by a concurrent stop
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was cancelled
        operation: String,
    },

    /// JSON conversion failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StreamRtcError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            StreamRtcError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            StreamRtcError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            StreamRtcError::NotAuthenticated { .. } => "NOT_AUTHENTICATED".to_string(),
            StreamRtcError::CredentialRejected { .. } => "CREDENTIAL_REJECTED".to_string(),
            StreamRtcError::PermissionDenied { .. } => "PERMISSION_DENIED".to_string(),
            StreamRtcError::MediaAcquisition { .. } => "MEDIA_ACQUISITION_FAILED".to_string(),
            StreamRtcError::NoOfferFound { .. } => "NO_OFFER_FOUND".to_string(),
            StreamRtcError::Negotiation { .. } => "NEGOTIATION_FAILED".to_string(),
            StreamRtcError::SignalWrite { .. } => "SIGNAL_WRITE_FAILED".to_string(),
            StreamRtcError::StoreRead { .. } => "STORE_READ_FAILED".to_string(),
            StreamRtcError::InvalidPath { .. } => "INVALID_PATH".to_string(),
            StreamRtcError::InvalidData { .. } => "INVALID_DATA".to_string(),
            StreamRtcError::InvalidState { .. } => "INVALID_STATE".to_string(),
            StreamRtcError::Transport { .. } => "TRANSPORT_ERROR".to_string(),
            StreamRtcError::Cancelled { .. } => "CANCELLED".to_string(),
            StreamRtcError::Serialization(_) => "SERIALIZATION_FAILED".to_string(),
        }
    }

    /// Whether this is a camera/microphone permission failure
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StreamRtcError::PermissionDenied { .. })
    }

    /// Message suitable for showing to the person operating the stream
    pub fn user_message(&self) -> String {
        match self {
            StreamRtcError::PermissionDenied { device } => format!(
                "Access to your {} was denied. Allow access in your browser or system settings and try again.",
                device
            ),
            StreamRtcError::NotAuthenticated { .. } => {
                "Please sign in before starting or joining a stream.".to_string()
            }
            StreamRtcError::CredentialRejected { .. } => {
                "The stream password was not accepted.".to_string()
            }
            StreamRtcError::NoOfferFound { .. } => {
                "The stream is not available yet. The host may not have started it.".to_string()
            }
            other => format!("Something went wrong: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = StreamRtcError::NoOfferFound {
            stream_id: "U1-1000".to_string(),
            attempts: 10,
        };
        assert_eq!(err.error_code(), "NO_OFFER_FOUND");
        assert!(err.to_string().contains("U1-1000"));

        let err = StreamRtcError::SignalWrite {
            label: "offer".to_string(),
            path: "signaling/U1-1000".to_string(),
            source: StoreError::unavailable("offline"),
        };
        assert_eq!(err.error_code(), "SIGNAL_WRITE_FAILED");
        assert!(err.to_string().contains("unavailable: offline"));
    }

    #[test]
    fn test_permission_message_is_distinct() {
        let denied = StreamRtcError::PermissionDenied {
            device: "camera".to_string(),
        };
        let generic = StreamRtcError::MediaAcquisition {
            reason: "device busy".to_string(),
        };

        assert!(denied.is_permission_denied());
        assert!(!generic.is_permission_denied());
        assert!(denied.user_message().contains("denied"));
        assert!(generic.user_message().starts_with("Something went wrong"));
    }
}
