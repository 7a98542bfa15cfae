//! Media error types and handling
//!
//! Capture failures are classified so that callers can tell a denied
//! permission apart from every other reason media could not be acquired.

use streamrtc_core::StreamRtcError;
use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The user or the platform refused access to a device
    #[error("Permission denied: {device}")]
    PermissionDenied {
        /// Device that was denied (camera, microphone, screen)
        device: String,
    },

    /// No device satisfies the request
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Device exists but cannot be opened right now
    #[error("Resource not available: {resource}")]
    ResourceNotAvailable {
        /// Resource name
        resource: String,
    },

    /// Invalid constraints provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable by simply trying again later
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::ResourceNotAvailable { .. } => true,
            MediaError::PermissionDenied { .. } => false,
            MediaError::DeviceNotFound { .. } => false,
            MediaError::InvalidConfiguration { .. } => false,
        }
    }

    /// Whether access was refused, as opposed to any other failure
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, MediaError::PermissionDenied { .. })
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::PermissionDenied { .. } => ErrorCategory::Permission,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::ResourceNotAvailable { .. } => ErrorCategory::Device,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Access refused
    Permission,
    /// Device and hardware errors
    Device,
    /// Configuration and parameter errors
    Configuration,
}

impl From<MediaError> for StreamRtcError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied { device } => StreamRtcError::PermissionDenied { device },
            other => StreamRtcError::MediaAcquisition {
                reason: other.to_string(),
            },
        }
    }
}
