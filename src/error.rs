//! Error types for Transfer Core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the stage of a transfer that produced them, because
//! the stage decides how a failure is classified into a terminal state:
//!
//! ### Protocol errors (HTTP layer)
//! - `RangeNotSupported` is the only error answered with an automatic retry
//!   (a full restart from byte zero).
//! - `NetworkError`, `UnexpectedStatusCode` and the `#[from] reqwest::Error`
//!   wrapper end the attempt with `ErrorGeneric`.
//!
//! ### Integrity errors
//! - `HashMismatch` ends with `ErrorHashMismatch`; the data is discarded.
//!
//! ### Placement errors
//! - `MoveFailed`, `FileIoError` end with `ErrorMovingIncomplete` when raised while
//!   promoting a finished file.
//!
//! ### Post-processing errors
//! - `ConversionFailed`, `FfmpegError`, `FfmpegNotFound` (mux/demux/strip) end with
//!   `ErrorMovingIncomplete`. `TaggingFailed` is never fatal.
//!
//! ### Disk space
//! - Any I/O error caused by a full device is classified as `ErrorDiskFull`.

use crate::transfer::state::TransferState;
use thiserror::Error;

/// Result type alias using our TransferError type
pub type Result<T> = std::result::Result<T, TransferError>;

/// Main error type for Transfer Core
#[derive(Error, Debug)]
pub enum TransferError {
    // ===== Network / HTTP Errors =====

    /// Server refused or ignored a ranged request
    #[error("Server does not support byte-range requests")]
    RangeNotSupported,

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned unexpected status code
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Invalid download URL format or protocol
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    // ===== Integrity Errors =====

    /// MD5 digest of the downloaded data did not match
    #[error("MD5 mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: String,
        actual: String,
    },

    // ===== File / Placement Errors =====

    /// Promoting a file to its final location failed
    #[error("Could not move {from} to {to}: {reason}")]
    MoveFailed {
        from: String,
        to: String,
        reason: String,
    },

    /// File not found at expected location
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Generic file I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Device ran out of space
    #[error("Insufficient disk space: {0}")]
    InsufficientDiskSpace(String),

    // ===== Post-processing Errors =====

    /// Container mux/demux/rewrite failed
    #[error("Container processing failed: {0}")]
    ConversionFailed(String),

    /// Writing audio tags failed
    #[error("Tagging failed: {0}")]
    TaggingFailed(String),

    /// FFmpeg execution failed
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// FFmpeg binary not found
    #[error("FFmpeg not found. Please install FFmpeg to process media containers.")]
    FfmpegNotFound,

    // ===== State / Configuration Errors =====

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid in current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// State machine rejected a transition
    #[error("Illegal transition from {from:?} on {event}")]
    IllegalTransition {
        from: TransferState,
        event: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    // ===== External Library Errors =====

    /// Reqwest HTTP client errors
    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransferError {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a file I/O error
    pub fn file_io<S: Into<String>>(message: S) -> Self {
        Self::FileIoError(message.into())
    }

    /// Create a network error
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        Self::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a container processing error
    pub fn conversion<S: Into<String>>(message: S) -> Self {
        Self::ConversionFailed(message.into())
    }

    /// Check if this error is transient and the operation could succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { is_transient, .. } => *is_transient,
            Self::RangeNotSupported => true,
            Self::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// The server cannot continue a partial download
    pub fn is_range_not_supported(&self) -> bool {
        matches!(self, Self::RangeNotSupported)
    }

    /// The failure was caused by a full device
    pub fn is_disk_full(&self) -> bool {
        match self {
            Self::InsufficientDiskSpace(_) => true,
            Self::IoError(e) => is_storage_full(e),
            Self::FileIoError(msg) | Self::MoveFailed { reason: msg, .. } => {
                msg.contains("No space left on device")
            }
            _ => false,
        }
    }

    /// Terminal state produced when this error ends a download attempt
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_disk_full() {
            FailureKind::DiskFull
        } else if matches!(self, Self::HashMismatch { .. }) {
            FailureKind::HashMismatch
        } else {
            FailureKind::Generic
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::RangeNotSupported => {
                "The server cannot resume this download. It will restart from the beginning.".to_string()
            }
            Self::NetworkError { .. } | Self::ReqwestError(_) => {
                "Network error. Please check your internet connection.".to_string()
            }
            Self::UnexpectedStatusCode { status_code, .. } => {
                format!("The server refused the download (HTTP {}).", status_code)
            }
            Self::HashMismatch { .. } => {
                "The downloaded file is corrupt and was discarded.".to_string()
            }
            Self::MoveFailed { .. } => {
                "The finished file could not be moved to the download folder.".to_string()
            }
            Self::InsufficientDiskSpace(_) => "Not enough disk space.".to_string(),
            Self::FfmpegNotFound => {
                "FFmpeg is not installed. Please install FFmpeg to finish this download.".to_string()
            }
            Self::Cancelled => "Download cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error states a failed attempt can end in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Generic,
    HashMismatch,
    MovingIncomplete,
    DiskFull,
}

impl FailureKind {
    pub const ALL: [FailureKind; 4] = [
        FailureKind::Generic,
        FailureKind::HashMismatch,
        FailureKind::MovingIncomplete,
        FailureKind::DiskFull,
    ];

    /// The error state this failure is reported as
    pub fn state(self) -> TransferState {
        match self {
            FailureKind::Generic => TransferState::ErrorGeneric,
            FailureKind::HashMismatch => TransferState::ErrorHashMismatch,
            FailureKind::MovingIncomplete => TransferState::ErrorMovingIncomplete,
            FailureKind::DiskFull => TransferState::ErrorDiskFull,
        }
    }
}

pub(crate) fn is_storage_full(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::StorageFull || e.raw_os_error() == Some(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransferError::UnexpectedStatusCode {
            status_code: 404,
            url: "https://example.com/a.mp3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Server responded with unexpected status code 404 for https://example.com/a.mp3"
        );
    }

    #[test]
    fn test_range_errors_are_retryable() {
        assert!(TransferError::RangeNotSupported.is_retryable());
        assert!(TransferError::network_error("reset", true).is_retryable());
        assert!(!TransferError::network_error("refused", false).is_retryable());
        assert!(!TransferError::HashMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_failure_kind_classification() {
        let full = TransferError::IoError(std::io::Error::from_raw_os_error(28));
        assert_eq!(full.failure_kind(), FailureKind::DiskFull);
        assert_eq!(full.failure_kind().state(), TransferState::ErrorDiskFull);

        let mismatch = TransferError::HashMismatch {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(mismatch.failure_kind().state(), TransferState::ErrorHashMismatch);

        let other = TransferError::network_error("boom", false);
        assert_eq!(other.failure_kind().state(), TransferState::ErrorGeneric);
    }

    #[test]
    fn test_user_message() {
        let msg = TransferError::FfmpegNotFound.user_message();
        assert!(msg.contains("FFmpeg"));
    }
}
