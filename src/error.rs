//! Error types for the Cybro protocol.

use std::io;
use thiserror::Error;

/// Result type alias for Cybro operations.
pub type Result<T> = std::result::Result<T, CybroError>;

/// Errors that can occur during Cybro communication.
#[derive(Debug, Error)]
pub enum CybroError {
    /// A received datagram is not a valid frame (bad signature, bad
    /// checksum, or inconsistent length field). The frame is discarded
    /// before any field is interpreted.
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// Description of what made the frame invalid.
        reason: String,
    },

    /// Socket-level send/receive failure. Surfaced immediately, without
    /// consuming a retry.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// The retry budget was exhausted without a matching response.
    #[error("Request timed out")]
    RequestTimeout,

    /// A well-formed response whose payload cannot satisfy the caller
    /// (too short, missing fields).
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the response error.
        reason: String,
    },

    /// Invalid parameter provided by the caller.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },
}

impl CybroError {
    /// Creates a new `MalformedFrame` error.
    ///
    /// # Example
    ///
    /// ```
    /// use cybro_plc::CybroError;
    ///
    /// let err = CybroError::malformed_frame("frame signature is incorrect");
    /// ```
    pub fn malformed_frame(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    ///
    /// # Example
    ///
    /// ```
    /// use cybro_plc::CybroError;
    ///
    /// let err = CybroError::invalid_response("status payload too short");
    /// ```
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use cybro_plc::CybroError;
    ///
    /// let err = CybroError::invalid_parameter("size", "must be greater than 0");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}
