/*!
Common error types for the head mouse components.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// Frame decoding errors
    #[error("Parse error: {0}")]
    Parse(#[from] crate::sample::ParseError),

    /// Calibration that violates `limit >= null >= 0`
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),
}

impl SharedError {
    pub fn invalid_calibration(msg: impl Into<String>) -> Self {
        Self::InvalidCalibration(msg.into())
    }
}
