//! Device error types.

use kubetun_core::errors::{ERROR_DEVICE, ERROR_IO, ERROR_TIMEOUT, ERROR_UNSUPPORTED};

/// Errors from TUN device creation, configuration, and I/O.
///
/// Device errors are fatal to the enclosing session; the close path never
/// panics.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to create TUN device: {0}")]
    Create(String),

    /// A platform-level fault (panic) converted into an error during
    /// construction.
    #[error("device fault: {0}")]
    Fault(String),

    #[error("device closed")]
    Closed,

    #[error("{0} not supported on this platform")]
    Unsupported(&'static str),

    #[error("interface command failed: {0}")]
    Command(String),

    #[error("close timed out waiting for the driver")]
    CloseTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Failure kind label for logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            DeviceError::Unsupported(_) => ERROR_UNSUPPORTED,
            DeviceError::CloseTimeout => ERROR_TIMEOUT,
            DeviceError::Io(_) => ERROR_IO,
            _ => ERROR_DEVICE,
        }
    }
}
