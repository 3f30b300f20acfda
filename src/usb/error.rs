use thiserror::Error;

/// Failure kinds reported by a USB backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("Entity not found")]
    NotFound,

    #[error("Resource busy")]
    Busy,

    #[error("No such device (it may have been disconnected)")]
    NoDevice,

    #[error("Access denied (insufficient permissions)")]
    Access,

    #[error("Operation timed out")]
    Timeout,

    #[error("Pipe error (endpoint halted)")]
    Pipe,

    #[error("Operation not supported on this platform")]
    NotSupported,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("USB error: {0}")]
    Other(String),
}

impl UsbError {
    /// True when the device is gone and further I/O on it is pointless
    pub fn is_disconnect(&self) -> bool {
        matches!(self, UsbError::NoDevice)
    }
}
