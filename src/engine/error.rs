use thiserror::Error;

use crate::usb::session::DeviceError;
use crate::usb::transfer::TransferError;
use crate::usb::{UsbError, WatcherError};

/// Failures that stop the engine before the event loop is entered
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("Hotplug notification is not supported on this platform")]
    HotplugUnsupported,

    #[error("Failed to register hotplug callback: {0}")]
    HotplugRegistration(UsbError),
}

impl SetupError {
    /// Process exit code reported for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            SetupError::Init(_) => 1,
            SetupError::HotplugUnsupported => 2,
            SetupError::HotplugRegistration(_) => 3,
        }
    }
}

impl From<WatcherError> for SetupError {
    fn from(err: WatcherError) -> Self {
        match err {
            WatcherError::HotplugUnsupported => SetupError::HotplugUnsupported,
            WatcherError::Registration(e) => SetupError::HotplugRegistration(e),
        }
    }
}

impl From<UsbError> for SetupError {
    fn from(err: UsbError) -> Self {
        SetupError::Init(err.to_string())
    }
}

/// Why bringing a newly arrived device online failed. Never fatal.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        assert_eq!(SetupError::Init("no context".into()).exit_code(), 1);
        assert_eq!(SetupError::HotplugUnsupported.exit_code(), 2);
        assert_eq!(
            SetupError::HotplugRegistration(UsbError::NotSupported).exit_code(),
            3
        );
    }

    #[test]
    fn watcher_errors_convert() {
        assert!(matches!(
            SetupError::from(WatcherError::HotplugUnsupported),
            SetupError::HotplugUnsupported
        ));
        assert!(matches!(
            SetupError::from(WatcherError::Registration(UsbError::Access)),
            SetupError::HotplugRegistration(UsbError::Access)
        ));
    }
}
