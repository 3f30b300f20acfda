//! Device session - the only owner of a live device handle
//!
//! # State Machine
//!
//! ```text
//! Closed ──open──► Open ──claim_interface──► InterfaceClaimed ──configure──► Configured
//!   ▲                                                                            │
//!   └──────────────────────────────── close ─────────────────────────────────────┘
//! ```
//!
//! Steps only move forward on success. `close` is valid from every state,
//! releases whatever was acquired and may be called any number of times.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    DeviceFilter, NotificationSink, TransferCanceller, TransferId, UsbBackend, UsbDevice, UsbError,
};
use crate::config::DeviceSettings;
use crate::report::{RumbleCommand, INIT_COMMAND};

const ENDPOINT_IN: u8 = 0x80;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    #[default]
    Closed,
    Open,
    InterfaceClaimed,
    Configured,
}

// Session errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No device {0} attached")]
    DeviceNotFound(DeviceFilter),

    #[error("Session is not open")]
    NotOpen,

    #[error("Interface {0} is held by another process")]
    InterfaceBusy(u8),

    #[error("Operation needs session state {required:?}, session is {actual:?}")]
    InvalidState {
        required: SessionState,
        actual: SessionState,
    },

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),
}

pub struct DeviceSession {
    device: Option<Box<dyn UsbDevice>>,
    state: SessionState,
    settings: DeviceSettings,
}

impl DeviceSession {
    /// A session with no device behind it
    pub fn closed(settings: DeviceSettings) -> Self {
        Self {
            device: None,
            state: SessionState::Closed,
            settings,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != SessionState::Closed
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Opens the first attached device matching the configured vendor/product pair
    pub fn open(&mut self, backend: &mut dyn UsbBackend) -> Result<(), DeviceError> {
        self.require_exact(SessionState::Closed)?;

        let filter = self.settings.filter();
        let device = backend
            .open(filter)?
            .ok_or(DeviceError::DeviceNotFound(filter))?;

        info!("Device {} opened", filter);
        debug!("Port numbers: {:?}", device.port_numbers());

        self.device = Some(device);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Claims the configured interface, detaching any kernel driver first
    pub fn claim_interface(&mut self) -> Result<(), DeviceError> {
        self.require_exact(SessionState::Open)?;
        let interface = self.settings.interface;
        let device = self.device.as_mut().ok_or(DeviceError::NotOpen)?;

        if let Err(e) = device.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable ({}); continuing", e);
        }

        device.claim_interface(interface).map_err(|e| match e {
            UsbError::Busy => DeviceError::InterfaceBusy(interface),
            other => DeviceError::Usb(other),
        })?;

        info!("Claimed interface {}", interface);
        self.state = SessionState::InterfaceClaimed;
        Ok(())
    }

    /// Sends the start-up packet that turns on input reporting
    pub fn configure(&mut self) -> Result<(), DeviceError> {
        self.require_exact(SessionState::InterfaceClaimed)?;
        self.write(&INIT_COMMAND)?;

        info!("Controller configured");
        self.state = SessionState::Configured;
        Ok(())
    }

    pub fn send_rumble(&mut self, left: u8, right: u8) -> Result<(), DeviceError> {
        self.require_at_least(SessionState::InterfaceClaimed)?;
        let command = RumbleCommand::new(left, right);
        self.write(&command.encode())?;

        debug!("Rumble sent: {:?}", command);
        Ok(())
    }

    /// Starts one interrupt-IN read on the configured endpoint
    pub fn submit_read(
        &mut self,
        id: TransferId,
        sink: NotificationSink,
    ) -> Result<Box<dyn TransferCanceller>, DeviceError> {
        self.require_exact(SessionState::Configured)?;
        let endpoint = self.settings.in_endpoint | ENDPOINT_IN;
        let len = self.settings.read_buffer_len;
        let device = self.device.as_mut().ok_or(DeviceError::NotOpen)?;

        Ok(device.submit_interrupt_read(endpoint, len, id, sink)?)
    }

    /// Releases the interface if it is claimed; no-op otherwise
    pub fn release_interface(&mut self) {
        if self.state < SessionState::InterfaceClaimed {
            return;
        }
        let interface = self.settings.interface;
        if let Some(device) = self.device.as_mut() {
            match device.release_interface(interface) {
                Ok(()) => info!("Released interface {}", interface),
                Err(e) if e.is_disconnect() => debug!("Interface {} gone with device", interface),
                Err(e) => warn!("Cannot release interface {}: {}", interface, e),
            }
        }
        self.state = SessionState::Open;
    }

    /// Releases the interface and drops the handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed && self.device.is_none() {
            return;
        }
        self.release_interface();
        if self.device.take().is_some() {
            info!("Device {} closed", self.settings.filter());
        }
        self.state = SessionState::Closed;
    }

    fn write(&mut self, packet: &[u8]) -> Result<(), DeviceError> {
        let endpoint = self.settings.out_endpoint & !ENDPOINT_IN;
        let device = self.device.as_mut().ok_or(DeviceError::NotOpen)?;
        let written = device.write_interrupt(endpoint, packet)?;
        if written != packet.len() {
            warn!("Short write: {} of {} bytes", written, packet.len());
        }
        debug!("TX {} bytes: {:02x?}", written, packet);
        Ok(())
    }

    fn require_exact(&self, required: SessionState) -> Result<(), DeviceError> {
        if self.state == required {
            return Ok(());
        }
        Err(self.state_error(required))
    }

    fn require_at_least(&self, required: SessionState) -> Result<(), DeviceError> {
        if self.state >= required {
            return Ok(());
        }
        Err(self.state_error(required))
    }

    fn state_error(&self, required: SessionState) -> DeviceError {
        if self.state == SessionState::Closed {
            DeviceError::NotOpen
        } else {
            DeviceError::InvalidState {
                required,
                actual: self.state,
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
