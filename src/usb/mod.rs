//! USB layer for the controller
//!
//! Everything that touches libusb sits behind the [`UsbBackend`] and
//! [`UsbDevice`] traits. The rest of the crate only sees:
//!
//! 1. [`session`] - the owned device handle and its claim/configure lifecycle
//! 2. [`transfer`] - the single outstanding interrupt-IN read
//! 3. [`hotplug`] - attach/detach notifications for one vendor/product pair
//!
//! # Notification flow
//!
//! ```text
//! libusb event thread ──[Hotplug]──┐
//!                                  ├──► mpsc queue ──► Event Loop
//! reader worker ─────[Transfer]────┘
//! ```
//!
//! Producers push into one unbounded queue and return immediately, so a
//! libusb callback never blocks. The queue preserves arrival order.

pub mod error;
pub mod hotplug;
pub mod rusb_backend;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;

use tokio::sync::mpsc;

pub use error::UsbError;
pub use hotplug::{HotplugWatcher, WatcherError};
pub use rusb_backend::RusbBackend;
pub use session::{DeviceSession, SessionState};
pub use transfer::{TransferCycle, TransferState};

/// Sending half of the notification queue handed to backend producers
pub type NotificationSink = mpsc::UnboundedSender<Notification>;

/// Receiving half consumed by the event loop
pub type NotificationQueue = mpsc::UnboundedReceiver<Notification>;

pub fn notification_queue() -> (NotificationSink, NotificationQueue) {
    mpsc::unbounded_channel()
}

/// Vendor/product pair identifying the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceFilter {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Identifies one submission of the interrupt-IN read.
///
/// Completions carry the id of the submission they belong to, so a
/// completion that arrives after its transfer was abandoned can be told
/// apart from the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an interrupt-IN read finished
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(Vec<u8>),
    Cancelled,
    Failed(UsbError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotplugKind {
    Arrived,
    Left,
}

/// Raw attach/detach notice as seen by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HotplugNotice {
    pub kind: HotplugKind,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Unit of the notification queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Hotplug(HotplugNotice),
    Transfer {
        id: TransferId,
        outcome: TransferOutcome,
    },
}

/// Requests cooperative cancellation of a submitted read.
///
/// Cancelling does not stop the read synchronously; the read later
/// completes with [`TransferOutcome::Cancelled`].
pub trait TransferCanceller: Send {
    fn cancel(&self);
}

/// Keeps a hotplug callback registered until dropped or deregistered
pub trait HotplugRegistration: Send {
    /// Idempotent
    fn deregister(&mut self);
}

/// Live handle to an opened device
pub trait UsbDevice: Send {
    fn set_auto_detach_kernel_driver(&mut self, enable: bool) -> Result<(), UsbError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Blocking interrupt-OUT write; returns the number of bytes written
    fn write_interrupt(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, UsbError>;

    /// Starts a non-blocking interrupt-IN read of up to `len` bytes.
    ///
    /// The outcome is delivered later on `sink` as a
    /// [`Notification::Transfer`] tagged with `id`.
    fn submit_interrupt_read(
        &mut self,
        endpoint: u8,
        len: usize,
        id: TransferId,
        sink: NotificationSink,
    ) -> Result<Box<dyn TransferCanceller>, UsbError>;

    /// Port numbers from the root hub down to the device
    fn port_numbers(&self) -> Vec<u8>;
}

/// Entry point into a USB subsystem
pub trait UsbBackend: Send {
    /// Human-readable version of the underlying library
    fn library_version(&self) -> String;

    fn has_hotplug(&self) -> bool;

    fn register_hotplug(
        &mut self,
        filter: DeviceFilter,
        sink: NotificationSink,
    ) -> Result<Box<dyn HotplugRegistration>, UsbError>;

    /// Opens the first attached device matching `filter`
    fn open(&mut self, filter: DeviceFilter) -> Result<Option<Box<dyn UsbDevice>>, UsbError>;
}
