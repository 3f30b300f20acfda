use crate::report::InputReport;
use crate::usb::UsbError;

/// Unit of the event stream consumed by the event loop.
///
/// Events are totally ordered by the time the loop takes them off the
/// queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Shut down; produced by a cancelled read or by the interrupt signal
    Quit,
    DeviceArrived,
    DeviceLeft,
    /// A read finished; payload was not a report with A or X held
    TransferCompleted(Vec<u8>),
    ButtonAPressed(InputReport),
    /// Ends the whole run
    ButtonXPressed(InputReport),
    /// A read finished with an error other than cancellation
    TransferFailed(UsbError),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Quit => "Quit",
            Event::DeviceArrived => "DeviceArrived",
            Event::DeviceLeft => "DeviceLeft",
            Event::TransferCompleted(_) => "TransferCompleted",
            Event::ButtonAPressed(_) => "ButtonAPressed",
            Event::ButtonXPressed(_) => "ButtonXPressed",
            Event::TransferFailed(_) => "TransferFailed",
        }
    }
}
