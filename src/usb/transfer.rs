//! Transfer cycle - exactly one interrupt-IN read in flight
//!
//! ```text
//! Idle ──submit──► Submitted ──completion──► Idle
//!                      │
//!                      └──cancel──► (Cancelled completion) ──► Idle, Quit
//! ```
//!
//! Completions are matched against the current [`TransferId`]; anything
//! else belongs to an abandoned read and is dropped.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::{DeviceError, DeviceSession};
use super::{NotificationSink, TransferCanceller, TransferId, TransferOutcome, UsbError};
use crate::engine::Event;
use crate::report::InputReport;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Transfer {0} is still submitted")]
    AlreadySubmitted(TransferId),

    #[error("Failed to submit transfer: {0}")]
    Submit(#[from] DeviceError),

    #[error("Transfer {id} failed: {error}")]
    Completion { id: TransferId, error: UsbError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Submitted(TransferId),
}

pub struct TransferCycle {
    state: TransferState,
    canceller: Option<Box<dyn TransferCanceller>>,
    cancel_requested: bool,
    next_id: u64,
    sink: NotificationSink,
}

impl TransferCycle {
    pub fn new(sink: NotificationSink) -> Self {
        Self {
            state: TransferState::Idle,
            canceller: None,
            cancel_requested: false,
            next_id: 1,
            sink,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.state, TransferState::Submitted(_))
    }

    /// True once [`cancel`](Self::cancel) has been forwarded for the current read
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Submits the next read. Fails without side effects if one is in flight.
    pub fn submit(&mut self, session: &mut DeviceSession) -> Result<TransferId, TransferError> {
        if let TransferState::Submitted(current) = self.state {
            return Err(TransferError::AlreadySubmitted(current));
        }

        let id = TransferId(self.next_id);
        let canceller = session.submit_read(id, self.sink.clone())?;

        self.next_id += 1;
        self.canceller = Some(canceller);
        self.cancel_requested = false;
        self.state = TransferState::Submitted(id);
        debug!("Transfer {} submitted", id);
        Ok(id)
    }

    /// Asks the in-flight read to stop. Returns false when there is
    /// nothing to cancel or cancellation was already requested.
    pub fn cancel(&mut self) -> bool {
        let TransferState::Submitted(id) = self.state else {
            return false;
        };
        if self.cancel_requested {
            return false;
        }
        if let Some(canceller) = &self.canceller {
            info!("Cancelling transfer {}", id);
            canceller.cancel();
        }
        self.cancel_requested = true;
        true
    }

    /// Forgets the in-flight read; its completion will be dropped as stale
    pub fn abandon(&mut self) -> Option<TransferId> {
        let TransferState::Submitted(id) = self.state else {
            return None;
        };
        if let Some(canceller) = self.canceller.take() {
            canceller.cancel();
        }
        self.cancel_requested = false;
        self.state = TransferState::Idle;
        debug!("Transfer {} abandoned", id);
        Some(id)
    }

    /// Accepts a completion and turns it into an event.
    ///
    /// A report with A held yields [`Event::ButtonAPressed`]; X is only
    /// checked when A is not held, so A+X reports as A.
    pub fn complete(&mut self, id: TransferId, outcome: TransferOutcome) -> Option<Event> {
        if self.state != TransferState::Submitted(id) {
            debug!("Dropping stale completion for transfer {}", id);
            return None;
        }
        self.state = TransferState::Idle;
        self.canceller = None;
        self.cancel_requested = false;

        let event = match outcome {
            TransferOutcome::Completed(data) => {
                debug!("RX {} bytes: {:02x?}", data.len(), data);
                match InputReport::decode(&data) {
                    Some(report) => {
                        debug!("Report: {:?}", report);
                        if report.buttons.a {
                            Event::ButtonAPressed(report)
                        } else if report.buttons.x {
                            Event::ButtonXPressed(report)
                        } else {
                            Event::TransferCompleted(data)
                        }
                    }
                    None => Event::TransferCompleted(data),
                }
            }
            TransferOutcome::Cancelled => {
                info!("Transfer {} cancelled", id);
                Event::Quit
            }
            TransferOutcome::Failed(error) => {
                warn!("{}", TransferError::Completion { id, error: error.clone() });
                Event::TransferFailed(error)
            }
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;
    use crate::report::INPUT_REPORT_LEN;
    use crate::usb::mock::{MockBackend, ReadScript};
    use crate::usb::notification_queue;

    fn report_with(byte4: u8) -> Vec<u8> {
        let mut data = vec![0u8; INPUT_REPORT_LEN];
        data[0] = 0x20;
        data[3] = 0x0E;
        data[4] = byte4;
        data
    }

    fn configured(backend: &mut MockBackend) -> DeviceSession {
        let mut session = DeviceSession::closed(DeviceSettings::default());
        session.open(backend).expect("open");
        session.claim_interface().expect("claim");
        session.configure().expect("configure");
        session
    }

    #[test]
    fn second_submit_fails_without_side_effects() {
        let (mut backend, log) = MockBackend::attached();
        let (sink, _queue) = notification_queue();
        let mut session = configured(&mut backend);
        let mut cycle = TransferCycle::new(sink);

        let first = cycle.submit(&mut session).expect("first submit");
        let err = cycle.submit(&mut session).expect_err("second submit");

        assert!(matches!(err, TransferError::AlreadySubmitted(id) if id == first));
        assert_eq!(cycle.state(), TransferState::Submitted(first));
        assert_eq!(log.lock().expect("log").submits.len(), 1);
    }

    #[test]
    fn submit_on_closed_session_stays_idle() {
        let (sink, _queue) = notification_queue();
        let mut session = DeviceSession::closed(DeviceSettings::default());
        let mut cycle = TransferCycle::new(sink);

        assert!(matches!(
            cycle.submit(&mut session),
            Err(TransferError::Submit(DeviceError::NotOpen))
        ));
        assert_eq!(cycle.state(), TransferState::Idle);
    }

    #[test]
    fn completion_classification() {
        let cases = [
            (report_with(0x00), "TransferCompleted"),
            (report_with(0x10), "ButtonAPressed"),
            (report_with(0x40), "ButtonXPressed"),
            (report_with(0x50), "ButtonAPressed"),
            (vec![0x07, 0x20, 0x01, 0x02, 0x01, 0x5B], "TransferCompleted"),
        ];

        for (data, expected) in cases {
            let (mut backend, _log) = MockBackend::attached();
            let (sink, _queue) = notification_queue();
            let mut session = configured(&mut backend);
            let mut cycle = TransferCycle::new(sink);

            let id = cycle.submit(&mut session).expect("submit");
            let event = cycle
                .complete(id, TransferOutcome::Completed(data))
                .expect("current completion");
            assert_eq!(event.name(), expected);
            assert_eq!(cycle.state(), TransferState::Idle);
        }
    }

    #[test]
    fn cancelled_completion_is_quit() {
        let (mut backend, log) = MockBackend::attached();
        let (sink, _queue) = notification_queue();
        let mut session = configured(&mut backend);
        let mut cycle = TransferCycle::new(sink);

        let id = cycle.submit(&mut session).expect("submit");
        assert!(cycle.cancel());
        assert!(!cycle.cancel(), "cancel is forwarded once");
        assert_eq!(log.lock().expect("log").cancels, vec![id]);

        assert_eq!(cycle.complete(id, TransferOutcome::Cancelled), Some(Event::Quit));
        assert!(!cycle.cancel_requested());
    }

    #[test]
    fn failed_completion_is_recoverable() {
        let (mut backend, _log) = MockBackend::attached();
        let (sink, _queue) = notification_queue();
        let mut session = configured(&mut backend);
        let mut cycle = TransferCycle::new(sink);

        let id = cycle.submit(&mut session).expect("submit");
        let event = cycle.complete(id, TransferOutcome::Failed(UsbError::Pipe));
        assert_eq!(event, Some(Event::TransferFailed(UsbError::Pipe)));

        let next = cycle.submit(&mut session).expect("resubmit after failure");
        assert_ne!(next, id);
    }

    #[test]
    fn abandoned_transfer_completion_is_stale() {
        let (backend, _log) = MockBackend::attached();
        let mut backend = backend.with_reads([ReadScript::Pending]);
        let (sink, _queue) = notification_queue();
        let mut session = configured(&mut backend);
        let mut cycle = TransferCycle::new(sink);

        let id = cycle.submit(&mut session).expect("submit");
        assert_eq!(cycle.abandon(), Some(id));
        assert_eq!(cycle.abandon(), None);
        assert_eq!(cycle.complete(id, TransferOutcome::Cancelled), None);
        assert!(!cycle.cancel());
    }
}
