//! Scripted backend for exercising the engine without hardware

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{
    DeviceFilter, HotplugKind, HotplugNotice, HotplugRegistration, Notification, NotificationSink,
    TransferCanceller, TransferId, TransferOutcome, UsbBackend, UsbDevice, UsbError,
};

pub const PAD: DeviceFilter = DeviceFilter {
    vendor_id: 0x045e,
    product_id: 0x02ea,
};

/// Everything the engine did to the backend, in order per kind
#[derive(Debug, Default)]
pub struct MockLog {
    pub registrations: usize,
    pub deregistrations: usize,
    pub opens: usize,
    pub auto_detach: Vec<bool>,
    pub claims: Vec<u8>,
    pub releases: Vec<u8>,
    pub writes: Vec<(u8, Vec<u8>)>,
    pub submits: Vec<(u8, usize, TransferId)>,
    pub cancels: Vec<TransferId>,
    pub device_drops: usize,
}

pub type SharedLog = Arc<Mutex<MockLog>>;

/// What the next submitted read does
#[derive(Clone, Debug)]
pub enum ReadScript {
    Complete(Vec<u8>),
    Fail(UsbError),
    /// Stays in flight until cancelled
    Pending,
}

pub fn arrived() -> HotplugNotice {
    HotplugNotice {
        kind: HotplugKind::Arrived,
        vendor_id: PAD.vendor_id,
        product_id: PAD.product_id,
    }
}

pub fn left() -> HotplugNotice {
    HotplugNotice {
        kind: HotplugKind::Left,
        vendor_id: PAD.vendor_id,
        product_id: PAD.product_id,
    }
}

pub struct MockBackend {
    log: SharedLog,
    hotplug: bool,
    registration_error: Option<UsbError>,
    attached: bool,
    claim_error: Option<UsbError>,
    write_error: Option<UsbError>,
    notices: Vec<HotplugNotice>,
    reads: Arc<Mutex<VecDeque<ReadScript>>>,
}

impl MockBackend {
    fn build(attached: bool) -> (Self, SharedLog) {
        let log = SharedLog::default();
        let backend = Self {
            log: log.clone(),
            hotplug: true,
            registration_error: None,
            attached,
            claim_error: None,
            write_error: None,
            notices: Vec::new(),
            reads: Arc::default(),
        };
        (backend, log)
    }

    pub fn attached() -> (Self, SharedLog) {
        Self::build(true)
    }

    pub fn detached() -> (Self, SharedLog) {
        Self::build(false)
    }

    pub fn without_hotplug(mut self) -> Self {
        self.hotplug = false;
        self
    }

    pub fn with_registration_error(mut self, error: UsbError) -> Self {
        self.registration_error = Some(error);
        self
    }

    pub fn with_claim_error(mut self, error: UsbError) -> Self {
        self.claim_error = Some(error);
        self
    }

    /// Every interrupt-OUT write fails with `error`
    pub fn with_write_error(mut self, error: UsbError) -> Self {
        self.write_error = Some(error);
        self
    }

    /// Notices delivered as soon as the hotplug callback is registered
    pub fn with_notices(mut self, notices: impl IntoIterator<Item = HotplugNotice>) -> Self {
        self.notices.extend(notices);
        self
    }

    pub fn with_reads(self, reads: impl IntoIterator<Item = ReadScript>) -> Self {
        self.reads.lock().expect("reads").extend(reads);
        self
    }
}

impl UsbBackend for MockBackend {
    fn library_version(&self) -> String {
        "mock".to_string()
    }

    fn has_hotplug(&self) -> bool {
        self.hotplug
    }

    fn register_hotplug(
        &mut self,
        _filter: DeviceFilter,
        sink: NotificationSink,
    ) -> Result<Box<dyn HotplugRegistration>, UsbError> {
        if let Some(error) = self.registration_error.clone() {
            return Err(error);
        }
        self.log.lock().expect("log").registrations += 1;
        for notice in self.notices.drain(..) {
            let _ = sink.send(Notification::Hotplug(notice));
        }
        Ok(Box::new(MockRegistration {
            log: self.log.clone(),
            active: true,
        }))
    }

    fn open(&mut self, _filter: DeviceFilter) -> Result<Option<Box<dyn UsbDevice>>, UsbError> {
        if !self.attached {
            return Ok(None);
        }
        self.log.lock().expect("log").opens += 1;
        Ok(Some(Box::new(MockDevice {
            log: self.log.clone(),
            claim_error: self.claim_error.clone(),
            write_error: self.write_error.clone(),
            reads: self.reads.clone(),
        })))
    }
}

struct MockRegistration {
    log: SharedLog,
    active: bool,
}

impl HotplugRegistration for MockRegistration {
    fn deregister(&mut self) {
        if self.active {
            self.active = false;
            self.log.lock().expect("log").deregistrations += 1;
        }
    }
}

struct MockDevice {
    log: SharedLog,
    claim_error: Option<UsbError>,
    write_error: Option<UsbError>,
    reads: Arc<Mutex<VecDeque<ReadScript>>>,
}

impl UsbDevice for MockDevice {
    fn set_auto_detach_kernel_driver(&mut self, enable: bool) -> Result<(), UsbError> {
        self.log.lock().expect("log").auto_detach.push(enable);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        if let Some(error) = self.claim_error.clone() {
            return Err(error);
        }
        self.log.lock().expect("log").claims.push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.log.lock().expect("log").releases.push(interface);
        Ok(())
    }

    fn write_interrupt(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, UsbError> {
        if let Some(error) = self.write_error.clone() {
            return Err(error);
        }
        self.log
            .lock()
            .expect("log")
            .writes
            .push((endpoint, data.to_vec()));
        Ok(data.len())
    }

    fn submit_interrupt_read(
        &mut self,
        endpoint: u8,
        len: usize,
        id: TransferId,
        sink: NotificationSink,
    ) -> Result<Box<dyn TransferCanceller>, UsbError> {
        self.log
            .lock()
            .expect("log")
            .submits
            .push((endpoint, len, id));

        let script = self.reads.lock().expect("reads").pop_front();
        let outcome = match script {
            Some(ReadScript::Complete(data)) => Some(TransferOutcome::Completed(data)),
            Some(ReadScript::Fail(error)) => Some(TransferOutcome::Failed(error)),
            Some(ReadScript::Pending) | None => None,
        };
        if let Some(outcome) = outcome {
            let _ = sink.send(Notification::Transfer { id, outcome });
        }

        Ok(Box::new(MockCanceller {
            id,
            sink,
            log: self.log.clone(),
        }))
    }

    fn port_numbers(&self) -> Vec<u8> {
        vec![1, 4]
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.log.lock().expect("log").device_drops += 1;
    }
}

struct MockCanceller {
    id: TransferId,
    sink: NotificationSink,
    log: SharedLog,
}

impl TransferCanceller for MockCanceller {
    fn cancel(&self) {
        self.log.lock().expect("log").cancels.push(self.id);
        let _ = self.sink.send(Notification::Transfer {
            id: self.id,
            outcome: TransferOutcome::Cancelled,
        });
    }
}
