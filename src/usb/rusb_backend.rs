//! libusb backend built on `rusb`
//!
//! Three kinds of threads feed the notification queue:
//!
//! - the event pump, which runs `handle_events` so libusb can deliver
//!   hotplug callbacks;
//! - the hotplug callback itself, which only forwards a notice;
//! - one reader worker per open device, which performs the interrupt-IN
//!   read for the transfer currently in flight.
//!
//! The reader blocks in `read_interrupt` with a short timeout and simply
//! retries on expiry, checking its abort flag in between. From the outside
//! the read blocks until data arrives, the device disappears or the read
//! is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, LogLevel, Registration, UsbContext};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{
    DeviceFilter, HotplugKind, HotplugNotice, HotplugRegistration, Notification, NotificationSink,
    TransferCanceller, TransferId, TransferOutcome, UsbBackend, UsbDevice, UsbError,
};
use crate::config::UsbSettings;

impl From<rusb::Error> for UsbError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NotFound => UsbError::NotFound,
            rusb::Error::Busy => UsbError::Busy,
            rusb::Error::NoDevice => UsbError::NoDevice,
            rusb::Error::Access => UsbError::Access,
            rusb::Error::Timeout => UsbError::Timeout,
            rusb::Error::Pipe => UsbError::Pipe,
            rusb::Error::NotSupported => UsbError::NotSupported,
            rusb::Error::Io => UsbError::Io(err.to_string()),
            other => UsbError::Other(other.to_string()),
        }
    }
}

/// Joins a worker that has been told to stop. It notices within one poll
/// interval; on a multi-threaded runtime the wait is moved off the async
/// worker so other tasks keep running.
fn join_worker(join: thread::JoinHandle<()>) -> thread::Result<()> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| join.join())
        }
        _ => join.join(),
    }
}

fn parse_log_level(level: &str) -> LogLevel {
    match level.to_ascii_lowercase().as_str() {
        "none" | "off" => LogLevel::None,
        "error" => LogLevel::Error,
        "warning" | "warn" => LogLevel::Warning,
        "info" => LogLevel::Info,
        "debug" => LogLevel::Debug,
        other => {
            warn!("Unknown libusb log level '{}', using warning", other);
            LogLevel::Warning
        }
    }
}

pub struct RusbBackend {
    context: Context,
    settings: UsbSettings,
    pump: Option<EventPump>,
}

impl RusbBackend {
    pub fn new(settings: UsbSettings) -> Result<Self, UsbError> {
        let mut context = Context::new()?;
        context.set_log_level(parse_log_level(&settings.log_level));
        debug!("libusb context created");

        Ok(Self {
            context,
            settings,
            pump: None,
        })
    }

    fn ensure_pump(&mut self) -> Result<(), UsbError> {
        if self.pump.is_none() {
            self.pump = Some(EventPump::spawn(
                self.context.clone(),
                self.settings.poll_interval(),
            )?);
        }
        Ok(())
    }
}

impl UsbBackend for RusbBackend {
    fn library_version(&self) -> String {
        let version = rusb::version();
        format!(
            "libusb v{}.{}.{}.{}{}",
            version.major(),
            version.minor(),
            version.micro(),
            version.nano(),
            version.rc().unwrap_or("")
        )
    }

    fn has_hotplug(&self) -> bool {
        rusb::has_hotplug()
    }

    fn register_hotplug(
        &mut self,
        filter: DeviceFilter,
        sink: NotificationSink,
    ) -> Result<Box<dyn HotplugRegistration>, UsbError> {
        let callback: Box<dyn Hotplug<Context>> = Box::new(HotplugForwarder { sink });

        let mut builder = HotplugBuilder::new();
        builder
            .vendor_id(filter.vendor_id)
            .product_id(filter.product_id)
            .enumerate(self.settings.enumerate_attached);
        let registration = builder.register(&self.context, callback)?;

        self.ensure_pump()?;
        Ok(Box::new(RusbRegistration {
            registration: Some(registration),
        }))
    }

    fn open(&mut self, filter: DeviceFilter) -> Result<Option<Box<dyn UsbDevice>>, UsbError> {
        for device in self.context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!("Skipping device without descriptor: {}", e);
                    continue;
                }
            };
            if !filter.matches(descriptor.vendor_id(), descriptor.product_id()) {
                continue;
            }

            let port_numbers = device.port_numbers().unwrap_or_default();
            let handle = device.open()?;
            return Ok(Some(Box::new(RusbDevice {
                handle: Arc::new(handle),
                reader: None,
                poll_interval: self.settings.poll_interval(),
                write_timeout: self.settings.write_timeout(),
                port_numbers,
            })));
        }
        Ok(None)
    }
}

impl Drop for RusbBackend {
    fn drop(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.shutdown();
        }
    }
}

/// Runs libusb's event handling so hotplug callbacks fire
struct EventPump {
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl EventPump {
    fn spawn(context: Context, poll_interval: Duration) -> Result<Self, UsbError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let join = thread::Builder::new()
            .name("padlink-usb-events".to_string())
            .spawn(move || {
                debug!("libusb event pump started");
                while !flag.load(Ordering::SeqCst) {
                    match context.handle_events(Some(poll_interval)) {
                        Ok(()) | Err(rusb::Error::Interrupted) => {}
                        Err(e) => {
                            error!("libusb event handling failed: {}", e);
                            thread::sleep(poll_interval);
                        }
                    }
                }
                debug!("libusb event pump stopped");
            })
            .map_err(|e| UsbError::Io(format!("failed to spawn event pump: {}", e)))?;

        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join_worker(join).is_err() {
                warn!("libusb event pump panicked");
            }
        }
    }
}

struct HotplugForwarder {
    sink: NotificationSink,
}

impl HotplugForwarder {
    fn forward(&self, kind: HotplugKind, device: &Device<Context>) {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Hotplug {:?} for device without descriptor: {}", kind, e);
                return;
            }
        };
        let notice = HotplugNotice {
            kind,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
        };
        trace!("Hotplug notice: {:?}", notice);
        if self.sink.send(Notification::Hotplug(notice)).is_err() {
            debug!("Notification queue closed, dropping hotplug notice");
        }
    }
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        self.forward(HotplugKind::Arrived, &device);
    }

    fn device_left(&mut self, device: Device<Context>) {
        self.forward(HotplugKind::Left, &device);
    }
}

struct RusbRegistration {
    registration: Option<Registration<Context>>,
}

impl HotplugRegistration for RusbRegistration {
    fn deregister(&mut self) {
        // dropping the registration deregisters the callback
        self.registration.take();
    }
}

struct RusbDevice {
    handle: Arc<DeviceHandle<Context>>,
    reader: Option<ReadWorker>,
    poll_interval: Duration,
    write_timeout: Duration,
    port_numbers: Vec<u8>,
}

impl RusbDevice {
    fn stop_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.shutdown();
        }
    }

    /// Exclusive access for calls that need `&mut DeviceHandle`
    fn handle_mut(&mut self) -> Result<&mut DeviceHandle<Context>, UsbError> {
        self.stop_reader();
        Arc::get_mut(&mut self.handle)
            .ok_or_else(|| UsbError::Other("device handle is still shared".to_string()))
    }
}

impl UsbDevice for RusbDevice {
    fn set_auto_detach_kernel_driver(&mut self, enable: bool) -> Result<(), UsbError> {
        Ok(self.handle_mut()?.set_auto_detach_kernel_driver(enable)?)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        Ok(self.handle_mut()?.claim_interface(interface)?)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        Ok(self.handle_mut()?.release_interface(interface)?)
    }

    fn write_interrupt(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, UsbError> {
        Ok(self
            .handle
            .write_interrupt(endpoint, data, self.write_timeout)?)
    }

    fn submit_interrupt_read(
        &mut self,
        endpoint: u8,
        len: usize,
        id: TransferId,
        sink: NotificationSink,
    ) -> Result<Box<dyn TransferCanceller>, UsbError> {
        if self.reader.is_none() {
            self.reader = Some(ReadWorker::spawn(self.handle.clone(), self.poll_interval)?);
        }
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| UsbError::Other("reader worker unavailable".to_string()))?;

        let abort = Arc::new(AtomicBool::new(false));
        reader.submit(ReadWork {
            endpoint,
            len,
            id,
            sink,
            abort: abort.clone(),
        })?;
        Ok(Box::new(RusbCanceller { abort }))
    }

    fn port_numbers(&self) -> Vec<u8> {
        self.port_numbers.clone()
    }
}

impl Drop for RusbDevice {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

struct RusbCanceller {
    abort: Arc<AtomicBool>,
}

impl TransferCanceller for RusbCanceller {
    fn cancel(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }
}

struct ReadWork {
    endpoint: u8,
    len: usize,
    id: TransferId,
    sink: NotificationSink,
    abort: Arc<AtomicBool>,
}

/// Dedicated thread performing the interrupt-IN reads of one device
struct ReadWorker {
    tx: Option<mpsc::UnboundedSender<ReadWork>>,
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl ReadWorker {
    fn spawn(handle: Arc<DeviceHandle<Context>>, poll_interval: Duration) -> Result<Self, UsbError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let join = thread::Builder::new()
            .name("padlink-reader".to_string())
            .spawn(move || run_reader(handle, rx, flag, poll_interval))
            .map_err(|e| UsbError::Io(format!("failed to spawn reader: {}", e)))?;

        Ok(Self {
            tx: Some(tx),
            shutdown,
            join: Some(join),
        })
    }

    fn submit(&self, work: ReadWork) -> Result<(), UsbError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| UsbError::Other("reader is shut down".to_string()))?;
        tx.send(work)
            .map_err(|_| UsbError::Other("reader thread has exited".to_string()))
    }

    fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join_worker(join).is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

impl Drop for ReadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_reader(
    handle: Arc<DeviceHandle<Context>>,
    mut rx: mpsc::UnboundedReceiver<ReadWork>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("Reader started");
    while let Some(work) = rx.blocking_recv() {
        trace!("Reading transfer {}", work.id);
        let outcome = read_until_done(&handle, &work, &shutdown, poll_interval);
        if let TransferOutcome::Failed(e) = &outcome {
            debug!("Transfer {} failed in reader: {}", work.id, e);
        }
        if work
            .sink
            .send(Notification::Transfer {
                id: work.id,
                outcome,
            })
            .is_err()
        {
            debug!("Notification queue closed, stopping reader");
            break;
        }
    }
    info!("Reader stopped");
}

fn read_until_done(
    handle: &DeviceHandle<Context>,
    work: &ReadWork,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) -> TransferOutcome {
    let mut buf = vec![0u8; work.len];
    loop {
        if work.abort.load(Ordering::SeqCst) || shutdown.load(Ordering::SeqCst) {
            return TransferOutcome::Cancelled;
        }
        match handle.read_interrupt(work.endpoint, &mut buf, poll_interval) {
            Ok(read) => {
                buf.truncate(read);
                return TransferOutcome::Completed(buf);
            }
            Err(rusb::Error::Timeout | rusb::Error::Interrupted) => continue,
            Err(e) => return TransferOutcome::Failed(e.into()),
        }
    }
}
