//! Hotplug watcher for one vendor/product pair
//!
//! Registration happens once at startup. A platform without hotplug
//! support is a fatal setup condition and is never retried.

use thiserror::Error;
use tracing::{debug, info};

use super::{
    DeviceFilter, HotplugKind, HotplugNotice, HotplugRegistration, NotificationSink, UsbBackend,
    UsbError,
};
use crate::engine::Event;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Hotplug notification is not supported on this platform")]
    HotplugUnsupported,

    #[error("Failed to register hotplug callback: {0}")]
    Registration(UsbError),
}

pub struct HotplugWatcher {
    filter: DeviceFilter,
    registration: Option<Box<dyn HotplugRegistration>>,
}

impl HotplugWatcher {
    pub fn register(
        backend: &mut dyn UsbBackend,
        filter: DeviceFilter,
        sink: NotificationSink,
    ) -> Result<Self, WatcherError> {
        if !backend.has_hotplug() {
            return Err(WatcherError::HotplugUnsupported);
        }

        let registration = backend
            .register_hotplug(filter, sink)
            .map_err(WatcherError::Registration)?;
        info!("Watching for hotplug events of {}", filter);

        Ok(Self {
            filter,
            registration: Some(registration),
        })
    }

    pub fn filter(&self) -> DeviceFilter {
        self.filter
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Maps a raw notice to an event, ignoring other devices
    pub fn translate(&self, notice: HotplugNotice) -> Option<Event> {
        if !self.filter.matches(notice.vendor_id, notice.product_id) {
            debug!(
                "Ignoring hotplug notice for {:04x}:{:04x}",
                notice.vendor_id, notice.product_id
            );
            return None;
        }
        match notice.kind {
            HotplugKind::Arrived => Some(Event::DeviceArrived),
            HotplugKind::Left => Some(Event::DeviceLeft),
        }
    }

    /// Idempotent
    pub fn deregister(&mut self) {
        if let Some(mut registration) = self.registration.take() {
            registration.deregister();
            info!("Hotplug watcher for {} deregistered", self.filter);
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::MockBackend;
    use crate::usb::notification_queue;

    const PAD: DeviceFilter = DeviceFilter {
        vendor_id: 0x045e,
        product_id: 0x02ea,
    };

    fn notice(kind: HotplugKind, vendor_id: u16, product_id: u16) -> HotplugNotice {
        HotplugNotice {
            kind,
            vendor_id,
            product_id,
        }
    }

    #[test]
    fn unsupported_platform_is_fatal() {
        let (backend, log) = MockBackend::detached();
        let mut backend = backend.without_hotplug();
        let (sink, _queue) = notification_queue();

        let result = HotplugWatcher::register(&mut backend, PAD, sink);
        assert!(matches!(result, Err(WatcherError::HotplugUnsupported)));
        assert_eq!(log.lock().expect("log").registrations, 0);
    }

    #[test]
    fn registration_failure_is_reported() {
        let (backend, _log) = MockBackend::detached();
        let mut backend = backend.with_registration_error(UsbError::NotSupported);
        let (sink, _queue) = notification_queue();

        let result = HotplugWatcher::register(&mut backend, PAD, sink);
        assert!(matches!(
            result,
            Err(WatcherError::Registration(UsbError::NotSupported))
        ));
    }

    #[test]
    fn translates_only_matching_devices() {
        let (mut backend, _log) = MockBackend::detached();
        let (sink, _queue) = notification_queue();
        let watcher = HotplugWatcher::register(&mut backend, PAD, sink).expect("register");

        assert_eq!(
            watcher.translate(notice(HotplugKind::Arrived, 0x045e, 0x02ea)),
            Some(Event::DeviceArrived)
        );
        assert_eq!(
            watcher.translate(notice(HotplugKind::Left, 0x045e, 0x02ea)),
            Some(Event::DeviceLeft)
        );
        assert_eq!(
            watcher.translate(notice(HotplugKind::Arrived, 0x046d, 0xc52b)),
            None
        );
    }

    #[test]
    fn deregister_is_idempotent() {
        let (mut backend, log) = MockBackend::detached();
        let (sink, _queue) = notification_queue();
        let mut watcher = HotplugWatcher::register(&mut backend, PAD, sink).expect("register");

        watcher.deregister();
        watcher.deregister();
        assert!(!watcher.is_registered());
        drop(watcher);

        assert_eq!(log.lock().expect("log").deregistrations, 1);
    }
}
