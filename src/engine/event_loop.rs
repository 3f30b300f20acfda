//! Root event loop with statum lifecycle
//!
//! # State Machine
//!
//! ```text
//! Initializing ──start──► Running ──run──► Stopping ──teardown──► Stopped
//!      │
//!      └── SetupError (no hotplug, registration failed)
//! ```
//!
//! While `Running` the loop tracks whether a configured device is online:
//!
//! ```text
//! NoDevice ──DeviceArrived──► Ready ──DeviceLeft──► NoDevice
//! ```
//!
//! Only `Quit` and `ButtonXPressed` end the loop. Every failure inside a
//! transition is logged and the loop keeps going.

use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use serde::Serialize;
use statum::{machine, state};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{LinkError, SetupError};
use super::event::Event;
use crate::config::Settings;
use crate::usb::{
    notification_queue, DeviceSession, HotplugWatcher, Notification, NotificationQueue,
    NotificationSink, SessionState, TransferCycle, TransferId, UsbBackend,
};

#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Initializing, // Queue and session created, nothing registered
    Running,      // Watcher registered, dispatching events
    Stopping,     // Loop left, resources still held
    Stopped,      // Everything released
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    NoDevice,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    /// Interrupt signal or a cancelled read
    Quit,
    ButtonX,
}

/// Counters kept while the loop runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub events: u64,
    pub sessions_opened: u64,
    pub rumbles: u64,
    pub resubmissions: u64,
    pub failures_recovered: u64,
}

/// Outcome of one run, logged as TOML when the binary exits
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub exit_reason: ExitReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    // tables go after plain values in TOML
    pub stats: LoopStats,
}

impl RunSummary {
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}

#[machine]
pub struct EventLoop<S: EngineState> {
    backend: Box<dyn UsbBackend>,
    settings: Settings,
    session: DeviceSession,
    cycle: TransferCycle,
    watcher: Option<HotplugWatcher>,
    link: LinkState,
    cancel: CancellationToken,
    queue: NotificationQueue,
    sink: NotificationSink,
    stats: LoopStats,
    exit_reason: Option<ExitReason>,
    started_at: DateTime<Utc>,
}

impl<S: EngineState> EventLoop<S> {
    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }
}

impl EventLoop<Initializing> {
    pub fn create(
        backend: Box<dyn UsbBackend>,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Self {
        let (sink, queue) = notification_queue();
        let session = DeviceSession::closed(settings.device.clone());
        let cycle = TransferCycle::new(sink.clone());

        Self::new(
            backend,
            settings,
            session,
            cycle,
            None, // watcher
            LinkState::NoDevice,
            cancel,
            queue,
            sink,
            LoopStats::default(),
            None, // exit_reason
            Utc::now(),
        )
    }

    /// Registers the hotplug watcher. Devices already attached are reported
    /// through the queue as arrivals when enumeration is enabled.
    pub fn start(mut self) -> Result<EventLoop<Running>, SetupError> {
        info!("Using {}", self.backend.library_version());

        let filter = self.settings.device.filter();
        let watcher = HotplugWatcher::register(self.backend.as_mut(), filter, self.sink.clone())?;
        self.watcher = Some(watcher);

        info!("Event loop started, waiting for {}", filter);
        Ok(self.transition())
    }
}

impl EventLoop<Running> {
    /// Dispatches events until a terminal one arrives
    pub async fn run(mut self) -> EventLoop<Stopping> {
        let reason = loop {
            let event = self.next_event().await;
            self.stats.events += 1;
            debug!("Event: {}", event.name());

            if let ControlFlow::Break(reason) = self.dispatch(event) {
                break reason;
            }
        };

        info!("Event loop finished: {:?}", reason);
        self.exit_reason = Some(reason);
        self.transition()
    }

    /// Blocks until the next event.
    ///
    /// Queued notifications always win over the cancellation token. Once
    /// the token fires with a read in flight, the read is cancelled once and
    /// the resulting completion is awaited; with no read in flight the token
    /// yields `Quit` directly.
    async fn next_event(&mut self) -> Event {
        loop {
            let watch_token = !(self.cycle.is_submitted() && self.cycle.cancel_requested());

            tokio::select! {
                biased;

                notification = self.queue.recv() => match notification {
                    Some(Notification::Hotplug(notice)) => {
                        let event = self.watcher.as_ref().and_then(|w| w.translate(notice));
                        if let Some(event) = event {
                            return event;
                        }
                    }
                    Some(Notification::Transfer { id, outcome }) => {
                        if let Some(event) = self.cycle.complete(id, outcome) {
                            return event;
                        }
                    }
                    None => {
                        warn!("Notification queue closed");
                        return Event::Quit;
                    }
                },

                _ = self.cancel.cancelled(), if watch_token => {
                    if self.cycle.is_submitted() {
                        info!("Interrupt received, cancelling pending read");
                        self.cycle.cancel();
                    } else {
                        info!("Interrupt received");
                        return Event::Quit;
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, event: Event) -> ControlFlow<ExitReason> {
        match event {
            Event::Quit => return ControlFlow::Break(ExitReason::Quit),
            Event::ButtonXPressed(report) => {
                info!("Button X pressed, stopping");
                debug!("Report: {:?}", report);
                return ControlFlow::Break(ExitReason::ButtonX);
            }
            Event::DeviceArrived => self.on_device_arrived(),
            Event::DeviceLeft => self.on_device_left(),
            Event::TransferCompleted(_) => self.resubmit(),
            Event::ButtonAPressed(_) => {
                let rumble = &self.settings.rumble;
                match self.session.send_rumble(rumble.left, rumble.right) {
                    Ok(()) => {
                        info!("Button A pressed, rumble sent");
                        self.stats.rumbles += 1;
                    }
                    Err(e) => warn!("Failed to send rumble: {}", e),
                }
                self.resubmit();
            }
            Event::TransferFailed(e) if e.is_disconnect() => {
                // every further read would fail the same way until DeviceLeft
                info!("Read failed ({}), waiting for the device to leave", e);
            }
            Event::TransferFailed(e) => {
                warn!("Read failed ({}), resubmitting", e);
                self.stats.failures_recovered += 1;
                self.resubmit();
            }
        }
        ControlFlow::Continue(())
    }

    fn on_device_arrived(&mut self) {
        if self.link == LinkState::Ready {
            debug!("Device already online, ignoring arrival");
            return;
        }

        match self.bring_up() {
            Ok(id) => {
                self.link = LinkState::Ready;
                self.stats.sessions_opened += 1;
                info!("Device ready, first read {}", id);
            }
            Err(e) => {
                warn!("Device arrived but could not be set up: {}", e);
                self.cycle.abandon();
                self.session.close();
                self.link = LinkState::NoDevice;
            }
        }
    }

    fn bring_up(&mut self) -> Result<TransferId, LinkError> {
        self.session.open(self.backend.as_mut())?;
        self.session.claim_interface()?;
        self.session.configure()?;
        Ok(self.cycle.submit(&mut self.session)?)
    }

    fn on_device_left(&mut self) {
        if self.link == LinkState::NoDevice && !self.session.is_open() {
            debug!("Device left while offline, ignoring");
            return;
        }

        if let Some(id) = self.cycle.abandon() {
            info!("Device left with read {} pending", id);
        }
        self.session.close();
        self.link = LinkState::NoDevice;
        info!("Device left, waiting for it to come back");
    }

    fn resubmit(&mut self) {
        if self.link != LinkState::Ready {
            debug!("No device online, not resubmitting");
            return;
        }
        match self.cycle.submit(&mut self.session) {
            Ok(_) => self.stats.resubmissions += 1,
            Err(e) => warn!("Failed to resubmit read: {}", e),
        }
    }
}

impl EventLoop<Stopping> {
    /// Releases everything held by the loop; each step is a no-op when
    /// there is nothing to release
    pub fn teardown(mut self) -> EventLoop<Stopped> {
        if let Some(id) = self.cycle.abandon() {
            debug!("Abandoning read {} on shutdown", id);
        }
        self.session.close();
        self.link = LinkState::NoDevice;
        if let Some(mut watcher) = self.watcher.take() {
            watcher.deregister();
        }

        info!("Event loop stopped");
        self.transition()
    }
}

impl EventLoop<Stopped> {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            exit_reason: self.exit_reason.unwrap_or(ExitReason::Quit),
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats: self.stats,
        }
    }
}

/// Runs the whole lifecycle on `backend` until a terminal event
pub async fn run_engine(
    backend: Box<dyn UsbBackend>,
    settings: Settings,
    cancel: CancellationToken,
) -> Result<RunSummary, SetupError> {
    let running = EventLoop::create(backend, settings, cancel).start()?;
    let stopped = running.run().await.teardown();
    Ok(stopped.summary())
}
