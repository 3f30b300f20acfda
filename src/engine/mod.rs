//! Event dispatch
//!
//! [`event_loop`] owns the device session, the transfer cycle and the
//! hotplug watcher, and drives them from one ordered notification queue.
//! [`shutdown`] turns process signals into cancellation of that loop.

pub mod error;
pub mod event;
pub mod event_loop;
pub mod shutdown;

pub use error::{LinkError, SetupError};
pub use event::Event;
pub use event_loop::{run_engine, EventLoop, ExitReason, LinkState, LoopStats, RunSummary};
pub use shutdown::spawn_signal_listener;
