//! Hotplug-aware driver loop for a USB gamepad
//!
//! Waits for the controller to appear, switches on input reporting and
//! keeps one interrupt read in flight. Button A makes the pad rumble,
//! button X or an interrupt signal ends the run.

pub mod config;
pub mod engine;
pub mod report;
pub mod usb;
