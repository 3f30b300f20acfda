//! Report codec for the controller's interrupt endpoints
//!
//! Pure byte-level conversions, no I/O:
//!
//! 1. [`input_report`] - 18-byte gamepad input report to [`InputReport`]
//! 2. [`command`] - rumble and start-up packets sent to the controller

pub mod command;
pub mod input_report;

pub use command::{encode_rumble, RumbleCommand, INIT_COMMAND, RUMBLE_COMMAND_LEN};
pub use input_report::{
    decode, ButtonType, Buttons, InputReport, GAMEPAD_REPORT_TYPE, INPUT_REPORT_LEN,
};
