//! Decoding of the 18-byte gamepad input report
//!
//! The controller streams several packet types over the same interrupt-IN
//! endpoint. Only packets that are exactly [`INPUT_REPORT_LEN`] bytes long
//! and start with [`GAMEPAD_REPORT_TYPE`] carry button and axis state; every
//! other packet is passed through unrecognized.
//!
//! # Layout
//!
//! ```text
//! byte  0      report type (0x20)
//! byte  1      constant 0x00
//! byte  2      sequence counter
//! byte  3      payload length (0x0E)
//! byte  4      bit0 sync, bit2 menu, bit3 view, bit4 A, bit5 B, bit6 X, bit7 Y
//! byte  5      bit0..3 d-pad up/down/left/right, bit4 LB, bit5 RB,
//!              bit6 left stick click, bit7 right stick click
//! byte  6      left trigger
//! byte  7      reserved
//! byte  8      right trigger
//! byte  9      reserved
//! bytes 10..18 left x, left y, right x, right y (i16, little-endian)
//! ```

/// Exact length of a gamepad input report
pub const INPUT_REPORT_LEN: usize = 18;

/// Value of byte 0 identifying a gamepad input report
pub const GAMEPAD_REPORT_TYPE: u8 = 0x20;

const BUTTONS_LOW: usize = 4;
const BUTTONS_HIGH: usize = 5;
const LEFT_TRIGGER: usize = 6;
const RIGHT_TRIGGER: usize = 8;
const LEFT_STICK_X: usize = 10;
const LEFT_STICK_Y: usize = 12;
const RIGHT_STICK_X: usize = 14;
const RIGHT_STICK_Y: usize = 16;

// Button type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    Sync,
    Menu,
    View,
    LeftStick,
    RightStick,
    LeftBumper,
    RightBumper,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
}

impl ButtonType {
    pub const ALL: [ButtonType; 15] = [
        ButtonType::A,
        ButtonType::B,
        ButtonType::X,
        ButtonType::Y,
        ButtonType::Sync,
        ButtonType::Menu,
        ButtonType::View,
        ButtonType::LeftStick,
        ButtonType::RightStick,
        ButtonType::LeftBumper,
        ButtonType::RightBumper,
        ButtonType::DPadUp,
        ButtonType::DPadDown,
        ButtonType::DPadLeft,
        ButtonType::DPadRight,
    ];

    /// Byte offset and bit mask of this button inside an input report
    pub const fn location(self) -> (usize, u8) {
        match self {
            ButtonType::Sync => (BUTTONS_LOW, 0x01),
            ButtonType::Menu => (BUTTONS_LOW, 0x04),
            ButtonType::View => (BUTTONS_LOW, 0x08),
            ButtonType::A => (BUTTONS_LOW, 0x10),
            ButtonType::B => (BUTTONS_LOW, 0x20),
            ButtonType::X => (BUTTONS_LOW, 0x40),
            ButtonType::Y => (BUTTONS_LOW, 0x80),
            ButtonType::DPadUp => (BUTTONS_HIGH, 0x01),
            ButtonType::DPadDown => (BUTTONS_HIGH, 0x02),
            ButtonType::DPadLeft => (BUTTONS_HIGH, 0x04),
            ButtonType::DPadRight => (BUTTONS_HIGH, 0x08),
            ButtonType::LeftBumper => (BUTTONS_HIGH, 0x10),
            ButtonType::RightBumper => (BUTTONS_HIGH, 0x20),
            ButtonType::LeftStick => (BUTTONS_HIGH, 0x40),
            ButtonType::RightStick => (BUTTONS_HIGH, 0x80),
        }
    }
}

/// Digital button flags of one input report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Buttons {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub sync: bool,
    pub menu: bool,
    pub view: bool,
    pub left_stick: bool,
    pub right_stick: bool,
    pub left_bumper: bool,
    pub right_bumper: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,
}

impl Buttons {
    pub fn is_pressed(&self, button: ButtonType) -> bool {
        match button {
            ButtonType::A => self.a,
            ButtonType::B => self.b,
            ButtonType::X => self.x,
            ButtonType::Y => self.y,
            ButtonType::Sync => self.sync,
            ButtonType::Menu => self.menu,
            ButtonType::View => self.view,
            ButtonType::LeftStick => self.left_stick,
            ButtonType::RightStick => self.right_stick,
            ButtonType::LeftBumper => self.left_bumper,
            ButtonType::RightBumper => self.right_bumper,
            ButtonType::DPadUp => self.dpad_up,
            ButtonType::DPadDown => self.dpad_down,
            ButtonType::DPadLeft => self.dpad_left,
            ButtonType::DPadRight => self.dpad_right,
        }
    }

    /// Iterates over every button that is currently held
    pub fn pressed(&self) -> impl Iterator<Item = ButtonType> + '_ {
        ButtonType::ALL
            .into_iter()
            .filter(move |button| self.is_pressed(*button))
    }
}

/// Decoded snapshot of one gamepad input report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputReport {
    pub report_type: u8,
    pub sequence: u8,
    pub payload_len: u8,
    pub buttons: Buttons,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_stick_x: i16,
    pub left_stick_y: i16,
    pub right_stick_x: i16,
    pub right_stick_y: i16,
}

impl InputReport {
    /// Decodes `buffer` if it is a gamepad input report.
    ///
    /// Returns `None` for any buffer whose length is not
    /// [`INPUT_REPORT_LEN`] or whose first byte is not
    /// [`GAMEPAD_REPORT_TYPE`]. Such packets are a normal part of the
    /// controller's stream and callers skip them.
    pub fn decode(buffer: &[u8]) -> Option<Self> {
        let data: &[u8; INPUT_REPORT_LEN] = buffer.try_into().ok()?;
        if data[0] != GAMEPAD_REPORT_TYPE {
            return None;
        }

        let bit = |button: ButtonType| {
            let (offset, mask) = button.location();
            data[offset] & mask != 0
        };
        let axis = |offset: usize| i16::from_le_bytes([data[offset], data[offset + 1]]);

        let buttons = Buttons {
            a: bit(ButtonType::A),
            b: bit(ButtonType::B),
            x: bit(ButtonType::X),
            y: bit(ButtonType::Y),
            sync: bit(ButtonType::Sync),
            menu: bit(ButtonType::Menu),
            view: bit(ButtonType::View),
            left_stick: bit(ButtonType::LeftStick),
            right_stick: bit(ButtonType::RightStick),
            left_bumper: bit(ButtonType::LeftBumper),
            right_bumper: bit(ButtonType::RightBumper),
            dpad_up: bit(ButtonType::DPadUp),
            dpad_down: bit(ButtonType::DPadDown),
            dpad_left: bit(ButtonType::DPadLeft),
            dpad_right: bit(ButtonType::DPadRight),
        };

        Some(Self {
            report_type: data[0],
            sequence: data[2],
            payload_len: data[3],
            buttons,
            left_trigger: data[LEFT_TRIGGER],
            right_trigger: data[RIGHT_TRIGGER],
            left_stick_x: axis(LEFT_STICK_X),
            left_stick_y: axis(LEFT_STICK_Y),
            right_stick_x: axis(RIGHT_STICK_X),
            right_stick_y: axis(RIGHT_STICK_Y),
        })
    }
}

/// Free-function form of [`InputReport::decode`]
pub fn decode(buffer: &[u8]) -> Option<InputReport> {
    InputReport::decode(buffer)
}
