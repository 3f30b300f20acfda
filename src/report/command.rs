//! Outbound interrupt-OUT packets: rumble and controller start-up

/// Length of an encoded rumble command
pub const RUMBLE_COMMAND_LEN: usize = 13;

/// Packet that switches the controller into input-reporting mode.
/// Sent once after the interface has been claimed.
pub const INIT_COMMAND: [u8; 5] = [0x05, 0x20, 0x00, 0x01, 0x00];

const LEFT_MOTOR: usize = 8;
const RIGHT_MOTOR: usize = 9;

const RUMBLE_TEMPLATE: [u8; RUMBLE_COMMAND_LEN] = [
    0x09, // activate rumble
    0x00,
    0x00,
    0x09, // length
    0x00,
    0x0F,
    0x00,
    0x00,
    0x00, // low-frequency motor
    0x00, // high-frequency motor
    0x10, // on period
    0x00, // off period
    0x01, // repeat count
];

/// Rumble request with the two motor intensities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RumbleCommand {
    /// Low-frequency motor
    pub left: u8,
    /// High-frequency motor
    pub right: u8,
}

impl RumbleCommand {
    pub fn new(left: u8, right: u8) -> Self {
        Self { left, right }
    }

    pub fn encode(&self) -> [u8; RUMBLE_COMMAND_LEN] {
        let mut packet = RUMBLE_TEMPLATE;
        packet[LEFT_MOTOR] = self.left;
        packet[RIGHT_MOTOR] = self.right;
        packet
    }
}

pub fn encode_rumble(left: u8, right: u8) -> [u8; RUMBLE_COMMAND_LEN] {
    RumbleCommand::new(left, right).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motors_land_on_bytes_eight_and_nine() {
        for (left, right) in [(0x00, 0x00), (0x20, 0x20), (0xFF, 0x01), (0x7A, 0xC3)] {
            let packet = encode_rumble(left, right);
            assert_eq!(packet.len(), RUMBLE_COMMAND_LEN);
            assert_eq!(packet[8], left);
            assert_eq!(packet[9], right);

            for (index, byte) in packet.iter().enumerate() {
                if index != 8 && index != 9 {
                    assert_eq!(*byte, RUMBLE_TEMPLATE[index], "byte {index} changed");
                }
            }
        }
    }

    #[test]
    fn template_constants() {
        assert_eq!(
            encode_rumble(0x20, 0x20),
            [0x09, 0x00, 0x00, 0x09, 0x00, 0x0F, 0x00, 0x00, 0x20, 0x20, 0x10, 0x00, 0x01]
        );
    }

    #[test]
    fn init_command_bytes() {
        assert_eq!(INIT_COMMAND, [0x05, 0x20, 0x00, 0x01, 0x00]);
    }
}
