// Feetech STS serial protocol, the subset the wheel servos need
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Length counts instruction/status byte + params + checksum.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Servo resolution: one revolution of the output shaft
pub const STEPS_PER_REVOLUTION: i32 = 4096;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// STS3215 control table entries used by the wheels
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    OperatingMode = 33,   // 1 byte
    TorqueEnable = 40,    // 1 byte
    Acceleration = 41,    // 1 byte
    GoalPosition = 42,    // 2 bytes, relative steps in step mode
    GoalVelocity = 46,    // 2 bytes, signed; running speed in step mode
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, 0..4095
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
    /// Relative moves: a goal position write is a signed step increment
    Step = 3,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Motor {id} returned error status: 0x{status:02X}")]
    MotorError { id: u8, status: u8 },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

/// Servo bus over any byte transport (a serial port in production)
pub struct FeetechBus<P = Box<dyn SerialPort>> {
    port: P,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port })
    }
}

impl<P: Read + Write> FeetechBus<P> {
    pub fn with_port(port: P) -> Self {
        Self { port }
    }

    fn transmit(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<()> {
        let packet = encode_packet(id, instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one status packet from `id` and return its parameters
    fn receive(&mut self, id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::UnexpectedEof => {
                FeetechError::Timeout { id }
            }
            _ => FeetechError::Io(e),
        })?;

        if head[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Invalid header: {:02X?}", &head[..2]),
            });
        }
        if head[2] != id {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("ID mismatch: got {}", head[2]),
            });
        }

        let length = head[3] as usize;
        if length < 2 {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // status + params + checksum
        let mut body = vec![0u8; length];
        self.port.read_exact(&mut body)?;

        let (checksum, payload) = body.split_last().ok_or(FeetechError::InvalidResponse {
            id,
            reason: "Empty body".to_string(),
        })?;
        let expected = checksum_of(head[2..].iter().chain(payload.iter()).copied());
        if expected != *checksum {
            return Err(FeetechError::ChecksumMismatch { id });
        }

        let status = payload[0];
        if status != 0 {
            return Err(FeetechError::MotorError { id, status });
        }
        Ok(payload[1..].to_vec())
    }

    /// `Ok(false)` when the servo stays silent
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        self.transmit(id, Instruction::Ping, &[])?;
        match self.receive(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to motor {}: reg={:?}, value={}", id, register, value);
        self.transmit(id, Instruction::Write, &[register as u8, value])?;
        self.receive(id).map(|_| ())
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        debug!("Write u16 to motor {}: reg={:?}, value={}", id, register, value);
        let [lo, hi] = value.to_le_bytes();
        self.transmit(id, Instruction::Write, &[register as u8, lo, hi])?;
        self.receive(id).map(|_| ())
    }

    pub fn write_i16(&mut self, id: u8, register: Register, value: i16) -> Result<()> {
        self.write_u16(id, register, encode_sign_magnitude(value))
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        self.transmit(id, Instruction::Read, &[register as u8, 2])?;
        let data = self.receive(id)?;
        match data.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("Expected 2 bytes, got {}", data.len()),
            }),
        }
    }

    pub fn enable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 1)?;
        self.write_u8(id, Register::Lock, 1)
    }

    pub fn disable_torque(&mut self, id: u8) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, 0)?;
        self.write_u8(id, Register::Lock, 0)
    }

    /// Switch mode; torque has to be off while the mode register changes
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.disable_torque(id)?;
        self.write_u8(id, Register::OperatingMode, mode as u8)?;
        self.enable_torque(id)
    }

    pub fn set_velocity(&mut self, id: u8, velocity: i16) -> Result<()> {
        self.write_i16(id, Register::GoalVelocity, velocity)
    }

    /// Relative move in step mode
    pub fn step(&mut self, id: u8, steps: i16) -> Result<()> {
        self.write_i16(id, Register::GoalPosition, steps)
    }

    /// Absolute shaft position within one revolution
    pub fn present_position(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }
}

fn checksum_of(bytes: impl Iterator<Item = u8>) -> u8 {
    let sum = bytes.fold(0u8, |acc, b| acc.wrapping_add(b));
    !sum
}

fn encode_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    packet.push(checksum_of(packet[2..].iter().copied()));
    packet
}

/// Bit 15 = sign (1 = negative), bits 0-14 = magnitude
fn encode_sign_magnitude(value: i16) -> u16 {
    let magnitude = value.unsigned_abs().min(0x7FFF);
    if value < 0 { 0x8000 | magnitude } else { magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Byte transport that records writes and replays canned replies
    #[derive(Default)]
    struct LoopbackPort {
        written: Vec<u8>,
        replies: VecDeque<u8>,
    }

    impl LoopbackPort {
        fn reply(&mut self, id: u8, status: u8, params: &[u8]) {
            let mut packet = vec![0xFF, 0xFF, id, (params.len() + 2) as u8, status];
            packet.extend_from_slice(params);
            packet.push(checksum_of(packet[2..].iter().copied()));
            self.replies.extend(packet);
        }
    }

    impl Read for LoopbackPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.replies.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
            }
            let n = buf.len().min(self.replies.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.replies.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for LoopbackPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let checksum = checksum_of([1u8, 4, 0x03, 30, 0, 2].into_iter());
        assert_eq!(checksum, 215);
    }

    #[test]
    fn test_sign_magnitude_encoding() {
        assert_eq!(encode_sign_magnitude(0), 0);
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(i16::MIN), 0xFFFF);
    }

    #[test]
    fn test_ping_packet() {
        let packet = encode_packet(1, Instruction::Ping, &[]);
        assert_eq!(packet, vec![0xFF, 0xFF, 1, 2, 0x01, !4u8]);
    }

    #[test]
    fn test_ping_silent_servo() {
        let mut bus = FeetechBus::with_port(LoopbackPort::default());
        assert!(!bus.ping(3).unwrap());
    }

    #[test]
    fn test_read_present_position() {
        let mut port = LoopbackPort::default();
        port.reply(2, 0, &0x0123u16.to_le_bytes());
        let mut bus = FeetechBus::with_port(port);

        assert_eq!(bus.present_position(2).unwrap(), 0x0123);
        assert_eq!(bus.port.written, encode_packet(2, Instruction::Read, &[56, 2]));
    }

    #[test]
    fn test_status_error_is_reported() {
        let mut port = LoopbackPort::default();
        port.reply(1, 0x20, &[]);
        let mut bus = FeetechBus::with_port(port);

        let err = bus.write_u8(1, Register::TorqueEnable, 1).unwrap_err();
        assert!(matches!(err, FeetechError::MotorError { id: 1, status: 0x20 }));
    }

    #[test]
    fn test_corrupted_reply_fails_checksum() {
        let mut port = LoopbackPort::default();
        port.reply(1, 0, &[0x10, 0x00]);
        *port.replies.back_mut().unwrap() ^= 0xFF;
        let mut bus = FeetechBus::with_port(port);

        assert!(matches!(
            bus.read_u16(1, Register::PresentPosition),
            Err(FeetechError::ChecksumMismatch { id: 1 })
        ));
    }
}
