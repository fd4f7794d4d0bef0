// Wheel actuators for the differential base
//
// Provides:
// - The MotorActuator interface the controller and facade drive
// - Feetech STS serial protocol implementation
// - A bus-backed wheel (one servo on a shared bus)

pub mod feetech;
mod wheel;

pub use feetech::{FeetechBus, FeetechError};
pub use wheel::{BusWheel, SharedBus, shared_bus};

use crate::error::HardwareError;

/// One velocity/position-controlled wheel.
///
/// Speeds and positions are in robot units: speed is whatever the wheel maps
/// `base_speed` to, positions are servo steps (4096 per revolution).
pub trait MotorActuator {
    /// Store the signed speed setpoint; applied immediately while running continuously
    fn set_velocity(&mut self, speed: i32) -> Result<(), HardwareError>;

    /// Spin at the current setpoint until stopped
    fn run_continuous(&mut self) -> Result<(), HardwareError>;

    /// Move by `delta` steps at `speed`, then hold
    fn run_to_relative_position(&mut self, delta: i32, speed: i32) -> Result<(), HardwareError>;

    fn stop(&mut self) -> Result<(), HardwareError>;

    fn current_position(&mut self) -> Result<i32, HardwareError>;

    /// Stop and zero the position counter
    fn reset(&mut self) -> Result<(), HardwareError>;
}
