// Heading source for closed-loop rotations

mod zenoh_gyro;

pub use zenoh_gyro::ZenohGyro;

use crate::error::HardwareError;

/// Continuous heading in degrees, positive clockwise.
///
/// The reading is integrated by the device and never wrapped, so 370° and
/// 10° are different headings. It drifts over long runs.
pub trait AngleSensor {
    fn current_angle(&mut self) -> Result<f64, HardwareError>;

    /// Re-zero the heading at the current orientation
    fn reset(&mut self) -> Result<(), HardwareError>;
}
