// Gyro-feedback turning for the differential base

mod direction;
mod rotation;

pub use direction::Direction;
pub use rotation::{CancelToken, MotionGuard, RotationController, RotationReport, WheelSpeeds};
pub(crate) use rotation::stop_both;
