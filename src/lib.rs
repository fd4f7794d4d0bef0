// Runtime for a two-wheeled differential robot: gyro-feedback turns,
// position-controlled straight moves, zenoh command/state surface

pub mod config;
pub mod control;
pub mod error;
pub mod gyro;
pub mod hardware;
pub mod messages;
pub mod motor;
pub mod robot;
pub mod runtime;
pub mod sim;
pub mod validate;

pub use error::{HardwareError, RobotError, ValidationError};
pub use robot::Robot;
