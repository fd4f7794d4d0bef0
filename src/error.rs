// Error types shared by the robot facade, the controller and the device adapters

use std::time::Duration;

use crate::motor::FeetechError;

/// An argument rejected before any hardware call was made
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{name} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: i64,
        max: i64,
    },

    #[error("{name} must be an integer, got {value}")]
    NotInteger { name: &'static str, value: f64 },
}

/// Failure talking to a motor or the gyro
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("{device} is not connected")]
    Unavailable { device: &'static str },

    #[error("Motor bus error: {0}")]
    Bus(#[from] FeetechError),

    #[error("Gyro error: {0}")]
    Sensor(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error("Invalid argument: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("Rotation to {target:.1}° timed out after {elapsed:?} at {angle:.1}°")]
    RotationTimeout {
        target: f64,
        angle: f64,
        elapsed: Duration,
    },

    #[error("Rotation cancelled at {angle:.1}°")]
    Cancelled { angle: f64 },
}

impl RobotError {
    pub fn is_validation(&self) -> bool {
        matches!(self, RobotError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, RobotError>;
