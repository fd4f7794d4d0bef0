// Topics, bounds, and tunable robot parameters
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Runtime loop frequency (state/health publishing)
pub const LOOP_HZ: u64 = 20;

// Zenoh topics
pub const TOPIC_CMD_MOTION: &str = "diffbot/cmd/motion"; // commands
pub const TOPIC_STATE_BASE: &str = "diffbot/state/base"; // wheel positions + angle
pub const TOPIC_HEALTH: &str = "diffbot/state/health"; // health status
pub const TOPIC_IMU_GYRO: &str = "diffbot/imu/gyro"; // gyro samples

// Serial port for the Feetech wheel servos
pub const MOTOR_PORT: &str = "/dev/ttyUSB0";

// Servo IDs as configured in the motors
pub const MOTOR_ID_LEFT: u8 = 1;
pub const MOTOR_ID_RIGHT: u8 = 2;

// Input bounds for the motion commands
pub const MIN_DIST: i64 = 0;
pub const MAX_DIST: i64 = 5000;
pub const MIN_ANGLE: i64 = 0;
pub const MAX_ANGLE: i64 = 360;

/// Tunable parameters of the robot and its rotation controller.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RobotConfig {
    /// Wheel speed for straight moves; rotations start at half of it
    pub base_speed: i32,
    /// Below or at this magnitude the rotation stops slowing down
    pub min_rotation_speed: i32,
    /// Fraction of the remaining arc covered before each slowdown step
    pub slowdown_fraction: f64,
    pub left_slowdown: f64,
    pub right_slowdown: f64,
    /// Sleep between two gyro reads while waiting for a target
    pub poll_interval_ms: u64,
    /// Abort a rotation that has not converged after this long (None = never)
    pub rotation_timeout_ms: Option<u64>,
    pub hardware: HardwareConfig,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            base_speed: 100,
            min_rotation_speed: 5,
            slowdown_fraction: 2.0 / 3.0,
            left_slowdown: 0.5,
            right_slowdown: 0.5,
            poll_interval_ms: 10,
            rotation_timeout_ms: Some(30_000),
            hardware: HardwareConfig::default(),
        }
    }
}

impl RobotConfig {
    /// Load a JSON config file, falling back to defaults for missing fields
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.check()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rotation_timeout(&self) -> Option<Duration> {
        self.rotation_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values that would make the rotation loop diverge or never slow down
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.base_speed <= 0 {
            return Err(ConfigError::Invalid("base_speed must be positive".into()));
        }
        if self.min_rotation_speed < 0 {
            return Err(ConfigError::Invalid(
                "min_rotation_speed must not be negative".into(),
            ));
        }
        if !(self.slowdown_fraction > 0.0 && self.slowdown_fraction <= 1.0) {
            return Err(ConfigError::Invalid(
                "slowdown_fraction must be in (0, 1]".into(),
            ));
        }
        for (name, factor) in [
            ("left_slowdown", self.left_slowdown),
            ("right_slowdown", self.right_slowdown),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1)")));
            }
        }
        Ok(())
    }
}

/// Serial bus and servo wiring
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HardwareConfig {
    pub port: String,
    pub left_id: u8,
    pub right_id: u8,
    // The wheels are mirrored on the chassis, so one of them usually runs inverted
    pub left_inverted: bool,
    pub right_inverted: bool,
    /// Raw servo velocity units per unit of robot speed
    pub speed_scale: i32,
    /// How long to wait for the first gyro sample at startup
    pub gyro_connect_timeout_ms: u64,
    /// Gyro readings older than this count as a dropped-out sensor
    pub gyro_stale_after_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            left_id: MOTOR_ID_LEFT,
            right_id: MOTOR_ID_RIGHT,
            left_inverted: false,
            right_inverted: true,
            speed_scale: 10,
            gyro_connect_timeout_ms: 2000,
            gyro_stale_after_ms: 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RobotConfig::default();
        assert_eq!(config.base_speed, 100);
        assert_eq!(config.min_rotation_speed, 5);
        assert!((config.slowdown_fraction - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(config.left_slowdown, 0.5);
        assert_eq!(config.right_slowdown, 0.5);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RobotConfig =
            serde_json::from_str(r#"{"base_speed": 200, "hardware": {"port": "/dev/ttyACM0"}}"#)
                .unwrap();
        assert_eq!(config.base_speed, 200);
        assert_eq!(config.min_rotation_speed, 5);
        assert_eq!(config.hardware.port, "/dev/ttyACM0");
        assert_eq!(config.hardware.left_id, MOTOR_ID_LEFT);
    }

    #[test]
    fn test_rejects_non_decaying_slowdown() {
        let config = RobotConfig {
            right_slowdown: 1.0,
            ..RobotConfig::default()
        };
        assert!(matches!(config.check(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_timeout_can_be_disabled() {
        let config: RobotConfig = serde_json::from_str(r#"{"rotation_timeout_ms": null}"#).unwrap();
        assert_eq!(config.rotation_timeout(), None);
    }
}
