// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

// Command from teleop/scripts -> runtime
// Numbers stay f64 on the wire so non-integer input reaches validation instead of failing to parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum MotionCommand {
    Forward { distance: f64 },
    Backward { distance: f64 },
    Left { angle: f64 },
    Right { angle: f64 },
    Stop,
    Reset,
}

/// Wheel positions (servo steps) and heading (degrees), read live
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RobotState {
    pub right_motor: i32,
    pub left_motor: i32,
    pub angle: f64,
}

/// IMU -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GyroSample {
    pub angle: f64,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Idle,
    Moving,
    Fault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: MotionCommand = serde_json::from_str(r#"{"cmd":"right","angle":90}"#).unwrap();
        assert_eq!(cmd, MotionCommand::Right { angle: 90.0 });

        let stop: MotionCommand = serde_json::from_str(r#"{"cmd":"stop"}"#).unwrap();
        assert_eq!(stop, MotionCommand::Stop);
    }

    #[test]
    fn test_fractional_distance_parses() {
        let cmd: MotionCommand =
            serde_json::from_str(r#"{"cmd":"forward","distance":12.5}"#).unwrap();
        assert_eq!(cmd, MotionCommand::Forward { distance: 12.5 });
    }

    #[test]
    fn test_state_field_names() {
        let json = serde_json::to_value(RobotState {
            right_motor: 3,
            left_motor: -4,
            angle: 1.5,
        })
        .unwrap();
        assert_eq!(json["right_motor"], 3);
        assert_eq!(json["left_motor"], -4);
        assert_eq!(json["angle"], 1.5);
    }
}
