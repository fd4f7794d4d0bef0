// Wiring for the real robot: two Feetech wheel servos and a zenoh-fed gyro

use std::time::Duration;
use tracing::{info, warn};
use zenoh::Session;

use crate::config::{RobotConfig, TOPIC_IMU_GYRO};
use crate::error::{HardwareError, RobotError};
use crate::gyro::ZenohGyro;
use crate::motor::{BusWheel, FeetechBus, shared_bus};
use crate::robot::Robot;

pub type HardwareRobot = Robot<BusWheel, ZenohGyro>;

/// Connect every device, failing with `Unavailable` on the first one that does not answer
pub async fn connect(config: &RobotConfig, session: &Session) -> Result<HardwareRobot, RobotError> {
    let hw = &config.hardware;

    info!("Opening motor bus on {}", hw.port);
    let bus = match FeetechBus::open(&hw.port) {
        Ok(bus) => shared_bus(bus),
        Err(e) => {
            warn!("Cannot open {}: {}", hw.port, e);
            return Err(HardwareError::Unavailable { device: "motor bus" }.into());
        }
    };

    let left = BusWheel::connect(
        bus.clone(),
        hw.left_id,
        "left motor",
        hw.left_inverted,
        hw.speed_scale,
    )?;
    let right = BusWheel::connect(
        bus,
        hw.right_id,
        "right motor",
        hw.right_inverted,
        hw.speed_scale,
    )?;

    let gyro = ZenohGyro::connect(
        session,
        TOPIC_IMU_GYRO,
        Duration::from_millis(hw.gyro_connect_timeout_ms),
        Duration::from_millis(hw.gyro_stale_after_ms),
    )
    .await?;

    info!("All devices connected");
    Ok(Robot::new(left, right, gyro, config.clone()))
}
