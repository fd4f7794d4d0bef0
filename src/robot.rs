// Robot facade: two wheels and a gyro behind one lock
//
// Every public operation validates its arguments first, then takes the
// hardware lock, so motion commands never interleave.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::RobotConfig;
use crate::control::{
    CancelToken, Direction, MotionGuard, RotationController, RotationReport, stop_both,
};
use crate::error::Result;
use crate::gyro::AngleSensor;
use crate::messages::{MotionCommand, RobotState};
use crate::motor::MotorActuator;
use crate::validate;

struct Hardware<M, S> {
    left: M,
    right: M,
    sensor: S,
}

pub struct Robot<M, S> {
    hardware: Mutex<Hardware<M, S>>,
    config: RobotConfig,
    cancel: CancelToken,
}

impl<M: MotorActuator, S: AngleSensor> Robot<M, S> {
    pub fn new(left: M, right: M, sensor: S, config: RobotConfig) -> Self {
        Self {
            hardware: Mutex::new(Hardware {
                left,
                right,
                sensor,
            }),
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Abort every motion submitted so far without waiting for the lock
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Snapshot taken when a motion is queued; a later stop or cancel trips it
    pub fn motion_guard(&self) -> MotionGuard {
        self.cancel.guard()
    }

    /// Stop the wheels, zero their position counters and re-zero the gyro
    pub fn reset(&self) -> Result<()> {
        info!("Resetting robot");
        let mut hw = self.hardware.lock();
        hw.left.reset()?;
        hw.right.reset()?;
        hw.sensor.reset()?;
        Ok(())
    }

    pub fn forward(&self, distance: i64) -> Result<()> {
        let distance = validate::distance(distance)?;
        self.travel(distance, &self.motion_guard())
    }

    pub fn backward(&self, distance: i64) -> Result<()> {
        let distance = validate::distance(distance)?;
        self.travel(-distance, &self.motion_guard())
    }

    pub fn left(&self, angle: i64) -> Result<RotationReport> {
        let angle = validate::angle(angle)?;
        self.rotate(angle, Direction::Left, &self.motion_guard())
    }

    pub fn right(&self, angle: i64) -> Result<RotationReport> {
        let angle = validate::angle(angle)?;
        self.rotate(angle, Direction::Right, &self.motion_guard())
    }

    /// Safe to call at any time; also aborts motions queued or running on other threads
    pub fn stop(&self) -> Result<()> {
        info!("Stopping robot");
        self.cancel.cancel();
        let mut hw = self.hardware.lock();
        let Hardware { left, right, .. } = &mut *hw;
        stop_both(left, right)?;
        Ok(())
    }

    pub fn state(&self) -> Result<RobotState> {
        let mut hw = self.hardware.lock();
        read_state(&mut *hw)
    }

    /// `None` while another operation holds the hardware
    pub fn try_state(&self) -> Option<Result<RobotState>> {
        self.hardware.try_lock().map(|mut hw| read_state(&mut *hw))
    }

    /// Run a wire command; numbers are checked for integrality here
    pub fn execute(&self, command: &MotionCommand) -> Result<()> {
        self.execute_guarded(command, &self.motion_guard())
    }

    /// Run a wire command that was queued under `guard`
    pub fn execute_guarded(&self, command: &MotionCommand, guard: &MotionGuard) -> Result<()> {
        use crate::config::{MAX_ANGLE, MAX_DIST, MIN_ANGLE, MIN_DIST};

        match *command {
            MotionCommand::Forward { distance } => {
                let distance = validate::integer_in("distance", distance, MIN_DIST, MAX_DIST)?;
                self.travel(distance, guard)
            }
            MotionCommand::Backward { distance } => {
                let distance = validate::integer_in("distance", distance, MIN_DIST, MAX_DIST)?;
                self.travel(-distance, guard)
            }
            MotionCommand::Left { angle } => {
                let angle = validate::integer_in("angle", angle, MIN_ANGLE, MAX_ANGLE)?;
                self.rotate(angle, Direction::Left, guard).map(|_| ())
            }
            MotionCommand::Right { angle } => {
                let angle = validate::integer_in("angle", angle, MIN_ANGLE, MAX_ANGLE)?;
                self.rotate(angle, Direction::Right, guard).map(|_| ())
            }
            MotionCommand::Stop => self.stop(),
            MotionCommand::Reset => self.reset(),
        }
    }

    fn travel(&self, delta: i64, guard: &MotionGuard) -> Result<()> {
        info!("Driving {} steps", delta);
        let mut hw = self.hardware.lock();
        let Hardware { left, right, .. } = &mut *hw;
        stop_both(left, right)?;
        if guard.is_cancelled() {
            info!("Drive of {} steps cancelled before it started", delta);
            return Ok(());
        }

        // Straight moves always use the default speed
        let speed = self.config.base_speed;
        let delta = delta as i32;
        left.run_to_relative_position(delta, speed)?;
        right.run_to_relative_position(delta, speed)?;
        Ok(())
    }

    fn rotate(
        &self,
        angle: i64,
        direction: Direction,
        guard: &MotionGuard,
    ) -> Result<RotationReport> {
        info!("Turning {:?} by {}°", direction, angle);
        let mut hw = self.hardware.lock();
        let Hardware {
            left,
            right,
            sensor,
        } = &mut *hw;
        RotationController::new(&self.config, guard)
            .rotate(left, right, sensor, self.config.base_speed, angle as f64, direction)
            .inspect_err(|e| warn!("Turn {:?} by {}° failed: {}", direction, angle, e))
    }
}

fn read_state<M: MotorActuator, S: AngleSensor>(hw: &mut Hardware<M, S>) -> Result<RobotState> {
    Ok(RobotState {
        right_motor: hw.right.current_position()?,
        left_motor: hw.left.current_position()?,
        angle: hw.sensor.current_angle()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HardwareError, RobotError};
    use crate::sim::{Device, Side, SimCall, SimWorld};

    fn sim_robot() -> (SimWorld, Robot<crate::sim::SimWheel, crate::sim::SimGyro>) {
        let world = SimWorld::new(1.0);
        let config = RobotConfig {
            poll_interval_ms: 0,
            ..RobotConfig::default()
        };
        let robot = world.robot(config);
        (world, robot)
    }

    #[test]
    fn test_forward_stops_then_moves_both_wheels() {
        let (world, robot) = sim_robot();
        robot.forward(1200).unwrap();

        for side in [Side::Left, Side::Right] {
            let calls = world.calls_for(side);
            assert_eq!(calls[0], SimCall::Stop(side));
            assert_eq!(
                calls[1],
                SimCall::RunToRelativePosition {
                    side,
                    delta: 1200,
                    speed: 100
                }
            );
        }
        assert_eq!(robot.state().unwrap().left_motor, 1200);
    }

    #[test]
    fn test_backward_negates_distance() {
        let (world, robot) = sim_robot();
        robot.backward(300).unwrap();

        let state = robot.state().unwrap();
        assert_eq!(state.left_motor, -300);
        assert_eq!(state.right_motor, -300);
        assert!(world.calls_for(Side::Right).contains(&SimCall::RunToRelativePosition {
            side: Side::Right,
            delta: -300,
            speed: 100
        }));
    }

    #[test]
    fn test_out_of_range_touches_no_hardware() {
        let (world, robot) = sim_robot();

        for result in [
            robot.forward(5001).map(|_| ()),
            robot.backward(-1).map(|_| ()),
            robot.right(361).map(|_| ()),
            robot.right(-1).map(|_| ()),
            robot.left(400).map(|_| ()),
            robot.execute(&MotionCommand::Right { angle: 12.5 }),
        ] {
            assert!(matches!(result, Err(RobotError::Validation(_))));
        }
        assert!(world.calls().is_empty());
    }

    #[test]
    fn test_turns_end_stopped_near_target() {
        let (world, robot) = sim_robot();

        for angle in [1, 45, 90, 180, 360] {
            robot.reset().unwrap();
            let report = robot.right(angle).unwrap();
            let heading = robot.state().unwrap().angle;
            assert!(heading >= angle as f64 && heading <= angle as f64 + 1.0);
            assert_eq!(report.final_angle, heading);
            assert!(!world.is_running(Side::Left) && !world.is_running(Side::Right));

            robot.reset().unwrap();
            robot.left(angle).unwrap();
            let heading = robot.state().unwrap().angle;
            assert!(heading <= -(angle as f64) && heading >= -(angle as f64) - 1.0);
        }
    }

    #[test]
    fn test_zero_turn_is_a_no_op() {
        let (world, robot) = sim_robot();
        robot.right(0).unwrap();
        robot.left(0).unwrap();

        assert_eq!(robot.state().unwrap().angle, 0.0);
        assert!(!world.is_running(Side::Left) && !world.is_running(Side::Right));
        assert!(!world.calls().iter().any(|c| matches!(c, SimCall::RunContinuous(_))));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (world, robot) = sim_robot();
        robot.stop().unwrap();
        robot.stop().unwrap();

        assert_eq!(
            world.calls(),
            vec![
                SimCall::Stop(Side::Left),
                SimCall::Stop(Side::Right),
                SimCall::Stop(Side::Left),
                SimCall::Stop(Side::Right),
            ]
        );
    }

    #[test]
    fn test_stop_before_turn_does_not_cancel_it() {
        let (_world, robot) = sim_robot();
        robot.stop().unwrap();
        assert!(robot.right(30).is_ok());
    }

    #[test]
    fn test_stop_after_queueing_cancels_turn() {
        let (world, robot) = sim_robot();
        let guard = robot.motion_guard();
        robot.stop().unwrap();

        let err = robot
            .execute_guarded(&MotionCommand::Right { angle: 360.0 }, &guard)
            .unwrap_err();
        assert!(matches!(err, RobotError::Cancelled { .. }));
        assert_eq!(world.angle(), 0.0);
        assert!(!world.is_running(Side::Left) && !world.is_running(Side::Right));
    }

    #[test]
    fn test_stop_after_queueing_skips_drive() {
        let (world, robot) = sim_robot();
        let guard = robot.motion_guard();
        robot.cancel();

        robot
            .execute_guarded(&MotionCommand::Forward { distance: 1000.0 }, &guard)
            .unwrap();
        assert!(
            !world
                .calls()
                .iter()
                .any(|c| matches!(c, SimCall::RunToRelativePosition { .. }))
        );
        assert_eq!(robot.state().unwrap().left_motor, 0);
    }

    #[test]
    fn test_reset_rezeroes_heading() {
        let (_world, robot) = sim_robot();
        robot.right(90).unwrap();
        robot.forward(500).unwrap();

        robot.reset().unwrap();
        assert_eq!(robot.state().unwrap(), RobotState::default());
    }

    #[test]
    fn test_disconnected_motor_fails_fast() {
        let (world, robot) = sim_robot();
        world.fail_after(Device::Motor(Side::Right), 0);

        let err = robot.forward(100).unwrap_err();
        assert!(matches!(
            err,
            RobotError::Hardware(HardwareError::Unavailable { device: "right motor" })
        ));
    }

    #[test]
    fn test_execute_dispatches_commands() {
        let (_world, robot) = sim_robot();
        robot.execute(&MotionCommand::Forward { distance: 40.0 }).unwrap();
        robot.execute(&MotionCommand::Right { angle: 10.0 }).unwrap();

        let state = robot.state().unwrap();
        assert_eq!(state.left_motor, 40);
        assert!(state.angle >= 10.0);
    }
}
