// Closed-loop rotation with geometric slowdown
//
// The wheels start at half the base speed. Each time the heading crosses a
// partial target (a fixed fraction of the remaining arc) both wheel speeds are
// multiplied down, so the robot creeps into the final target instead of
// overshooting on actuator and gyro latency. Once the slower wheel is at or
// below the minimum rotation speed the loop just polls the final target.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::Direction;
use crate::config::RobotConfig;
use crate::error::{HardwareError, Result, RobotError};
use crate::gyro::AngleSensor;
use crate::motor::MotorActuator;

/// Stop counter shared between the facade and the motions it runs.
///
/// Each `cancel` bumps the counter. A motion snapshots it when it is
/// submitted and counts as cancelled once the counter has moved on, so a
/// stop only ever aborts motions submitted before it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicU64>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshot for a motion submitted now
    pub fn guard(&self) -> MotionGuard {
        MotionGuard {
            token: self.clone(),
            generation: self.0.load(Ordering::SeqCst),
        }
    }
}

/// A motion's view of the [`CancelToken`] at submission time
#[derive(Debug, Clone)]
pub struct MotionGuard {
    token: CancelToken,
    generation: u64,
}

impl MotionGuard {
    pub fn is_cancelled(&self) -> bool {
        self.token.0.load(Ordering::SeqCst) != self.generation
    }
}

/// Setpoints applied to the wheels at one point of a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WheelSpeeds {
    pub left: i32,
    pub right: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationReport {
    pub direction: Direction,
    pub target: f64,
    pub final_angle: f64,
    /// Initial setpoints followed by the setpoints after each slowdown step
    pub speed_profile: Vec<WheelSpeeds>,
}

impl RotationReport {
    pub fn slowdown_steps(&self) -> usize {
        self.speed_profile.len().saturating_sub(1)
    }
}

/// Signed per-wheel speeds of one rotation, kept unrounded so repeated decay stays exact
#[derive(Debug, Clone, Copy)]
struct RotationState {
    target: f64,
    left: f64,
    right: f64,
}

impl RotationState {
    fn slowest(&self) -> f64 {
        self.left.abs().min(self.right.abs())
    }

    fn slow_down(&mut self, left_factor: f64, right_factor: f64) {
        self.left *= left_factor;
        self.right *= right_factor;
    }

    // Ties go to even so 12.5 lands on 12, like an integer setpoint halving
    fn setpoints(&self) -> WheelSpeeds {
        WheelSpeeds {
            left: self.left.round_ties_even() as i32,
            right: self.right.round_ties_even() as i32,
        }
    }
}

pub struct RotationController<'a> {
    config: &'a RobotConfig,
    cancel: &'a MotionGuard,
}

impl<'a> RotationController<'a> {
    pub fn new(config: &'a RobotConfig, cancel: &'a MotionGuard) -> Self {
        Self { config, cancel }
    }

    /// Turn by `relative_angle` degrees and leave both wheels stopped.
    ///
    /// The wheels are stopped on every exit path, errors included.
    pub fn rotate<M, S>(
        &self,
        left: &mut M,
        right: &mut M,
        sensor: &mut S,
        base_speed: i32,
        relative_angle: f64,
        direction: Direction,
    ) -> Result<RotationReport>
    where
        M: MotorActuator,
        S: AngleSensor,
    {
        let outcome = self.drive(left, right, sensor, base_speed, relative_angle, direction);
        let stopped = stop_both(left, right);

        match (outcome, stopped) {
            (Ok(report), Ok(())) => {
                info!(
                    "Rotated {:?} to {:.1}° (target {:.1}°, {} slowdown steps)",
                    direction,
                    report.final_angle,
                    report.target,
                    report.slowdown_steps()
                );
                Ok(report)
            }
            (Err(e), stopped) => {
                if let Err(stop_err) = stopped {
                    warn!("Failed to stop wheels after aborted rotation: {}", stop_err);
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e.into()),
        }
    }

    fn drive<M, S>(
        &self,
        left: &mut M,
        right: &mut M,
        sensor: &mut S,
        base_speed: i32,
        relative_angle: f64,
        direction: Direction,
    ) -> Result<RotationReport>
    where
        M: MotorActuator,
        S: AngleSensor,
    {
        let started = Instant::now();
        let start_angle = sensor.current_angle()?;
        let target = direction.combine(start_angle, relative_angle);

        let magnitude = (base_speed as f64 / 2.0).round_ties_even();
        let (left_sign, right_sign) = direction.wheel_signs();
        let mut state = RotationState {
            target,
            left: left_sign * magnitude,
            right: right_sign * magnitude,
        };
        let mut report = RotationReport {
            direction,
            target,
            final_angle: start_angle,
            speed_profile: Vec::new(),
        };

        // Nothing to turn: leave the wheels where they are
        if !direction.should_continue(start_angle, target) {
            return Ok(report);
        }
        if self.cancel.is_cancelled() {
            return Err(RobotError::Cancelled { angle: start_angle });
        }

        debug!(
            "Rotation {:?}: {:.1}° -> {:.1}° at speed {}",
            direction, start_angle, target, magnitude
        );
        let speeds = apply(left, right, &state)?;
        report.speed_profile.push(speeds);
        left.run_continuous()?;
        right.run_continuous()?;

        let min_speed = self.config.min_rotation_speed as f64;
        let mut angle = sensor.current_angle()?;
        while direction.should_continue(angle, state.target) {
            if state.slowest() > min_speed {
                let partial =
                    direction.partial_target(angle, state.target, self.config.slowdown_fraction);
                debug!("Heading {:.1}°, slowing down at {:.1}°", angle, partial);
                self.wait_for(sensor, direction, partial, started, &state)?;

                state.slow_down(self.config.left_slowdown, self.config.right_slowdown);
                let speeds = apply(left, right, &state)?;
                debug!("Slowdown step: left={}, right={}", speeds.left, speeds.right);
                report.speed_profile.push(speeds);
            } else {
                self.pause(angle, started, &state)?;
            }
            angle = sensor.current_angle()?;
        }

        report.final_angle = angle;
        Ok(report)
    }

    /// Poll the heading until it passes `partial`
    fn wait_for<S: AngleSensor>(
        &self,
        sensor: &mut S,
        direction: Direction,
        partial: f64,
        started: Instant,
        state: &RotationState,
    ) -> Result<()> {
        loop {
            let angle = sensor.current_angle()?;
            if !direction.should_continue(angle, partial) {
                return Ok(());
            }
            self.pause(angle, started, state)?;
        }
    }

    /// One polling interval, bailing out on cancellation or watchdog timeout
    fn pause(&self, angle: f64, started: Instant, state: &RotationState) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RobotError::Cancelled { angle });
        }
        if let Some(limit) = self.config.rotation_timeout() {
            let elapsed = started.elapsed();
            if elapsed > limit {
                return Err(RobotError::RotationTimeout {
                    target: state.target,
                    angle,
                    elapsed,
                });
            }
        }
        let interval = self.config.poll_interval();
        if interval > Duration::ZERO {
            std::thread::sleep(interval);
        } else {
            std::thread::yield_now();
        }
        Ok(())
    }
}

fn apply<M: MotorActuator>(
    left: &mut M,
    right: &mut M,
    state: &RotationState,
) -> std::result::Result<WheelSpeeds, HardwareError> {
    let speeds = state.setpoints();
    left.set_velocity(speeds.left)?;
    right.set_velocity(speeds.right)?;
    Ok(speeds)
}

/// Stop both wheels, attempting the second even if the first fails
pub(crate) fn stop_both<M: MotorActuator>(
    left: &mut M,
    right: &mut M,
) -> std::result::Result<(), HardwareError> {
    let left_result = left.stop();
    let right_result = right.stop();
    left_result.and(right_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Device, SimCall, SimWorld, Side};

    fn fast_config() -> RobotConfig {
        RobotConfig {
            poll_interval_ms: 0,
            ..RobotConfig::default()
        }
    }

    fn rotate(
        world: &SimWorld,
        config: &RobotConfig,
        cancel: &MotionGuard,
        angle: f64,
        direction: Direction,
    ) -> Result<RotationReport> {
        let mut left = world.wheel(Side::Left);
        let mut right = world.wheel(Side::Right);
        let mut gyro = world.gyro();
        RotationController::new(config, cancel).rotate(
            &mut left,
            &mut right,
            &mut gyro,
            config.base_speed,
            angle,
            direction,
        )
    }

    #[test]
    fn test_right_90_speed_profile() {
        let world = SimWorld::new(1.0);
        let config = fast_config();
        let report = rotate(&world, &config, &CancelToken::new().guard(), 90.0, Direction::Right).unwrap();

        let magnitudes: Vec<i32> = report.speed_profile.iter().map(|s| s.left.abs()).collect();
        assert_eq!(&magnitudes[..3], &[50, 25, 12]);
        assert!(magnitudes.windows(2).all(|w| w[1] <= w[0]));
        assert!(report.speed_profile.iter().all(|s| s.left == -s.right));

        assert!(report.final_angle >= 90.0 && report.final_angle <= 91.0);
        assert!(!world.is_running(Side::Left));
        assert!(!world.is_running(Side::Right));
    }

    #[test]
    fn test_decay_stops_at_min_speed() {
        let world = SimWorld::new(0.25);
        let config = fast_config();
        let report = rotate(&world, &config, &CancelToken::new().guard(), 360.0, Direction::Right).unwrap();

        // 50 * 0.5^k: 50, 25, 12.5, 6.25, 3.125 -> decay ends once at or below 5
        assert_eq!(report.slowdown_steps(), 4);
        for (k, speeds) in report.speed_profile.iter().enumerate() {
            let exact = 50.0 * 0.5f64.powi(k as i32);
            assert_eq!(speeds.left.abs(), exact.round_ties_even() as i32);
        }
    }

    #[test]
    fn test_left_turn_counts_down() {
        let world = SimWorld::new(1.0);
        let config = fast_config();
        let report = rotate(&world, &config, &CancelToken::new().guard(), 45.0, Direction::Left).unwrap();

        assert_eq!(report.target, -45.0);
        assert!(report.final_angle <= -45.0 && report.final_angle >= -46.0);
        assert_eq!(report.speed_profile[0], WheelSpeeds { left: -50, right: 50 });
    }

    #[test]
    fn test_zero_angle_never_spins() {
        let world = SimWorld::new(1.0);
        let config = fast_config();
        let report = rotate(&world, &config, &CancelToken::new().guard(), 0.0, Direction::Right).unwrap();

        assert!(report.speed_profile.is_empty());
        assert_eq!(world.angle(), 0.0);
        assert!(!world.is_running(Side::Left));
        assert!(!world.is_running(Side::Right));
        assert!(world.stop_count(Side::Left) >= 1);
        assert!(world.stop_count(Side::Right) >= 1);
    }

    #[test]
    fn test_asymmetric_slowdown() {
        let world = SimWorld::new(1.0);
        let config = RobotConfig {
            left_slowdown: 0.5,
            right_slowdown: 0.75,
            ..fast_config()
        };
        let report = rotate(&world, &config, &CancelToken::new().guard(), 90.0, Direction::Right).unwrap();

        assert_eq!(report.speed_profile[1], WheelSpeeds { left: 25, right: -38 });
    }

    #[test]
    fn test_cancelled_rotation_stops_wheels() {
        let world = SimWorld::new(1.0);
        let config = fast_config();
        let cancel = CancelToken::new();
        let guard = cancel.guard();
        cancel.cancel();

        let err = rotate(&world, &config, &guard, 90.0, Direction::Right).unwrap_err();
        assert!(matches!(err, RobotError::Cancelled { angle } if angle == 0.0));
        assert!(!world.calls().iter().any(|c| matches!(c, SimCall::RunContinuous(_))));
        assert!(!world.is_running(Side::Left));
        assert!(!world.is_running(Side::Right));
    }

    #[test]
    fn test_stop_only_cancels_earlier_motions() {
        let cancel = CancelToken::new();
        let before = cancel.guard();
        cancel.cancel();
        let after = cancel.guard();

        assert!(before.is_cancelled());
        assert!(!after.is_cancelled());
        cancel.cancel();
        assert!(after.is_cancelled());
    }

    #[test]
    fn test_stalled_gyro_times_out() {
        // Gyro never moves, so only the watchdog can end the rotation
        let world = SimWorld::new(0.0);
        let config = RobotConfig {
            poll_interval_ms: 1,
            rotation_timeout_ms: Some(20),
            ..RobotConfig::default()
        };

        let err = rotate(&world, &config, &CancelToken::new().guard(), 30.0, Direction::Left).unwrap_err();
        assert!(matches!(err, RobotError::RotationTimeout { target, .. } if target == -30.0));
        assert!(!world.is_running(Side::Left));
    }

    #[test]
    fn test_gyro_dropout_stops_wheels() {
        let world = SimWorld::new(1.0);
        world.fail_after(Device::Gyro, 5);
        let config = fast_config();

        let err = rotate(&world, &config, &CancelToken::new().guard(), 90.0, Direction::Right).unwrap_err();
        assert!(matches!(
            err,
            RobotError::Hardware(HardwareError::Unavailable { device: "gyro" })
        ));
        assert!(!world.is_running(Side::Left));
        assert!(!world.is_running(Side::Right));
    }
}
