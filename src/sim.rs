// Simulated wheels and gyro for running without hardware
//
// The gyro turns a fixed number of degrees on every read while the wheels
// spin in opposite directions, which makes rotations deterministic. Every
// hardware call is recorded so tests can check exactly what was issued.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::RobotConfig;
use crate::error::HardwareError;
use crate::gyro::AngleSensor;
use crate::motor::MotorActuator;
use crate::robot::Robot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn device_name(self) -> &'static str {
        match self {
            Side::Left => "left motor",
            Side::Right => "right motor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Motor(Side),
    Gyro,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    SetVelocity { side: Side, speed: i32 },
    RunContinuous(Side),
    RunToRelativePosition { side: Side, delta: i32, speed: i32 },
    Stop(Side),
    ReadPosition(Side),
    ResetMotor(Side),
    ReadAngle,
    ResetGyro,
}

impl SimCall {
    fn side(&self) -> Option<Side> {
        match *self {
            SimCall::SetVelocity { side, .. }
            | SimCall::RunToRelativePosition { side, .. }
            | SimCall::RunContinuous(side)
            | SimCall::Stop(side)
            | SimCall::ReadPosition(side)
            | SimCall::ResetMotor(side) => Some(side),
            SimCall::ReadAngle | SimCall::ResetGyro => None,
        }
    }
}

#[derive(Debug, Default)]
struct WheelModel {
    setpoint: i32,
    running: bool,
    position: i64,
    // Calls left before the device drops off the bus
    budget: Option<usize>,
}

#[derive(Debug)]
struct World {
    left: WheelModel,
    right: WheelModel,
    angle: f64,
    degrees_per_read: f64,
    gyro_budget: Option<usize>,
    calls: Vec<SimCall>,
}

impl World {
    fn wheel(&mut self, side: Side) -> &mut WheelModel {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn spend(budget: &mut Option<usize>, device: &'static str) -> Result<(), HardwareError> {
        match budget {
            Some(0) => Err(HardwareError::Unavailable { device }),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Spin direction of an in-place turn: +1 clockwise, -1 counter-clockwise
    fn turning(&self) -> f64 {
        let spinning = self.left.running && self.right.running;
        if !spinning || self.left.setpoint.signum() == self.right.setpoint.signum() {
            return 0.0;
        }
        (self.left.setpoint - self.right.setpoint).signum() as f64
    }
}

/// Shared state behind all simulated devices of one robot
#[derive(Debug, Clone)]
pub struct SimWorld {
    inner: Arc<Mutex<World>>,
}

impl SimWorld {
    pub fn new(degrees_per_read: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(World {
                left: WheelModel::default(),
                right: WheelModel::default(),
                angle: 0.0,
                degrees_per_read,
                gyro_budget: None,
                calls: Vec::new(),
            })),
        }
    }

    pub fn wheel(&self, side: Side) -> SimWheel {
        SimWheel {
            world: self.clone(),
            side,
        }
    }

    pub fn gyro(&self) -> SimGyro {
        SimGyro {
            world: self.clone(),
        }
    }

    pub fn robot(&self, config: RobotConfig) -> Robot<SimWheel, SimGyro> {
        Robot::new(self.wheel(Side::Left), self.wheel(Side::Right), self.gyro(), config)
    }

    /// Let `device` answer `calls` more times, then report it disconnected
    pub fn fail_after(&self, device: Device, calls: usize) {
        let mut world = self.inner.lock();
        match device {
            Device::Motor(side) => world.wheel(side).budget = Some(calls),
            Device::Gyro => world.gyro_budget = Some(calls),
        }
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.inner.lock().calls.clone()
    }

    pub fn calls_for(&self, side: Side) -> Vec<SimCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|call| call.side() == Some(side))
            .cloned()
            .collect()
    }

    pub fn stop_count(&self, side: Side) -> usize {
        self.calls_for(side)
            .iter()
            .filter(|call| **call == SimCall::Stop(side))
            .count()
    }

    pub fn angle(&self) -> f64 {
        self.inner.lock().angle
    }

    pub fn is_running(&self, side: Side) -> bool {
        self.inner.lock().wheel(side).running
    }

    fn with_wheel<T>(
        &self,
        side: Side,
        call: SimCall,
        f: impl FnOnce(&mut WheelModel) -> T,
    ) -> Result<T, HardwareError> {
        let mut world = self.inner.lock();
        let wheel = world.wheel(side);
        World::spend(&mut wheel.budget, side.device_name())?;
        let out = f(wheel);
        world.calls.push(call);
        Ok(out)
    }
}

pub struct SimWheel {
    world: SimWorld,
    side: Side,
}

impl MotorActuator for SimWheel {
    fn set_velocity(&mut self, speed: i32) -> Result<(), HardwareError> {
        let call = SimCall::SetVelocity {
            side: self.side,
            speed,
        };
        self.world.with_wheel(self.side, call, |w| w.setpoint = speed)
    }

    fn run_continuous(&mut self) -> Result<(), HardwareError> {
        let call = SimCall::RunContinuous(self.side);
        self.world.with_wheel(self.side, call, |w| w.running = true)
    }

    // Position moves complete instantly
    fn run_to_relative_position(&mut self, delta: i32, speed: i32) -> Result<(), HardwareError> {
        let call = SimCall::RunToRelativePosition {
            side: self.side,
            delta,
            speed,
        };
        self.world.with_wheel(self.side, call, |w| {
            w.running = false;
            w.position += delta as i64;
        })
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        let call = SimCall::Stop(self.side);
        self.world.with_wheel(self.side, call, |w| w.running = false)
    }

    fn current_position(&mut self) -> Result<i32, HardwareError> {
        let call = SimCall::ReadPosition(self.side);
        self.world
            .with_wheel(self.side, call, |w| w.position as i32)
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        let call = SimCall::ResetMotor(self.side);
        self.world.with_wheel(self.side, call, |w| {
            w.running = false;
            w.setpoint = 0;
            w.position = 0;
        })
    }
}

pub struct SimGyro {
    world: SimWorld,
}

impl AngleSensor for SimGyro {
    fn current_angle(&mut self) -> Result<f64, HardwareError> {
        let mut world = self.world.inner.lock();
        World::spend(&mut world.gyro_budget, "gyro")?;
        let step = world.turning() * world.degrees_per_read;
        world.angle += step;
        world.calls.push(SimCall::ReadAngle);
        Ok(world.angle)
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        let mut world = self.world.inner.lock();
        World::spend(&mut world.gyro_budget, "gyro")?;
        world.angle = 0.0;
        world.calls.push(SimCall::ResetGyro);
        Ok(())
    }
}
