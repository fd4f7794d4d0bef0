// Bus-backed wheel: one Feetech servo on a serial bus shared with the other wheel

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::MotorActuator;
use super::feetech::{FeetechBus, FeetechError, OperatingMode, STEPS_PER_REVOLUTION};
use crate::error::HardwareError;

pub type SharedBus = Arc<Mutex<FeetechBus>>;

pub fn shared_bus(bus: FeetechBus) -> SharedBus {
    Arc::new(Mutex::new(bus))
}

pub struct BusWheel {
    bus: SharedBus,
    id: u8,
    name: &'static str,
    polarity: i32,
    speed_scale: i32,
    setpoint: i32,
    mode: Option<OperatingMode>,
    running: bool,
    odometer: Odometer,
}

impl BusWheel {
    /// Ping the servo and anchor the position counter at its current shaft angle
    pub fn connect(
        bus: SharedBus,
        id: u8,
        name: &'static str,
        inverted: bool,
        speed_scale: i32,
    ) -> Result<Self, HardwareError> {
        let raw = {
            let mut guard = bus.lock();
            match guard.ping(id) {
                Ok(true) => debug!("{} (ID {}) responding", name, id),
                Ok(false) => {
                    warn!("{} (ID {}) not responding to ping", name, id);
                    return Err(HardwareError::Unavailable { device: name });
                }
                Err(e) => return Err(e.into()),
            }
            guard.present_position(id)?
        };
        info!("{} connected on servo ID {}", name, id);

        Ok(Self {
            bus,
            id,
            name,
            polarity: if inverted { -1 } else { 1 },
            speed_scale,
            setpoint: 0,
            mode: None,
            running: false,
            odometer: Odometer::new(raw),
        })
    }

    fn fault(&self, e: FeetechError) -> HardwareError {
        match e {
            FeetechError::Timeout { .. } => HardwareError::Unavailable { device: self.name },
            other => HardwareError::Bus(other),
        }
    }

    fn raw_velocity(&self, speed: i32) -> i16 {
        let raw = speed.saturating_mul(self.speed_scale).saturating_mul(self.polarity);
        raw.clamp(-0x7FFF, 0x7FFF) as i16
    }

    fn ensure_mode(&mut self, mode: OperatingMode) -> Result<(), HardwareError> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        debug!("{}: switching to {:?} mode", self.name, mode);
        self.bus
            .lock()
            .set_operating_mode(self.id, mode)
            .map_err(|e| self.fault(e))?;
        self.mode = Some(mode);
        Ok(())
    }

    fn write_velocity(&mut self, raw: i16) -> Result<(), HardwareError> {
        self.bus
            .lock()
            .set_velocity(self.id, raw)
            .map_err(|e| self.fault(e))
    }
}

impl MotorActuator for BusWheel {
    fn set_velocity(&mut self, speed: i32) -> Result<(), HardwareError> {
        self.setpoint = speed;
        if self.running {
            self.write_velocity(self.raw_velocity(speed))?;
        }
        Ok(())
    }

    fn run_continuous(&mut self) -> Result<(), HardwareError> {
        self.ensure_mode(OperatingMode::Velocity)?;
        self.write_velocity(self.raw_velocity(self.setpoint))?;
        self.running = true;
        Ok(())
    }

    fn run_to_relative_position(&mut self, delta: i32, speed: i32) -> Result<(), HardwareError> {
        self.running = false;
        self.ensure_mode(OperatingMode::Step)?;
        // Step mode takes the running speed unsigned; direction comes from the step sign
        let raw_speed = self.raw_velocity(speed.abs()).unsigned_abs() as i16;
        let steps = delta
            .saturating_mul(self.polarity)
            .clamp(-0x7FFF, 0x7FFF) as i16;
        let mut bus = self.bus.lock();
        bus.set_velocity(self.id, raw_speed)
            .and_then(|_| bus.step(self.id, steps))
            .map_err(|e| self.fault(e))
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.running = false;
        self.ensure_mode(OperatingMode::Velocity)?;
        self.write_velocity(0)
    }

    fn current_position(&mut self) -> Result<i32, HardwareError> {
        let raw = self
            .bus
            .lock()
            .present_position(self.id)
            .map_err(|e| self.fault(e))?;
        let steps = self.odometer.update(raw) * self.polarity as i64;
        Ok(steps.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        self.stop()?;
        self.setpoint = 0;
        let raw = self
            .bus
            .lock()
            .present_position(self.id)
            .map_err(|e| self.fault(e))?;
        self.odometer = Odometer::new(raw);
        Ok(())
    }
}

impl Drop for BusWheel {
    fn drop(&mut self) {
        // Never leave a wheel spinning when the robot goes away
        if self.running {
            if let Err(e) = self.stop() {
                warn!("Failed to stop {} on drop: {}", self.name, e);
            }
        }
    }
}

/// Unwraps the 0..4095 shaft reading into a continuous step count.
///
/// Only correct while the shaft turns less than half a revolution between reads.
#[derive(Debug, Clone, Copy)]
struct Odometer {
    last_raw: u16,
    total: i64,
}

impl Odometer {
    fn new(raw: u16) -> Self {
        Self {
            last_raw: raw,
            total: 0,
        }
    }

    fn update(&mut self, raw: u16) -> i64 {
        let rev = STEPS_PER_REVOLUTION;
        let mut delta = raw as i32 - self.last_raw as i32;
        if delta >= rev / 2 {
            delta -= rev;
        } else if delta < -rev / 2 {
            delta += rev;
        }
        self.last_raw = raw;
        self.total += delta as i64;
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odometer_forward_wrap() {
        let mut odo = Odometer::new(4000);
        assert_eq!(odo.update(4090), 90);
        assert_eq!(odo.update(100), 90 + 6 + 100);
    }

    #[test]
    fn test_odometer_backward_wrap() {
        let mut odo = Odometer::new(50);
        assert_eq!(odo.update(4046), -100);
        assert_eq!(odo.update(3046), -1100);
    }

    #[test]
    fn test_odometer_still() {
        let mut odo = Odometer::new(1234);
        assert_eq!(odo.update(1234), 0);
    }
}
