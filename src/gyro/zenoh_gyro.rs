// Gyro fed by IMU samples published on a zenoh topic

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

use super::AngleSensor;
use crate::error::HardwareError;
use crate::messages::GyroSample;

const DEVICE: &str = "gyro";

pub struct ZenohGyro {
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
    latest: f64,
    offset: f64,
    received_at: Instant,
    stale_after: Duration,
}

impl ZenohGyro {
    /// Subscribe to `topic` and wait for the first sample.
    ///
    /// Fails with `Unavailable` if nothing arrives within `timeout`.
    pub async fn connect(
        session: &Session,
        topic: &str,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self, HardwareError> {
        info!("Waiting for gyro samples on {}", topic);
        let subscriber = session
            .declare_subscriber(topic.to_string())
            .await
            .map_err(|e| HardwareError::Sensor(e.to_string()))?;

        let first = match tokio::time::timeout(timeout, subscriber.recv_async()).await {
            Ok(Ok(sample)) => decode(&sample)?,
            Ok(Err(e)) => return Err(HardwareError::Sensor(e.to_string())),
            Err(_) => {
                warn!("No gyro sample within {:?}", timeout);
                return Err(HardwareError::Unavailable { device: DEVICE });
            }
        };
        info!("Gyro connected, heading {:.1}°", first);

        Ok(Self {
            subscriber,
            latest: first,
            offset: first,
            received_at: Instant::now(),
            stale_after,
        })
    }

    /// Drain queued samples, keeping the newest
    fn drain(&mut self) -> Result<(), HardwareError> {
        while let Ok(Some(sample)) = self.subscriber.try_recv() {
            match decode(&sample) {
                Ok(angle) => {
                    self.latest = angle;
                    self.received_at = Instant::now();
                }
                Err(e) => warn!("Dropping gyro sample: {}", e),
            }
        }

        let age = self.received_at.elapsed();
        if age > self.stale_after {
            warn!("Gyro silent for {:?}", age);
            return Err(HardwareError::Unavailable { device: DEVICE });
        }
        Ok(())
    }
}

impl AngleSensor for ZenohGyro {
    fn current_angle(&mut self) -> Result<f64, HardwareError> {
        self.drain()?;
        Ok(self.latest - self.offset)
    }

    fn reset(&mut self) -> Result<(), HardwareError> {
        self.drain()?;
        self.offset = self.latest;
        debug!("Gyro re-zeroed at raw heading {:.1}°", self.latest);
        Ok(())
    }
}

fn decode(sample: &Sample) -> Result<f64, HardwareError> {
    let payload = sample.payload().to_bytes();
    serde_json::from_slice::<GyroSample>(&payload)
        .map(|s| s.angle)
        .map_err(|e| HardwareError::Sensor(format!("bad gyro sample: {}", e)))
}
