// Command loop: zenoh in, robot motions on the blocking pool, state + health out
//
// Only one motion runs at a time. A stop always gets through: it cancels every
// motion submitted before it, and when one is still running a stop of the
// wheels is queued right behind it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};
use zenoh::Session;

use crate::config::{LOOP_HZ, TOPIC_CMD_MOTION, TOPIC_HEALTH, TOPIC_STATE_BASE};
use crate::error::RobotError;
use crate::gyro::AngleSensor;
use crate::messages::{MotionCommand, RuntimeHealth};
use crate::motor::MotorActuator;
use crate::robot::Robot;

pub struct Runtime<M, S> {
    robot: Arc<Robot<M, S>>,
    in_flight: Option<JoinHandle<Result<(), RobotError>>>,
    stop_pending: bool,
    health: RuntimeHealth,
}

impl<M, S> Runtime<M, S>
where
    M: MotorActuator + Send + 'static,
    S: AngleSensor + Send + 'static,
{
    pub fn new(robot: Arc<Robot<M, S>>) -> Self {
        Self {
            robot,
            in_flight: None,
            stop_pending: false,
            health: RuntimeHealth::Idle,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a command unless another one is still running
    fn on_command(&mut self, cmd: MotionCommand) {
        info!("Received command: {:?}", &cmd);

        if cmd == MotionCommand::Stop {
            self.robot.cancel();
            if self.is_busy() {
                // Straight moves don't poll the cancel, so the wheels get an explicit stop
                self.stop_pending = true;
                return;
            }
        } else if self.is_busy() {
            warn!("Busy, dropping command {:?}", cmd);
            return;
        }

        self.start(cmd);
    }

    fn start(&mut self, cmd: MotionCommand) {
        // Snapshot before spawning so a stop received next tick still applies
        let guard = self.robot.motion_guard();
        let robot = Arc::clone(&self.robot);
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            robot.execute_guarded(&cmd, &guard)
        }));
        self.health = RuntimeHealth::Moving;
    }

    /// Collect the running command's result, waiting for it if `wait` is set.
    ///
    /// A stop queued behind the command is started once it finishes, and
    /// waited for as well when `wait` is set.
    async fn reap(&mut self, wait: bool) {
        loop {
            let done = self
                .in_flight
                .as_ref()
                .is_some_and(|handle| wait || handle.is_finished());
            if !done {
                return;
            }
            let Some(handle) = self.in_flight.take() else {
                return;
            };

            self.health = outcome(handle.await);
            if !std::mem::take(&mut self.stop_pending) {
                return;
            }
            self.start(MotionCommand::Stop);
        }
    }

    /// Cancel whatever is running and leave the wheels stopped
    async fn shutdown(&mut self) {
        self.robot.cancel();
        self.reap(true).await;
        let robot = Arc::clone(&self.robot);
        match tokio::task::spawn_blocking(move || robot.stop()).await {
            Ok(Ok(())) => info!("Robot stopped"),
            Ok(Err(e)) => error!("Failed to stop robot: {}", e),
            Err(e) => error!("Stop task failed: {}", e),
        }
    }
}

fn outcome(result: Result<Result<(), RobotError>, tokio::task::JoinError>) -> RuntimeHealth {
    match result {
        Ok(Ok(())) => RuntimeHealth::Idle,
        Ok(Err(RobotError::Cancelled { angle })) => {
            info!("Turn cancelled at {:.1}°", angle);
            RuntimeHealth::Idle
        }
        Ok(Err(e)) if e.is_validation() => {
            warn!("Rejected command: {}", e);
            RuntimeHealth::Idle
        }
        Ok(Err(e)) => {
            error!("Command failed: {}", e);
            RuntimeHealth::Fault
        }
        Err(e) => {
            error!("Command task failed: {}", e);
            RuntimeHealth::Fault
        }
    }
}

pub async fn run<M, S>(
    robot: Arc<Robot<M, S>>,
    session: &Session,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    M: MotorActuator + Send + 'static,
    S: AngleSensor + Send + 'static,
{
    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_MOTION).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE_BASE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(robot);
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD_MOTION);
    info!("Publishing to: {}, {}", TOPIC_STATE_BASE, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                runtime.shutdown().await;
                return Ok(());
            }
        }

        // 1. Drain pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotionCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Pick up finished motions
        runtime.reap(false).await;

        // 3. Publish state, skipped while a motion holds the hardware
        match runtime.robot.try_state() {
            Some(Ok(state)) => pub_state.put(serde_json::to_string(&state)?).await?,
            Some(Err(e)) => warn!("Failed to read state: {}", e),
            None => {}
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health)?;
        pub_health.put(health_json).await?;
    }
}
