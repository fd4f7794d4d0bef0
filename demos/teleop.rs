// Keyboard teleop: W/S drive, A/D turn 90°, Q/E turn 15°, space stop, R reset, Esc quit
//
// Usage: cargo run --example teleop
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use diffbot_runtime::config::TOPIC_CMD_MOTION;
use diffbot_runtime::messages::MotionCommand;
use std::time::Duration;
use tracing::info;

const STEP_DISTANCE: f64 = 1024.0; // wheel steps, a quarter revolution
const BIG_TURN: f64 = 90.0; // degrees
const SMALL_TURN: f64 = 15.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_MOTION).await?;

    info!("Controls: W/S=drive, A/D=turn 90, Q/E=turn 15, space=stop, R=reset, Esc=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

fn command_for(code: KeyCode) -> Option<MotionCommand> {
    let cmd = match code {
        KeyCode::Char('w') => MotionCommand::Forward {
            distance: STEP_DISTANCE,
        },
        KeyCode::Char('s') => MotionCommand::Backward {
            distance: STEP_DISTANCE,
        },
        KeyCode::Char('a') => MotionCommand::Left { angle: BIG_TURN },
        KeyCode::Char('d') => MotionCommand::Right { angle: BIG_TURN },
        KeyCode::Char('q') => MotionCommand::Left { angle: SMALL_TURN },
        KeyCode::Char('e') => MotionCommand::Right { angle: SMALL_TURN },
        KeyCode::Char(' ') => MotionCommand::Stop,
        KeyCode::Char('r') => MotionCommand::Reset,
        _ => return None,
    };
    Some(cmd)
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        // Discrete commands: ignore key repeat so one press is one motion
        if kind != KeyEventKind::Press {
            continue;
        }
        if code == KeyCode::Esc {
            // Leave the robot stopped
            let stop = serde_json::to_string(&MotionCommand::Stop)?;
            publisher.put(stop).await?;
            break;
        }

        if let Some(cmd) = command_for(code) {
            info!("Sending {:?}", cmd);
            publisher.put(serde_json::to_string(&cmd)?).await?;
        }
    }

    Ok(())
}
