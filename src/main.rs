use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use diffbot_runtime::config::RobotConfig;
use diffbot_runtime::gyro::AngleSensor;
use diffbot_runtime::motor::MotorActuator;
use diffbot_runtime::sim::SimWorld;
use diffbot_runtime::{Robot, hardware, runtime};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// Degrees the simulated gyro turns per read
const SIM_DEGREES_PER_READ: f64 = 0.5;

#[derive(Parser)]
#[command(about = "Differential robot runtime with gyro-feedback turns")]
struct Cli {
    /// JSON config file; defaults are used for anything it leaves out
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the wheel servos (overrides the config file)
    #[arg(long)]
    port: Option<String>,

    /// Drive simulated wheels and gyro instead of hardware
    #[arg(long)]
    sim: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the zenoh command loop
    Serve,
    /// Drive forward by a number of wheel steps
    Forward {
        #[arg(allow_negative_numbers = true)]
        distance: i64,
    },
    Backward {
        #[arg(allow_negative_numbers = true)]
        distance: i64,
    },
    /// Turn counter-clockwise by degrees
    Left {
        #[arg(allow_negative_numbers = true)]
        angle: i64,
    },
    /// Turn clockwise by degrees
    Right {
        #[arg(allow_negative_numbers = true)]
        angle: i64,
    },
    Stop,
    /// Print wheel positions and heading
    State,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let mut config = match &cli.config {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };
    if let Some(port) = cli.port {
        config.hardware.port = port;
    }

    if cli.sim {
        info!("Running against simulated hardware");
        let session = match cli.command {
            Command::Serve => Some(zenoh::open(zenoh::Config::default()).await?),
            _ => None,
        };
        let robot = SimWorld::new(SIM_DEGREES_PER_READ).robot(config);
        return execute(Arc::new(robot), cli.command, session).await;
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let robot = hardware::connect(&config, &session).await?;
    execute(Arc::new(robot), cli.command, Some(session)).await
}

async fn execute<M, S>(
    robot: Arc<Robot<M, S>>,
    command: Command,
    session: Option<zenoh::Session>,
) -> Result<(), BoxError>
where
    M: MotorActuator + Send + 'static,
    S: AngleSensor + Send + 'static,
{
    if let Command::Serve = command {
        let Some(session) = session else {
            return Err("serve needs a zenoh session".into());
        };
        return runtime::run(robot, &session).await;
    }

    // Motions block on the hardware, keep them off the async workers
    let report = tokio::task::spawn_blocking(move || -> Result<String, BoxError> {
        match command {
            Command::Forward { distance } => robot.forward(distance)?,
            Command::Backward { distance } => robot.backward(distance)?,
            // Turns print their report instead of the state
            Command::Left { angle } => return Ok(serde_json::to_string_pretty(&robot.left(angle)?)?),
            Command::Right { angle } => return Ok(serde_json::to_string_pretty(&robot.right(angle)?)?),
            Command::Stop => robot.stop()?,
            Command::State | Command::Serve => {}
        }
        Ok(serde_json::to_string_pretty(&robot.state()?)?)
    })
    .await??;

    println!("{}", report);
    Ok(())
}
