//! `camstream` - stream the first camera to a UDP endpoint.
//!
//! Runs the engine on a background thread, prints every engine event to
//! stdout as one JSON object per line, and stops on Ctrl-C or after
//! `--duration` seconds. Logs go to stderr.

use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{select, Receiver, Sender};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camstream_capture::VirtualCameraConfig;
use camstream_engine::{create_engine, Hardware};
use camstream_ipc::{
    command_channel, event_channel, Destination, EngineCommand, EngineEvent, OversizePolicy,
    PipelinePolicy, SessionErrorAction, StreamConfig,
};

/// How long to wait for the engine to acknowledge shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "camstream", version, about = "Stream a camera as H.264 over UDP")]
struct Args {
    /// Receiver host name or address.
    #[arg(long, env = "CAMSTREAM_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Receiver port.
    #[arg(long, env = "CAMSTREAM_PORT", default_value_t = 5000)]
    port: u16,

    #[arg(long, env = "CAMSTREAM_WIDTH", default_value_t = 1280, value_parser = clap::value_parser!(u32).range(1..))]
    width: u32,

    #[arg(long, env = "CAMSTREAM_HEIGHT", default_value_t = 720, value_parser = clap::value_parser!(u32).range(1..))]
    height: u32,

    /// Target bitrate in bits per second.
    #[arg(long, env = "CAMSTREAM_BITRATE", default_value_t = 2_000_000, value_parser = clap::value_parser!(u32).range(1..))]
    bitrate: u32,

    /// Frames per second.
    #[arg(long, env = "CAMSTREAM_FPS", default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=120))]
    fps: u32,

    /// Seconds between keyframes.
    #[arg(long, env = "CAMSTREAM_KEYFRAME_INTERVAL", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    keyframe_interval: u32,

    /// Stop after this many seconds (0 streams until Ctrl-C).
    #[arg(long, env = "CAMSTREAM_DURATION", default_value_t = 0)]
    duration: u64,

    /// Extra attempts per datagram after a send failure.
    #[arg(long, env = "CAMSTREAM_SEND_RETRIES", default_value_t = 0)]
    send_retries: u32,

    /// Handling of access units larger than one datagram.
    #[arg(long, env = "CAMSTREAM_OVERSIZE", value_enum, default_value_t = Oversize::Send)]
    oversize: Oversize,

    /// Reaction to camera or capture session failures.
    #[arg(long, env = "CAMSTREAM_SESSION_ERRORS", value_enum, default_value_t = SessionErrors::Teardown)]
    session_errors: SessionErrors,

    /// Camera identifiers the virtual provider advertises.
    #[arg(long = "camera", env = "CAMSTREAM_CAMERAS", value_delimiter = ',', default_values_t = ["0".to_string()])]
    cameras: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Oversize {
    Send,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SessionErrors {
    Teardown,
    Stall,
}

impl Args {
    fn destination(&self) -> Destination {
        Destination::new(self.host.clone(), self.port)
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            width: self.width,
            height: self.height,
            bitrate_bps: self.bitrate,
            frame_rate: self.fps,
            keyframe_interval_secs: self.keyframe_interval,
        }
    }

    fn policy(&self) -> PipelinePolicy {
        PipelinePolicy {
            session_errors: match self.session_errors {
                SessionErrors::Teardown => SessionErrorAction::Teardown,
                SessionErrors::Stall => SessionErrorAction::Stall,
            },
            send_retries: self.send_retries,
            oversize: match self.oversize {
                Oversize::Send => OversizePolicy::Send,
                Oversize::Drop => OversizePolicy::Drop,
            },
            ..Default::default()
        }
    }

    fn camera_config(&self) -> VirtualCameraConfig {
        VirtualCameraConfig {
            camera_ids: self.cameras.clone(),
            frame_rate: self.fps,
            ..Default::default()
        }
    }

    fn deadline(&self) -> Option<Instant> {
        (self.duration > 0).then(|| Instant::now() + Duration::from_secs(self.duration))
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "camstream=info,camstream_engine=info,camstream_capture=info,camstream_encoder=info,camstream_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("camstream starting");

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let hardware = Hardware::virtual_devices(args.camera_config());
    let mut engine = create_engine(hardware, args.policy(), command_rx, event_tx)
        .context("failed to create engine")?;
    let engine_thread = thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || engine.run())
        .context("failed to spawn engine thread")?;

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    send(
        &command_tx,
        EngineCommand::Start {
            destination: args.destination(),
            config: args.stream_config(),
        },
    )?;

    run_until_stopped(&event_rx, &interrupt_rx, args.deadline())?;

    info!("Stopping stream");
    send(&command_tx, EngineCommand::Stop)?;
    send(&command_tx, EngineCommand::Shutdown)?;
    await_shutdown(&event_rx)?;

    engine_thread
        .join()
        .map_err(|_| anyhow!("engine thread panicked"))?;
    info!("camstream stopped");
    Ok(())
}

/// Print events until interrupted, the deadline passes, or the engine goes away.
fn run_until_stopped(
    events: &Receiver<EngineEvent>,
    interrupt: &Receiver<()>,
    deadline: Option<Instant>,
) -> Result<()> {
    let timeout = match deadline {
        Some(deadline) => crossbeam_channel::at(deadline),
        None => crossbeam_channel::never(),
    };

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => print_event(&event)?,
                Err(_) => return Err(anyhow!("engine stopped unexpectedly")),
            },
            recv(interrupt) -> _ => {
                info!("Interrupted");
                return Ok(());
            },
            recv(timeout) -> _ => {
                info!("Duration elapsed");
                return Ok(());
            },
        }
    }
}

fn await_shutdown(events: &Receiver<EngineEvent>) -> Result<()> {
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                print_event(&event)?;
                if matches!(event, EngineEvent::Shutdown) {
                    return Ok(());
                }
            }
            Err(e) => {
                warn!("No shutdown acknowledgement: {}", e);
                return Ok(());
            }
        }
    }
}

fn send(commands: &Sender<EngineCommand>, command: EngineCommand) -> Result<()> {
    commands
        .send(command)
        .map_err(|e| anyhow!("failed to send command: {}", e))
}

fn print_event(event: &EngineEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("failed to serialize event")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}
