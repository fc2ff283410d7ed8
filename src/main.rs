use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use mindrig::brainflow::{BoardId, BrainFlowSource};
use mindrig::classifier::BandPowerClassifier;
use mindrig::config::PipelineConfig;
use mindrig::recorder::TrialRecorder;
use mindrig::session::{SessionController, SessionEvent, SessionPhase, SessionTiming};
use mindrig::source::{SignalSource, SyntheticSource};
use mindrig::trial::SessionMetadata;

/// Headless motor-imagery session runner.
#[derive(Parser)]
#[command(name = "mindrig", version, about)]
struct Cli {
    /// Board to acquire from.
    #[arg(long, value_enum, default_value = "synthetic")]
    board: Board,

    /// Serial port of the USB dongle (hardware boards only).
    #[arg(long, default_value = "")]
    serial_port: String,

    /// Subject identifier (EID).
    #[arg(long, default_value = "anon")]
    subject: String,

    #[arg(long, default_value = "Anon")]
    first_name: String,

    #[arg(long, default_value = "Subject")]
    last_name: String,

    #[arg(long, default_value_t = 1)]
    session: u32,

    /// Number of cued trials to run.
    #[arg(long, default_value_t = 6)]
    trials: u32,

    /// Enable live classifier feedback and periodic fine-tuning.
    #[arg(long)]
    online: bool,

    /// Root directory for session artifacts.
    #[arg(long, default_value = "recordings")]
    out_dir: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Board {
    /// In-process synthetic source (no hardware needed).
    Synthetic,
    Cyton,
    CytonDaisy,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.board {
        Board::Synthetic => run(SyntheticSource::new(16, 125.0), &cli),
        Board::Cyton => run(connect(BoardId::Cyton, &cli)?, &cli),
        Board::CytonDaisy => run(connect(BoardId::CytonDaisy, &cli)?, &cli),
    }
}

fn connect(board: BoardId, cli: &Cli) -> Result<BrainFlowSource> {
    let mut source = BrainFlowSource::connect(board, &cli.serial_port)
        .with_context(|| format!("failed to connect {}", board.name()))?;
    source.start_stream()?;
    Ok(source)
}

fn run<S: SignalSource>(source: S, cli: &Cli) -> Result<()> {
    let config = PipelineConfig::for_rate(source.sampling_rate_hz());
    let metadata = SessionMetadata::new(
        cli.subject.clone(),
        cli.first_name.clone(),
        cli.last_name.clone(),
        cli.session,
    );
    let session_dir = cli.out_dir.join(metadata.session_dir_name());
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("failed to create {}", session_dir.display()))?;
    let recorder = TrialRecorder::new(&session_dir, metadata);

    let channel_count = source.channel_count();
    let mut controller = SessionController::new(
        source,
        config,
        SessionTiming::default(),
        recorder,
        cli.trials,
    )?;
    if cli.online {
        controller = controller
            .with_classifier(Box::new(BandPowerClassifier::split(channel_count)), 3);
    }

    for event in controller.start() {
        log::info!("{event:?}");
    }
    let tick = Duration::from_millis(16); // ~60 Hz
    let mut last = Instant::now();
    loop {
        let now = Instant::now();
        let dt = (now - last).as_secs_f64();
        last = now;
        let events = match controller.tick(dt) {
            Ok(events) => events,
            Err(err) => {
                if let Err(stop_err) = controller.shutdown() {
                    log::warn!("shutdown after error also failed: {stop_err}");
                }
                return Err(err.into());
            }
        };
        for event in events {
            // Per-tick feedback is too chatty for info.
            if matches!(event, SessionEvent::Feedback { .. }) {
                log::debug!("{event:?}");
            } else {
                log::info!("{event:?}");
            }
        }
        if controller.phase() == SessionPhase::SessionComplete {
            break;
        }
        thread::sleep(tick);
    }
    log::info!(
        "session complete: {} recorded, {} rejected, artifacts in {}",
        controller.recorder().recorded(),
        controller.recorder().rejected(),
        controller.recorder().session_dir().display()
    );
    Ok(())
}
