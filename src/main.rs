//! screenreel - record the X display to MP4 and manage the recordings
//!
//! Subcommands:
//! - `screenreel record` - Record until Ctrl-C, the tray Stop action, or `--duration`
//! - `screenreel list` - List saved recordings, newest first
//! - `screenreel delete <id>` - Delete a recording
//! - `screenreel config` - Print the effective configuration

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use screenreel::capture::ffmpeg::FfmpegPlatform;
use screenreel::catalog::RecordingsCatalog;
use screenreel::config::{AppConfig, FrameRate, VideoQuality};
use screenreel::screencast::{ConsentHost, ConsentRequest, RecorderEvent, SessionManager};
use screenreel::tray::{Indicator, NoIndicator, TrayIndicator};

#[derive(Debug, Parser)]
#[command(name = "screenreel")]
#[command(about = "Screen recorder with pause/resume and a recordings library")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Record the screen until stopped
    Record(RecordArgs),
    /// List saved recordings
    List,
    /// Delete a recording by id
    Delete {
        /// Recording id as printed by `list`
        id: String,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Default, PartialEq, Args)]
struct RecordArgs {
    /// Quality preset: low, medium, high or ultra
    #[arg(long, value_parser = parse_quality)]
    quality: Option<VideoQuality>,

    /// Frame rate: 15, 24, 30 or 60
    #[arg(long, value_parser = parse_frame_rate)]
    fps: Option<FrameRate>,

    /// Record without audio
    #[arg(long)]
    no_audio: bool,

    /// Skip the countdown
    #[arg(long)]
    no_countdown: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS", value_parser = parse_duration)]
    duration: Option<Duration>,
}

fn parse_quality(name: &str) -> Result<VideoQuality, String> {
    [
        VideoQuality::Low,
        VideoQuality::Medium,
        VideoQuality::High,
        VideoQuality::Ultra,
    ]
    .into_iter()
    .find(|quality| quality.name() == name)
    .ok_or_else(|| format!("unknown quality {name} (expected low, medium, high or ultra)"))
}

fn parse_frame_rate(fps: &str) -> Result<FrameRate, String> {
    let fps: u32 = fps.parse().map_err(|_| format!("{fps} is not a number"))?;
    FrameRate::try_from(fps)
}

fn parse_duration(secs: &str) -> Result<Duration, String> {
    secs.parse()
        .map(Duration::from_secs)
        .map_err(|_| format!("{secs} is not a whole number of seconds"))
}

/// Asks for capture consent on the terminal
struct TerminalConsent {
    display: String,
}

impl ConsentHost for TerminalConsent {
    fn launch_consent(&self, request: ConsentRequest) -> Result<()> {
        let display = self.display.clone();
        std::thread::Builder::new()
            .name("consent-prompt".to_string())
            .spawn(move || {
                eprint!("Allow screenreel to record display {display}? [y/N] ");
                let _ = std::io::stderr().flush();

                let mut answer = String::new();
                let granted = std::io::stdin().lock().read_line(&mut answer).is_ok()
                    && matches!(answer.trim(), "y" | "Y" | "yes");
                if granted {
                    request.grant(serde_json::json!({ "display": display }));
                } else {
                    request.deny();
                }
            })
            .context("Failed to spawn consent prompt")?;
        Ok(())
    }
}

/// Resolves when the recording ended without us, e.g. from the tray
async fn session_ended(
    events: &mut tokio::sync::broadcast::Receiver<RecorderEvent>,
) -> RecorderEvent {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(event) if event.is_terminal() => return event,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

async fn record(config: &AppConfig, args: RecordArgs) -> Result<()> {
    let platform = Arc::new(FfmpegPlatform::from_config(config));
    let display = platform.display().to_string();
    let indicator: Box<dyn Indicator> = if config.show_indicator {
        Box::new(TrayIndicator::new())
    } else {
        Box::new(NoIndicator)
    };

    let manager = SessionManager::builder(platform)
        .config(config)
        .indicator(indicator)
        .build()?;
    manager.attach_host(Arc::new(TerminalConsent { display }));

    let settings = manager.update_settings(|s| {
        if let Some(quality) = args.quality {
            s.video_quality = quality;
        }
        if let Some(fps) = args.fps {
            s.frame_rate = fps;
        }
        if args.no_audio {
            s.audio_enabled = false;
        }
        if args.no_countdown {
            s.show_countdown = false;
        }
    });

    let mut progress = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = progress.recv().await {
            match event {
                RecorderEvent::Countdown { remaining } => eprintln!("Recording in {remaining}..."),
                RecorderEvent::Started { config, output_path } => eprintln!(
                    "Recording {}x{} @ {} fps to {} (Ctrl-C to stop)",
                    config.width,
                    config.height,
                    config.frame_rate,
                    output_path.display()
                ),
                RecorderEvent::Paused => eprintln!("Paused"),
                RecorderEvent::Resumed => eprintln!("Resumed"),
                _ => {}
            }
        }
    });

    let mut events = manager.subscribe();
    manager.start(settings).await?;

    let limit = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    let ended = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received SIGINT, stopping recording");
            None
        }
        _ = limit => None,
        event = session_ended(&mut events) => Some(event),
    };

    let outcome = match ended {
        Some(RecorderEvent::Stopped(artifact)) => Ok(Some(artifact)),
        Some(RecorderEvent::StopFailed { reason }) => Err(anyhow::anyhow!(reason)),
        Some(other) => bail!("Recording ended unexpectedly: {other:?}"),
        None => manager.stop().await.map_err(anyhow::Error::from),
    };

    manager.shutdown();
    printer.abort();

    match outcome? {
        Some(artifact) => {
            println!("{}", artifact.file_path.display());
            eprintln!(
                "Saved {} ({} bytes, {:.1}s)",
                artifact.filename, artifact.size_bytes, artifact.duration_seconds
            );
        }
        None => eprintln!("Nothing was recorded"),
    }
    Ok(())
}

fn list(config: &AppConfig) -> Result<()> {
    let recordings = RecordingsCatalog::new(config.recordings_dir()).list()?;
    for recording in recordings {
        println!(
            "{}\t{}\t{}",
            recording.id,
            recording.size_bytes,
            recording.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = AppConfig::load();

    match cli.command {
        Command::Record(args) => record(&config, args).await,
        Command::List => list(&config),
        Command::Delete { id } => {
            RecordingsCatalog::new(config.recordings_dir()).delete(&id)?;
            eprintln!("Deleted {id}");
            Ok(())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
