//! FleetReplay CLI - capture and replay fleet gateway traffic

mod server;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fleetreplay_core::capture::CaptureFile;
use fleetreplay_core::config::FleetReplayConfig;
use fleetreplay_core::replay::{CaptureInfo, ReplayEngine, ReplayTimeline, restore_assets};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "fleetreplay")]
#[command(about = "Record fleet gateway traffic and replay it later", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to fleetreplay.toml + environment)
    #[arg(short, long, global = true, env = "FLEETREPLAY_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the `/_internal` and `/trajectory` routes
    Serve {
        /// Socket address to listen on
        #[arg(long)]
        bind: Option<String>,

        /// Record incoming traffic
        #[arg(long)]
        capture: bool,

        /// Serve trajectories only from the store, never upstream
        #[arg(long)]
        replay_mode: bool,

        /// Preload the trajectory store from this file
        #[arg(long)]
        data_file: Option<PathBuf>,
    },

    /// Inject a capture file into a running gateway
    Inject {
        /// Capture session file
        file: PathBuf,

        /// Replay the full history with its original timing
        #[arg(long)]
        replay: bool,

        /// Replay speed multiplier
        #[arg(long)]
        speed: Option<f64>,

        /// Gateway base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Print the capture summary and stop
        #[arg(long)]
        info_only: bool,

        /// Gateway asset cache directory to restore images into
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Summarize a capture file
    Info {
        /// Capture session file
        file: PathBuf,
    },

    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("fleetreplay {}", env!("CARGO_PKG_VERSION"));
            println!("fleetreplay-core {}", fleetreplay_core::VERSION);
        }
        Commands::Info { file } => {
            let capture = load_capture(&file).await?;
            println!("{}", CaptureInfo::from_file(&capture));
        }
        Commands::Serve {
            bind,
            capture,
            replay_mode,
            data_file,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.capture.enabled |= capture;
            config.trajectory.replay_mode |= replay_mode;
            if data_file.is_some() {
                config.trajectory.data_file = data_file;
            }
            config.validate()?;

            server::serve(config, shutdown_on_ctrl_c()).await?;
        }
        Commands::Inject {
            file,
            replay,
            speed,
            api_url,
            info_only,
            cache_dir,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(speed) = speed {
                config.replay.speed = speed;
            }
            if let Some(api_url) = api_url {
                config.replay.api_url = api_url;
            }
            if let Some(cache_dir) = cache_dir {
                config.replay.cache_dir = cache_dir;
            }
            config.validate()?;

            let capture = load_capture(&file).await?;
            println!("{}", CaptureInfo::from_file(&capture));
            if info_only {
                return Ok(());
            }

            if let Err(e) = restore_assets(&capture, &file, &config.replay.cache_dir).await {
                tracing::warn!(error = %e, "Image restore failed");
            }

            tracing::info!(
                api = %config.replay.api_url,
                events = %config.replay.internal_url(),
                trajectory = %config.replay.trajectory_url(),
                "Connecting to gateway"
            );
            let engine = ReplayEngine::connect(config.replay.clone())
                .await?
                .with_cancel_token(shutdown_on_ctrl_c());

            let progress = if replay {
                engine.replay(ReplayTimeline::build(&capture.history)).await?
            } else {
                engine.snapshot(&capture).await?
            };

            println!(
                "Injection finished: {} sent, {} failed, {} total",
                progress.sent, progress.failed, progress.total
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<FleetReplayConfig> {
    let config = match path {
        Some(path) => FleetReplayConfig::from_file(path)?,
        None => FleetReplayConfig::load()?,
    };
    Ok(config)
}

async fn load_capture(path: &PathBuf) -> Result<CaptureFile> {
    if !path.exists() {
        bail!("Capture file not found: {}", path.display());
    }
    tracing::info!(path = %path.display(), "Loading capture file");
    CaptureFile::load(path)
        .await
        .with_context(|| format!("Failed to load {}", path.display()))
}

/// Token cancelled on the first Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}
