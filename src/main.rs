//! Reframe - subject-aware video cropping
//!
//! Entry point for the `reframe` binary: crops videos to a target aspect
//! ratio with either a fixed window or one that follows a detected person.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reframe::cancel::{CancellationToken, RunControl};
use reframe::cli::{Args, Commands};
use reframe::config::Config;
use reframe::crop::{CropMode, CropOutcome};
use reframe::media::TranscoderFactory;
use reframe::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "reframe.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current frame");
                token.cancel();
            }
        });
    }
    let control = |timeout: Option<u64>| {
        let control = RunControl::new(token.clone());
        match timeout {
            Some(secs) => control.with_timeout(Duration::from_secs(secs)),
            None => control,
        }
    };

    match args.command {
        Commands::Track {
            input,
            output,
            session,
            max_lost_frames,
            timeout,
        } => {
            if max_lost_frames.is_some() {
                config.tracking.max_lost_frames = max_lost_frames;
            }
            let session = session.apply(config.crop);
            let workflow = Workflow::new(config)?;
            let outcome = workflow
                .crop_video(&input, output, &session, CropMode::Tracked, &control(timeout))
                .await?;
            report_outcome(&outcome);
        }

        Commands::Crop {
            input,
            output,
            session,
            timeout,
        } => {
            let session = session.apply(config.crop);
            let workflow = Workflow::new(config)?;
            let outcome = workflow
                .crop_video(&input, output, &session, CropMode::Fixed, &control(timeout))
                .await?;
            report_outcome(&outcome);
        }

        Commands::Extract {
            input,
            start,
            end,
            output,
        } => {
            let workflow = Workflow::new(config)?;
            workflow.extract_segment(&input, &start, &end, &output).await?;
            println!("Extracted {} - {} to {}", start, end, output.display());
        }

        Commands::Preview {
            input,
            output,
            session,
        } => {
            let session = session.apply(config.crop);
            let workflow = Workflow::new(config)?;
            let window = workflow.preview(&input, &session, &output).await?;
            println!("Crop window {} outlined in {}", window, output.display());
        }

        Commands::Probe { input } => {
            let workflow = Workflow::new(config)?;
            let info = workflow.probe(&input).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Batch {
            input_dir,
            output_dir,
            mode,
            session,
            timeout,
        } => {
            let session = session.apply(config.crop);
            let workflow = Workflow::new(config)?;
            let summary = workflow
                .process_directory(&input_dir, output_dir, &session, mode, &control(timeout))
                .await?;

            for outcome in &summary.processed {
                report_outcome(outcome);
            }
            for (path, reason) in &summary.failed {
                eprintln!("Failed: {} ({})", path.display(), reason);
            }
            println!(
                "Batch finished: {} processed, {} failed",
                summary.processed.len(),
                summary.failed.len()
            );
            if !summary.failed.is_empty() {
                anyhow::bail!("{} file(s) failed", summary.failed.len());
            }
        }

        Commands::InitConfig { output, force } => {
            init_config(&output, force)?;
        }

        Commands::Check => {
            check(&config).await?;
        }
    }

    Ok(())
}

fn report_outcome(outcome: &CropOutcome) {
    println!(
        "{} -> {}x{}, initial window {}",
        outcome.output.display(),
        outcome.output_width,
        outcome.output_height,
        outcome.initial_window
    );
    if let Some(report) = &outcome.report {
        println!("  {}", report);
    }
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    Config::default().save_to_file(output)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    let transcoder = TranscoderFactory::create_transcoder(config.media.clone());
    let mut healthy = true;

    match transcoder.check_availability() {
        Ok(()) => match transcoder.version().await {
            Ok(version) => println!("ffmpeg: {}", version),
            Err(e) => {
                healthy = false;
                println!("ffmpeg: found but not runnable ({})", e);
            }
        },
        Err(e) => {
            healthy = false;
            println!("ffmpeg: {}", e);
        }
    }

    let model = Path::new(&config.detection.model_path);
    if model.exists() {
        println!("model: {}", model.display());
    } else {
        // Fixed crops still work without it
        println!("model: {} missing, tracked mode unavailable", model.display());
    }

    if !healthy {
        anyhow::bail!("media tools are not available");
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".reframe").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "reframe.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Flushes on drop, so it has to outlive main
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}", log_level, log_dir.join("reframe.log").display());
    Ok(())
}
