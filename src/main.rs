use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ode_explorer::{ExplorerConfig, FrameSequence, GridSweep};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Sweep initial velocities and record how far each trajectory moves before its event"
)]
struct Cli {
    /// TOML configuration; built-in defaults when omitted
    #[arg(long, short, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Output directory, overrides `output.directory`
    #[arg(long, short, value_hint = ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Number of animation frames, overrides `animation.frames`
    #[arg(long)]
    frames: Option<usize>,

    /// Worker threads, overrides `threads` (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match &cli.config {
        Some(path) => ExplorerConfig::load(path)?,
        None => ExplorerConfig::default(),
    };
    if let Some(dir) = cli.output {
        config.output.directory = dir;
    }
    if let Some(frames) = cli.frames {
        config.animation.frames = frames;
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    config.validate()?;

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    std::fs::create_dir_all(&config.output.directory).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output.directory.display()
        )
    })?;

    let frames = FrameSequence::next_free(&config.output.directory, &config.output.base_name);
    info!(
        group = frames.group(),
        frames = config.animation.frames,
        mode = ?config.mode,
        "starting run"
    );

    for frame in 0..config.animation.frames {
        let sweep = GridSweep::from_config(&config, frame)?;
        info!(frame, degree = config.model_for_frame(frame).degree, "computing frame");

        let field = sweep.run()?;
        if field.failures > 0 {
            warn!(
                frame,
                failures = field.failures,
                "some pixels failed to integrate and were stored as NaN"
            );
        }

        frames
            .save(frame, &field, config.tolerance)
            .with_context(|| format!("failed to save frame {}", frame))?;
    }

    Ok(())
}
