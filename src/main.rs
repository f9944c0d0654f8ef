//! LED cube CLI - Play a JSON animation on the cube or in the terminal simulator.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use clap::{ArgAction, Parser};
use log::info;

use led_cube::{
    animation::{AnimationWriter, JsonFrameSource},
    cube::{Cube, HardwareCube, SimulatorCube},
    playback::{LoopExit, RenderLoop},
    schema::{CubeConfig, Pattern},
};

#[derive(Parser, Debug)]
#[command(name = "led-cube", version, about)]
struct Cli {
    /// Render to the terminal simulator instead of the hardware strips.
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    mock: bool,

    /// Animation file to play (or to write with --generate).
    #[arg(long, default_value = "animation.json")]
    animation: PathBuf,

    /// Cube configuration JSON. Built-in defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,

    /// Write the animation described by this pattern JSON and exit.
    #[arg(long, value_name = "PATTERN")]
    generate: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    if let Some(pattern) = &cli.generate {
        return generate(pattern, &cli.animation, &config);
    }
    play(&cli, &config)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CubeConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse config '{}'", path.display()))?
        }
        None => CubeConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn generate(pattern_path: &Path, out: &Path, config: &CubeConfig) -> anyhow::Result<()> {
    let text = fs::read_to_string(pattern_path)
        .with_context(|| format!("read pattern '{}'", pattern_path.display()))?;
    let pattern: Pattern = serde_json::from_str(&text)
        .with_context(|| format!("parse pattern '{}'", pattern_path.display()))?;

    let geometry = config.geometry();
    let frames = pattern.frames(geometry.shape());
    let mut writer = AnimationWriter::create(out)
        .with_context(|| format!("create animation '{}'", out.display()))?;
    for frame in &frames {
        writer.write_frame(frame)?;
    }
    let stats = writer.finalize()?;
    println!("Wrote {} to {}", stats, out.display());
    Ok(())
}

fn play(cli: &Cli, config: &CubeConfig) -> anyhow::Result<()> {
    let file = File::open(&cli.animation)
        .with_context(|| format!("open animation '{}'", cli.animation.display()))?;
    let description = cli.animation.display().to_string();
    let (source, mut errors) = JsonFrameSource::open(description.clone(), BufReader::new(file));

    // A bad file must not leave a half-initialized cube behind.
    if let Some(error) = errors.take() {
        bail!("Failed to decode frames from {description}: {error}");
    }
    let Some(source) = source else {
        bail!("No frame source for {description}");
    };

    let cube: Box<dyn Cube> = if cli.mock {
        Box::new(SimulatorCube::terminal(config.geometry().shape()))
    } else {
        Box::new(HardwareCube::open(config)?)
    };

    match RenderLoop::new(source, errors, config.frame_rate).run(cube)? {
        LoopExit::Shutdown(reason) => info!("Playback stopped: {reason}"),
        LoopExit::TickLimit => info!("Playback finished"),
    }
    Ok(())
}
