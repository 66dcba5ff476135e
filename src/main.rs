use anyhow::{Context, Result};
use clap::Parser;
use image::Rgba;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use vidmatte::capture::WebcamCapture;
use vidmatte::engine::{OrtEngine, OrtOptions};
use vidmatte::output::V4L2Output;
use vidmatte::{DriverState, MattingConfig, MattingPipeline, RecurrentMode, Resolution};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1920)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 1080)]
    capture_height: u32,

    /// Output resolution width (overrides the config file)
    #[arg(long)]
    output_width: Option<u32>,

    /// Output resolution height (overrides the config file)
    #[arg(long)]
    output_height: Option<u32>,

    /// Target ticks per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to the RobustVideoMatting ONNX model
    #[arg(long)]
    model: PathBuf,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Feed zero recurrent state every frame
    #[arg(long)]
    stateless: bool,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,
}

fn load_config(args: &Args) -> Result<MattingConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            MattingConfig::from_toml_str(&raw)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        }
        None => MattingConfig::default(),
    };

    if let Some(width) = args.output_width {
        config.output_resolution.width = width;
    }
    if let Some(height) = args.output_height {
        config.output_resolution.height = height;
    }
    if args.stateless {
        config.recurrent_mode = RecurrentMode::Stateless;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = load_config(&args)?;
    let Resolution { width, height } = config.output_resolution;

    tracing::info!("vidmatte starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", width, height);
    tracing::info!("Target FPS: {}", args.fps);

    let capture = WebcamCapture::new(args.input_device, args.capture_width, args.capture_height)
        .context("Failed to initialize webcam capture")?;

    let output = V4L2Output::new(
        &args.output_device,
        width,
        height,
        Rgba([0, 177, 64, 255]),
        args.show_matte,
    )
    .context("Failed to initialize v4l2loopback output")?;

    let engine = OrtEngine::load(&args.model, &OrtOptions::default())
        .context("Failed to load matting model")?;

    let mut pipeline = MattingPipeline::new(engine, config, Some(Box::new(output)));
    pipeline.set_source(Box::new(capture));

    run_pipeline(&mut pipeline, args.fps);

    Ok(())
}

fn run_pipeline(pipeline: &mut MattingPipeline<OrtEngine>, target_fps: u32) {
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let started = Instant::now();
    let mut ticks = 0u64;
    let mut last_completed = 0u64;

    // Stage timings accumulated since the last stat line
    let mut update_time = Duration::ZERO;
    let mut tick_time = Duration::ZERO;
    let mut window_ticks = 0u32;

    tracing::info!("Starting main pipeline loop");
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let tick_start = Instant::now();

        pipeline.update();
        let updated = Instant::now();
        update_time += updated - tick_start;

        let state = pipeline.tick();
        tick_time += updated.elapsed();
        if state == DriverState::ShutDown {
            break;
        }
        ticks += 1;
        window_ticks += 1;

        let stats = pipeline.driver().stats();
        if stats.completed >= last_completed + 30 {
            let steps = (stats.completed - last_completed) as f64;
            last_completed = stats.completed;
            let elapsed = started.elapsed().as_secs_f64();
            let per_tick = |total: Duration| total.as_secs_f64() * 1000.0 / window_ticks as f64;
            tracing::info!(
                "Frame {}: update={:.2}ms, tick={:.2}ms, step={:.2}ms (ticks={}, failed={}, idle={}, fps={:.1})",
                stats.completed,
                per_tick(update_time),
                per_tick(tick_time),
                (update_time + tick_time).as_secs_f64() * 1000.0 / steps,
                ticks,
                stats.failed,
                stats.idle_ticks,
                stats.completed as f64 / elapsed
            );
            update_time = Duration::ZERO;
            tick_time = Duration::ZERO;
            window_ticks = 0;
        }

        // Frame rate limiting
        let elapsed = tick_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    pipeline.shutdown();
}
