use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scanready::{
    analysis::{average_brightness, is_too_dark},
    capture::{compress, crop_and_upscale},
    BoundingBox, FrameData, GlareDetector, PixelBuffer, ProximityClassifier, ScanreadyConfig,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "scanready")]
#[command(about = "Offline tools for the scan readiness engine")]
#[command(version)]
#[command(long_about = "Runs the glare, proximity and compression stages of the scan \
readiness engine on still images, and inspects or validates its configuration.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scanready.toml", global = true)]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format: json, pretty, or compact
    #[arg(long, value_name = "FORMAT", global = true)]
    log_format: Option<String>,

    /// Also write daily rolling log files into this directory
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run glare and darkness analysis on an image
    Analyze {
        image: PathBuf,
        /// Save the annotated glare mask here
        #[arg(long)]
        annotated: Option<PathBuf>,
    },
    /// Classify proximity for a detected box on an image
    Classify {
        image: PathBuf,
        /// Box edges: left top right bottom
        #[arg(long, required = true, num_args = 4, value_names = ["LEFT", "TOP", "RIGHT", "BOTTOM"], allow_negative_numbers = true)]
        bbox: Vec<f32>,
    },
    /// Crop (optionally) and compress an image toward the upload size target
    Compress {
        image: PathBuf,
        /// Output JPEG path
        #[arg(short, long)]
        output: PathBuf,
        /// Crop around this box before compressing: left top right bottom
        #[arg(long, num_args = 4, value_names = ["LEFT", "TOP", "RIGHT", "BOTTOM"], allow_negative_numbers = true)]
        bbox: Option<Vec<f32>>,
    },
    /// Print the default configuration in TOML format
    PrintConfig,
    /// Validate the configuration file and exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::PrintConfig = args.command {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;
    info!("scanready v{}", env!("CARGO_PKG_VERSION"));

    let config = match ScanreadyConfig::load_from_file(&args.config) {
        Ok(config) => {
            debug!("Configuration loaded from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Command::ValidateConfig = args.command {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate().context("invalid configuration")?;

    match args.command {
        Command::Analyze { image, annotated } => analyze(&config, &image, annotated.as_deref()).await,
        Command::Classify { image, bbox } => classify(&config, &image, &bbox).await,
        Command::Compress {
            image,
            output,
            bbox,
        } => compress_image(&config, &image, &output, bbox.as_deref()).await,
        Command::PrintConfig | Command::ValidateConfig => Ok(()),
    }
}

fn load_image(path: &Path) -> Result<PixelBuffer> {
    let image = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgb8();
    debug!(
        "Loaded {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}

fn parse_bbox(edges: &[f32]) -> Result<BoundingBox> {
    match edges {
        [left, top, right, bottom] => Ok(BoundingBox::new(*left, *top, *right, *bottom)?),
        _ => anyhow::bail!("a box needs exactly four edges"),
    }
}

async fn analyze(config: &ScanreadyConfig, path: &Path, annotated: Option<&Path>) -> Result<()> {
    let image = load_image(path)?;
    let detector = GlareDetector::new(config.analysis.clone());
    let darkness_threshold = config.analysis.darkness_threshold;

    let (report, brightness, dark) = tokio::task::spawn_blocking(move || {
        let report = detector.detect(&image);
        let brightness = average_brightness(&image);
        let dark = is_too_dark(&image, darkness_threshold);
        (report, brightness, dark)
    })
    .await?;

    println!("glare:      {}", report.is_glare);
    for region in &report.regions {
        let c = &region.component;
        println!(
            "  region {}: ({}, {})-({}, {}) area {} white {:.2}",
            c.label, c.min_x, c.min_y, c.max_x, c.max_y, c.area, region.white_proportion
        );
    }
    println!("brightness: {:.1}", brightness);
    println!("too dark:   {}", dark);

    if let Some(out) = annotated {
        report
            .annotated
            .save(out)
            .with_context(|| format!("failed to save {}", out.display()))?;
        info!("Annotated mask written to {}", out.display());
    }
    Ok(())
}

async fn classify(config: &ScanreadyConfig, path: &Path, edges: &[f32]) -> Result<()> {
    let bbox = parse_bbox(edges)?;
    let frame = FrameData::new(0, load_image(path)?);
    let classifier = ProximityClassifier::new(config.proximity.clone(), config.analysis.clone());

    let state = classifier.classify_detection(&frame, &bbox).await;
    println!(
        "relative size: {:.3}",
        bbox.width() / frame.width().max(1) as f32
    );
    println!("proximity:     {:?}", state);
    Ok(())
}

async fn compress_image(
    config: &ScanreadyConfig,
    path: &Path,
    output: &Path,
    edges: Option<&[f32]>,
) -> Result<()> {
    let image = load_image(path)?;
    let bbox = edges.map(parse_bbox).transpose()?;
    let padding = config.capture.crop_padding;
    let compression = config.compression.clone();

    let compressed = tokio::task::spawn_blocking(move || {
        let source = match bbox {
            Some(bbox) => crop_and_upscale(&image, &bbox, padding)?,
            None => image,
        };
        compress(&source, &compression)
    })
    .await??;

    compressed.persist(output).await?;
    println!(
        "{}x{} q{} {} bytes -> {}",
        compressed.width,
        compressed.height,
        compressed.quality,
        compressed.len(),
        output.display()
    );
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scanready={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .with_writer(std::io::stderr)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "scanready.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# scanready configuration file");
    println!("# Every value below is the built-in default; SCANREADY_<SECTION>__<KEY>");
    println!("# environment variables override the file.");
    println!();
    let rendered = toml::to_string_pretty(&ScanreadyConfig::default())
        .context("failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}
