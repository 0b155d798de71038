//! Label Inspector - production-line label inspection
//!
//! Command line front end: batch inspection of image files and interactive
//! validation sessions against the reference catalog.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use label_inspector::capture::frame::Frame;
use label_inspector::capture::{FramePump, ImageDirSource, PumpSource};
use label_inspector::config::{self, AppConfig};
use label_inspector::error::SessionError;
use label_inspector::inspection::{InspectionResult, InspectionSession, PipelineBuilder, SessionState};
use label_inspector::storage::{self, JsonCatalog, JsonLinesSink};
use label_inspector::vision::annotate::{annotate_frame, annotate_label};

/// How long the session waits for the frame pump per attempt
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);
/// Consecutive missing frames before a session run gives up
const MAX_MISSED_FRAMES: u32 = 5;

/// Label Inspector - locate, read and validate product labels
#[derive(Parser, Debug)]
#[command(name = "label-inspector")]
#[command(about = "Production-line label inspection")]
struct Args {
    /// Configuration file (defaults to config.toml in the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write annotated images of every inspected file to this directory
    #[arg(long, global = true)]
    annotate_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect image files and print one JSON result per image
    Inspect {
        /// Image files
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Validate a label against the catalog within a bounded number of attempts
    Validate {
        /// Customer the label belongs to
        #[arg(long)]
        customer: String,
        /// Label id in the reference catalog
        #[arg(long)]
        label: String,
        /// Directory of frames to use as the camera
        #[arg(long)]
        images: Option<PathBuf>,
        /// Override the configured number of attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// List reference labels in the catalog
    Labels {
        /// Only labels of this customer
        #[arg(long)]
        customer: Option<String>,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Serialize)]
struct InspectLine<'a> {
    image: &'a Path,
    result: &'a InspectionResult,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::get_config_dir()?.join("config.toml"),
    };

    match args.command {
        Command::InitConfig { force } => {
            init_config(&config_path, force)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Inspect { images } => {
            let config = load_or_create_config(&config_path, args.config.is_some())?;
            run_inspect(&config, &images, args.annotate_dir.as_deref())
        }
        Command::Labels { customer } => {
            let config = load_or_create_config(&config_path, args.config.is_some())?;
            list_labels(&config, customer.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate {
            customer,
            label,
            images,
            max_attempts,
        } => {
            let config = load_or_create_config(&config_path, args.config.is_some())?;
            run_validate(&config, &customer, &label, images, max_attempts)
        }
    }
}

/// Load configuration from file or fall back to defaults
///
/// An explicitly given file has to exist.
fn load_or_create_config(path: &Path, explicit: bool) -> Result<AppConfig> {
    if path.exists() || explicit {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }
    config::save_config(&AppConfig::default(), path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn pipeline_builder(config: &AppConfig) -> Result<PipelineBuilder> {
    let mut builder = PipelineBuilder::from_config(config)?;
    if let Some(path) = &config.storage.results_path {
        let sink = JsonLinesSink::open(path)?;
        info!("Recording results to {}", sink.path().display());
        builder = builder.sink(Box::new(sink));
    }
    Ok(builder)
}

fn run_inspect(config: &AppConfig, images: &[PathBuf], annotate_dir: Option<&Path>) -> Result<ExitCode> {
    let pipeline = pipeline_builder(config)?.build();
    info!("Backends: {}", pipeline.backends());

    if let Some(dir) = annotate_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    for path in images {
        let frame = match image::open(path) {
            Ok(image) => Frame::from_image(image),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let inspection = pipeline.inspect(&frame);
        println!(
            "{}",
            serde_json::to_string(&InspectLine {
                image: path,
                result: &inspection.result,
            })?
        );

        if let Some(dir) = annotate_dir {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("frame");
            annotate_frame(&frame, &inspection.result)
                .save(dir.join(format!("{}_annotated.png", stem)))
                .context("Failed to write annotated frame")?;
            if !inspection.label.is_empty() {
                annotate_label(&inspection.label, &inspection.result)
                    .save(dir.join(format!("{}_label.png", stem)))
                    .context("Failed to write annotated label")?;
            }
        }
    }

    let stats = pipeline.statistics();
    println!("{}", stats);

    Ok(if stats.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_catalog(config: &AppConfig) -> Result<JsonCatalog> {
    let catalog_path = config
        .storage
        .catalog_path
        .as_ref()
        .context("No reference catalog configured (storage.catalog_path)")?;
    JsonCatalog::load(catalog_path).with_context(|| format!("Failed to load catalog {}", catalog_path.display()))
}

fn list_labels(config: &AppConfig, customer: Option<&str>) -> Result<()> {
    let catalog = load_catalog(config)?;
    let entries = match customer {
        Some(customer) => catalog.labels_for_customer(customer),
        None => catalog.entries(),
    };

    for entry in entries {
        println!(
            "{}\t{}\t{}\t{}",
            entry.id,
            entry.customer_id,
            entry.name,
            entry.keywords.join(", ")
        );
    }
    Ok(())
}

fn run_validate(
    config: &AppConfig,
    customer: &str,
    label: &str,
    images: Option<PathBuf>,
    max_attempts: Option<u32>,
) -> Result<ExitCode> {
    let catalog = load_catalog(config)?;

    let image_dir = images
        .or_else(|| config.capture.image_dir.clone())
        .context("No frame source: pass --images or set capture.image_dir")?;
    let source = ImageDirSource::open(&image_dir)?;
    let pump = FramePump::start(Box::new(source), config.capture.max_fps)?;
    let mut frames = PumpSource::new(pump, FRAME_TIMEOUT);

    let pipeline = Arc::new(pipeline_builder(config)?.build());
    info!("Backends: {}", pipeline.backends());
    let mut session = InspectionSession::new(
        pipeline,
        Arc::new(catalog),
        max_attempts.unwrap_or(config.inspection.max_attempts),
    )?;
    session.arm(customer, label)?;

    let mut missed = 0;
    while !session.current_state().is_terminal() {
        match session.validate_from(&mut frames) {
            Ok(attempt) => {
                missed = 0;
                println!(
                    "Attempt {}/{}\n{}\n",
                    attempt.attempt_number,
                    attempt.max_attempts,
                    attempt.summary()
                );
            }
            Err(SessionError::Acquisition(reason)) => {
                missed += 1;
                warn!("No frame ({}), {} of {}", reason, missed, MAX_MISSED_FRAMES);
                if missed >= MAX_MISSED_FRAMES {
                    bail!("Frame source stopped delivering frames");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let state = session.current_state();
    info!("Session {} finished: {}", session.id(), state);

    Ok(if state == SessionState::Accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
