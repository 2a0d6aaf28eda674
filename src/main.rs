use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use palmread::analysis::ChatCompletionsClient;
use palmread::core::store::{DataId, ImageVault, SqliteStore};
use palmread::detection::landmarks::{
    JsonLandmarkDetector, LandmarkDetector, StaticLandmarkDetector,
};
use palmread::{CorrectionPayload, PalmConfig, PalmService, ServiceError};

#[derive(Parser)]
#[command(name = "palmread")]
#[command(about = "Detect palm crease lines and read them")]
struct Cli {
    /// JSON config file; missing fields keep their defaults
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database holding the detections
    #[arg(long, global = true, value_name = "DB", default_value = "palmread.db")]
    store: PathBuf,

    /// Directory for uploaded and annotated images
    #[arg(long, global = true, value_name = "DIR")]
    images: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the life, heart and head lines in a palm photo
    Detect {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Hand landmarks exported by an external detector (JSON)
        #[arg(long, value_name = "JSON")]
        landmarks: PathBuf,

        /// Save debug outputs to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },
    /// Describe the features of a stored detection and interpret them
    Analyze {
        #[arg(value_name = "DATA_ID")]
        data_id: DataId,
    },
    /// Replace the lines of a stored detection with a corrected set
    Correct {
        #[arg(value_name = "DATA_ID")]
        data_id: DataId,

        /// JSON file of the form {"life_line": [[[x, y], ...]], "heart_line": ..., "head_line": ...}
        #[arg(long, value_name = "JSON")]
        lines: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "palmread=debug" } else { "palmread=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Cli) -> anyhow::Result<PalmConfig> {
    let config = match &args.config {
        Some(path) => PalmConfig::from_file(path)?,
        None => PalmConfig::default(),
    };
    let config = config.with_env_overrides();
    let image_dir = args
        .images
        .clone()
        .or_else(|| config.storage.image_dir.clone())
        .unwrap_or_else(|| default_image_dir(&args.store));
    Ok(config.with_image_dir(image_dir))
}

/// `images/` next to the database file.
fn default_image_dir(db_file: &Path) -> PathBuf {
    db_file
        .parent()
        .map(|p| p.join("images"))
        .unwrap_or_else(|| PathBuf::from("images"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let vault = Arc::new(ImageVault::from_config(&config.storage)?);
    let store = Arc::new(SqliteStore::open(&args.store).await?);
    let model = ChatCompletionsClient::from_config(&config.interpretation)?;
    if args.verbose {
        match &model {
            Some(client) => println!("Remote interpretation: {}", client.model()),
            None => println!("No API key set, using local interpretation"),
        }
    }

    // Only detection looks at landmarks
    let landmark_detector: Arc<dyn LandmarkDetector> = match &args.command {
        Command::Detect { landmarks, .. } => Arc::new(JsonLandmarkDetector::new(landmarks)),
        _ => Arc::new(StaticLandmarkDetector::new(None)),
    };
    let mut service = PalmService::new(
        config,
        landmark_detector,
        store.clone(),
        vault,
        model,
    )
    .with_verbose(args.verbose);

    let outcome: Result<(), ServiceError> = match &args.command {
        Command::Detect {
            image_path,
            debug_out,
            ..
        } => {
            if args.verbose {
                println!("Loading image: {:?}", image_path);
            }
            let bytes = tokio::fs::read(image_path)
                .await
                .with_context(|| format!("Failed to read image {:?}", image_path))?;
            if let Some(dir) = debug_out {
                service = service.with_debug(dir.clone());
            }
            match service.detect(bytes).await {
                Ok(result) => print_json(&result).map_err(ServiceError::from),
                Err(e) => Err(e),
            }
        }
        Command::Analyze { data_id } => match service.analyze_hand(data_id).await {
            Ok(reading) => print_json(&reading).map_err(ServiceError::from),
            Err(e) => Err(e),
        },
        Command::Correct { data_id, lines } => {
            let raw = tokio::fs::read_to_string(lines)
                .await
                .with_context(|| format!("Failed to read corrected lines {:?}", lines))?;
            let payload: CorrectionPayload = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid corrected lines {:?}", lines))?;
            match service.correct(data_id, &payload).await {
                Ok(ack) => print_json(&ack).map_err(ServiceError::from),
                Err(e) => Err(e),
            }
        }
    };

    store.close().await;

    if let Err(e) = outcome {
        print_json(&e.to_body())?;
        std::process::exit(1);
    }
    Ok(())
}
