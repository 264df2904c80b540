use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facekit_core::validation::parse_face_records;
use facekit_core::visualize::draw_faces;
use facekit_core::{DetectorKind, FaceService, ModelRegistry, Outcome, Pipeline, RecognizerKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod image_io;

use config::Config;

const ANNOTATE_COLOR: [u8; 3] = [0, 255, 0];
const ANNOTATE_THICKNESS: u32 = 2;

#[derive(Parser)]
#[command(name = "facekit", version, about = "Face detection, embedding and verification")]
struct Cli {
    /// TOML config file (defaults to $FACEKIT_CONFIG when set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect every face in an image
    Detect {
        image: PathBuf,
        /// Detector: yunet or retinaface
        #[arg(short, long, default_value = "yunet")]
        model: DetectorKind,
        /// Minimum confidence, strictly between 0 and 1 (otherwise the model default)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Write a copy of the image with the detections drawn on it
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Find exactly one face with the multiscale YuNet search
    DetectSingle {
        image: PathBuf,
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Detect faces and compute their embeddings
    Embed {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// yunet+sface or retinaface+arcface
        #[arg(short, long, default_value = "yunet+sface")]
        pipeline: Pipeline,
        /// Require exactly one face per image
        #[arg(long)]
        single: bool,
    },
    /// Compute embeddings for faces whose geometry is already known
    Recognize {
        image: PathBuf,
        /// Recognizer: sface or arcface
        #[arg(short, long)]
        model: RecognizerKind,
        /// Face records as JSON, or @FILE to read them from a file
        #[arg(long)]
        faces: String,
    },
    /// Compare the faces of two images
    Verify {
        image_1: PathBuf,
        image_2: PathBuf,
        #[arg(short, long, default_value = "yunet+sface")]
        pipeline: Pipeline,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only JSON.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "facekit failed");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let service = Arc::new(build_service(&config)?);

    match cli.command {
        Commands::Detect {
            image,
            model,
            threshold,
            annotate,
        } => {
            let rgb = image_io::load_rgb(&image)?;
            let outcome = service.detect(&rgb, model, threshold)?;
            if let (Some(out), Outcome::Ok(result)) = (&annotate, &outcome) {
                draw_faces(&rgb, &result.faces, ANNOTATE_COLOR, ANNOTATE_THICKNESS)
                    .save(out)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                tracing::info!(path = %out.display(), faces = result.faces.len(), "annotated image written");
            }
            emit(&outcome)
        }
        Commands::DetectSingle { image, threshold } => {
            let rgb = image_io::load_rgb(&image)?;
            emit(&service.detect_single(&rgb, threshold)?)
        }
        Commands::Embed {
            images,
            pipeline,
            single,
        } => embed_images(service, images, pipeline, single).await,
        Commands::Recognize { image, model, faces } => {
            let text = read_faces_arg(&faces)?;
            let faces = match parse_face_records(Some(&text)) {
                Ok(faces) => faces,
                Err(errors) => return emit(&Outcome::<()>::from(errors)),
            };
            let rgb = image_io::load_rgb(&image)?;
            emit(&service.embed_faces(&rgb, model, &faces)?)
        }
        Commands::Verify {
            image_1,
            image_2,
            pipeline,
        } => {
            let rgb_1 = image_io::load_rgb(&image_1)?;
            let rgb_2 = image_io::load_rgb(&image_2)?;
            emit(&service.verify(&rgb_1, &rgb_2, pipeline)?)
        }
    }
}

fn build_service(config: &Config) -> Result<FaceService> {
    let registry = ModelRegistry::load(&config.model_paths(), config.intra_threads).context("failed to load models")?;
    Ok(FaceService::new(Arc::new(registry)).with_scale_factor(config.scale_factor))
}

#[derive(Serialize)]
struct ImageReport {
    image: String,
    result: serde_json::Value,
}

/// Run every image on the blocking pool; report in input order.
async fn embed_images(service: Arc<FaceService>, images: Vec<PathBuf>, pipeline: Pipeline, single: bool) -> Result<ExitCode> {
    let tasks: Vec<_> = images
        .into_iter()
        .map(|path| {
            let service = Arc::clone(&service);
            tokio::task::spawn_blocking(move || embed_one(&service, &path, pipeline, single))
        })
        .collect();

    let mut reports = Vec::with_capacity(tasks.len());
    let mut all_ok = true;
    for task in tasks {
        let (report, ok) = task.await.context("embedding worker panicked")??;
        all_ok &= ok;
        reports.push(report);
    }

    print_json(&reports)?;
    Ok(exit_code(all_ok))
}

fn embed_one(service: &FaceService, path: &Path, pipeline: Pipeline, single: bool) -> Result<(ImageReport, bool)> {
    let rgb = image_io::load_rgb(path)?;
    let (result, ok) = if single {
        let outcome = service.embed_single(&rgb, pipeline)?;
        (serde_json::to_value(&outcome)?, outcome.is_ok())
    } else {
        let outcome = service.embed_all(&rgb, pipeline)?;
        (serde_json::to_value(&outcome)?, outcome.is_ok())
    };
    let report = ImageReport {
        image: path.display().to_string(),
        result,
    };
    Ok((report, ok))
}

/// Inline JSON, or the contents of a file when prefixed with `@`.
fn read_faces_arg(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read faces file {path}")),
        None => Ok(arg.to_string()),
    }
}

fn emit<T: Serialize>(outcome: &Outcome<T>) -> Result<ExitCode> {
    print_json(outcome)?;
    Ok(exit_code(outcome.is_ok()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{text}");
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
