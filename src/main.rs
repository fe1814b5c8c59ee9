//! pixelscribe - Local text grabbing and object detection
//!
//! Extracts text from images with PaddleOCR and outlines objects found by a
//! COCO detector, both running locally through ONNX Runtime.

mod app;
mod config;
mod error;
mod intake;
mod pages;
mod render;
mod session;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::PixelScribeApp;
use crate::config::AppConfig;
use crate::intake::FileIntake;
use crate::render::SystemClipboard;

/// pixelscribe - grab text and detect objects in images
#[derive(Parser, Debug)]
#[command(name = "pixelscribe")]
#[command(about = "Extract text from images and outline the objects in them")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the text of an image
    Ocr {
        /// Image to read
        file: PathBuf,

        /// Copy the extracted text to the clipboard
        #[arg(long)]
        copy: bool,

        /// Print the recognised regions as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Detect objects and draw their bounding boxes
    Detect {
        /// Image to analyse
        file: PathBuf,

        /// Where to write the annotated image (defaults to <name>.detected.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the predictions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show model availability
    Models {
        /// Download missing models
        #[arg(long)]
        download: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_or_default_config(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let app = PixelScribeApp::new(config)?;

    match args.command {
        Command::Ocr { file, copy, json } => run_ocr(&app, &file, copy, json).await,
        Command::Detect { file, output, json } => run_detect(&app, &file, output, json).await,
        Command::Models { download } => run_models(&app, download).await,
    }
}

/// Load configuration from the given file, or from the user config
/// directory (creating it with defaults on first run)
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return config::load_config(path);
    }

    match storage::get_config_dir() {
        Ok(config_dir) => config::load_or_create_config(&config_dir.join("config.toml")),
        Err(e) => {
            eprintln!("Using default configuration: {:#}", e);
            Ok(AppConfig::default())
        }
    }
}

/// Print each status line as the page shows it
fn echo_status(mut statuses: watch::Receiver<String>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while statuses.changed().await.is_ok() {
            let status = statuses.borrow_and_update().clone();
            if !status.is_empty() {
                eprintln!("{}", status);
            }
        }
    })
}

async fn run_ocr(app: &PixelScribeApp, path: &Path, copy: bool, json: bool) -> Result<()> {
    let page = app.ocr_page(Arc::new(SystemClipboard::new()));
    let echo = echo_status(page.subscribe_status());

    let file = FileIntake::read(Some(path))
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    if let Some(run) = page.select_file(file) {
        run.await?;
    }

    let view = page.view();
    if json {
        println!("{}", serde_json::to_string_pretty(&view.regions)?);
    } else {
        println!("{}", view.panel.text);
    }

    if copy {
        match page.copy().await {
            Some(revert) => {
                eprintln!("{}", page.view().panel.copy.label);
                revert.await?;
            }
            None => info!("Nothing copied"),
        }
    }

    drop(page);
    let _ = echo.await;
    Ok(())
}

async fn run_detect(
    app: &PixelScribeApp,
    path: &Path,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let page = app.detection_page();
    let echo = echo_status(page.subscribe_status());

    if app.load_detector(&page).await {
        let file = FileIntake::read(Some(path))
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;

        if let Some(run) = page.select_file(file) {
            if let Some(predictions) = run.await? {
                if json {
                    println!("{}", serde_json::to_string_pretty(&predictions)?);
                }
                let output = output.unwrap_or_else(|| PixelScribeApp::annotated_path(path));
                page.with_canvas(|canvas| canvas.save(&output))?;
                info!("Annotated image written to {:?}", output);
            }
        }
    }

    drop(page);
    let _ = echo.await;
    Ok(())
}

async fn run_models(app: &PixelScribeApp, download: bool) -> Result<()> {
    let models = app.models();

    if download {
        models.ensure_all_models().await?;
    }

    println!("Models directory: {}", models.models_dir().display());
    println!(
        "Text grabber models: {}",
        if models.are_ocr_models_ready() { "ready" } else { "incomplete" }
    );
    for status in models.model_status() {
        println!(
            "  {:<22} {:<10} {}",
            status.kind.display_name(),
            if status.available { "ready" } else { "missing" },
            status
                .size_bytes
                .map(|b| format!("{} bytes", b))
                .unwrap_or_default()
        );
    }
    Ok(())
}
