// src/main.rs
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::ai::{GeminiModel, DIAGNOSIS_PROMPT, GENERIC_FAILURE_MESSAGE};
use crate::capture::{CameraManager, CapturedImage};
use crate::config::{Config, Overrides};
use crate::session::{run_analysis, AnalysisState, Session};

mod ai;
mod capture;
mod config;
mod error;
mod gui;
mod session;

#[derive(Parser)]
#[command(name = "toothsnap")]
#[command(about = "Dental AI Analyzer: capture your teeth and get a Gemini diagnosis", long_about = None)]
struct Cli {
    /// Gemini model name (default: gemini-2.0-flash, or GEMINI_MODEL)
    #[arg(long, short = 'm', global = true)]
    model: Option<String>,

    /// Request timeout in seconds (default: 120, or TOOTHSNAP_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the graphical user interface (default)
    Gui,
    /// Capture one image and print its diagnosis
    Analyze {
        /// Analyze an image file instead of using the camera
        #[arg(long, conflicts_with = "camera")]
        image: Option<PathBuf>,

        /// Camera index to capture from (default: TOOTHSNAP_CAMERA or 0)
        #[arg(long)]
        camera: Option<u32>,
    },
    /// List available cameras
    ListCameras,
    /// Check that the API key and model are accepted by Gemini
    Check,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info")
    );

    let cli = Cli::parse();

    if let Some(Commands::ListCameras) = cli.command {
        return list_cameras();
    }

    let overrides = Overrides {
        model: cli.model,
        timeout_secs: cli.timeout,
    };
    // A missing key stops here, before any window or request.
    let config = match Config::from_env(&overrides) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };
    info!("Using model {} (timeout {}s)", config.model, config.timeout.as_secs());

    match cli.command.unwrap_or(Commands::Gui) {
        Commands::Gui => gui::run_gui(config),
        Commands::Analyze { image, camera } => run_analyze_cli(config, image, camera),
        Commands::Check => check_model(config),
        Commands::ListCameras => list_cameras(),
    }
}

fn run_analyze_cli(config: Arc<Config>, image: Option<PathBuf>, camera: Option<u32>) -> Result<()> {
    info!("Starting headless analysis");

    let model = GeminiModel::new(Arc::clone(&config))?;

    let captured = match image {
        Some(path) => CapturedImage::from_file(&path)?,
        None => {
            let index = camera.unwrap_or(config.camera_index);
            CameraManager::new(index).capture_still()?
        }
    };
    let (width, height) = captured.dimensions();
    info!("Captured image: {}x{} at {}", width, height, captured.captured_at().format("%H:%M:%S"));

    let session = Mutex::new(Session::new());
    session.lock().unwrap().capture(captured);

    println!("Analyzing image with AI... This may take a moment...");
    run_analysis(&session, &model, DIAGNOSIS_PROMPT);

    let state = session.lock().unwrap().state().clone();
    match state {
        AnalysisState::Succeeded { diagnosis, .. } => {
            println!("\n=== AI Diagnosis (Gemini: {}) ===", config.model);
            println!("{}", diagnosis);
            println!("===========================================\n");
            Ok(())
        }
        _ => {
            println!("\n{}", GENERIC_FAILURE_MESSAGE);
            Err(anyhow!("Diagnosis failed"))
        }
    }
}

fn list_cameras() -> Result<()> {
    info!("Listing available cameras...");

    let cameras = capture::list_cameras()?;
    if cameras.is_empty() {
        println!("\nNo cameras found");
        return Ok(());
    }
    println!("\nAvailable cameras:");
    for camera in cameras {
        println!("  {}. {}", camera.index, camera.name);
    }
    println!();
    Ok(())
}

fn check_model(config: Arc<Config>) -> Result<()> {
    info!("Checking Gemini model {} at {}...", config.model, config.api_base);

    let model = GeminiModel::new(Arc::clone(&config))?;
    match model.verify() {
        Ok(()) => {
            println!("✓ Model {} is available", config.model);
            Ok(())
        }
        Err(e) => {
            println!("✗ {}", e);
            println!("\nTroubleshooting:");
            println!("  1. Check GOOGLE_API_KEY in your environment or .env file");
            println!("  2. Check the model name (--model or GEMINI_MODEL)");
            Err(e.into())
        }
    }
}
