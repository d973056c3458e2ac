use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deepcheck_core::{
    AnalysisClient, HttpTransport, ResultView, UploadedFile, WorkflowController, WorkflowState,
};
use deepcheck_hw::{CameraBackend, CaptureConstraints, CaptureManager};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "deepcheck", about = "Check a face photo for deepfake manipulation", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a PNG or JPEG file
    Analyze {
        /// Image to submit
        path: PathBuf,
    },
    /// Take one still from the camera and analyze it
    Capture {
        /// V4L2 device path (overrides DEEPCHECK_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    match cli.command {
        Commands::Analyze { path } => {
            let mut controller = build_controller(&config, &config.camera_device)?;
            let file = UploadedFile::read(&path)?;
            controller
                .upload(file)
                .with_context(|| format!("{} was rejected", path.display()))?;
            finish(&mut controller).await?;
        }
        Commands::Capture { device } => {
            let device = device.unwrap_or_else(|| config.camera_device.clone());
            let mut controller = build_controller(&config, &device)?;
            controller
                .start_capture()
                .await
                .with_context(|| format!("opening camera {device}"))?;
            println!("Camera ready on {device}, taking a still...");
            controller.capture().context("capturing still")?;
            finish(&mut controller).await?;
        }
        Commands::Devices => list_devices(),
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

fn build_controller(config: &Config, device: &str) -> Result<WorkflowController> {
    let transport = HttpTransport::new(config.request_timeout()).context("building HTTP client")?;
    let client = AnalysisClient::new(&config.endpoint, Arc::new(transport))?;
    let constraints = CaptureConstraints {
        width: config.capture_width,
        height: config.capture_height,
        ..CaptureConstraints::default()
    };
    let capture = CaptureManager::new(camera_backend(config, device), constraints);
    tracing::debug!(endpoint = %client.endpoint(), device, "workflow ready");
    Ok(WorkflowController::new(capture, client, config.workflow_settings()?))
}

#[cfg(target_os = "linux")]
fn camera_backend(config: &Config, device: &str) -> Arc<dyn CameraBackend> {
    Arc::new(deepcheck_hw::V4l2Backend::new(device, config.warmup_frames))
}

#[cfg(not(target_os = "linux"))]
fn camera_backend(_config: &Config, _device: &str) -> Arc<dyn CameraBackend> {
    Arc::new(unsupported::NoCamera)
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use deepcheck_hw::{CameraBackend, CameraStream, CaptureConstraints, CaptureError};

    pub struct NoCamera;

    impl CameraBackend for NoCamera {
        fn open(&self, _: &CaptureConstraints) -> Result<Box<dyn CameraStream>, CaptureError> {
            Err(CaptureError::DeviceUnavailable(
                "camera capture needs V4L2 (Linux)".into(),
            ))
        }
    }
}

/// Wait for the verdict, printing progress. Ctrl-C abandons the attempt.
async fn finish(controller: &mut WorkflowController) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut shown = None;
    while matches!(controller.state(), WorkflowState::Submitting { .. }) {
        tokio::select! {
            _ = &mut ctrl_c => {
                controller.reset();
                println!();
                println!("Cancelled.");
                return Ok(());
            }
            changed = controller.step() => {
                if changed && controller.progress() != shown {
                    shown = controller.progress();
                    if let Some(percent) = shown {
                        print!("\rAnalyzing... {percent:>3}%");
                        let _ = std::io::stdout().flush();
                    }
                }
            }
        }
    }
    println!();

    match controller.state() {
        WorkflowState::Resolved { image, result } => {
            let view = ResultView::from(result);
            println!("{}", view.headline);
            println!("  {}", view.summary);
            println!("  Confidence: {}%", view.confidence_percent);
            println!("  Emotion:    {}", view.emotion);
            println!("  Analyzed:   {}", view.analyzed_at);
            println!("  Image:      {} ({} bytes)", image.mime(), image.len());
            if let Some(id) = result.analysis_id() {
                println!("  Record:     {id}");
            }
            Ok(())
        }
        WorkflowState::Failed(err) => bail!("analysis failed: {err}"),
        other => bail!("analysis ended unexpectedly ({})", other.name()),
    }
}

#[cfg(target_os = "linux")]
fn list_devices() {
    let devices = deepcheck_hw::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!(
            "{}  {} [{}] {}  formats: {}",
            dev.path,
            dev.card,
            dev.driver,
            dev.bus,
            dev.formats.join(",")
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn list_devices() {
    println!("Camera listing needs V4L2 (Linux)");
}
