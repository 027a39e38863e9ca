use std::env;

use anyhow::{Context, Result};
use attentrs::{
    config, AttentionClassifier, AttentionDetector, AuthContext, ClassId, FramePipeline,
    HttpReporter, SinglePoseModel, StatsClient,
};
use attentrs_vision::video::{Camera, VideoSource};
use attentrs_vision::{CameraIntrinsics, PnpSolver};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "attentrs")]
#[command(version, about = "Classroom attention detection from a webcam")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and report attention until interrupted
    Watch {
        /// Camera device (defaults to the configured one)
        #[arg(short, long)]
        camera: Option<String>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Run the pipeline on a few frames and print the verdicts
    Check {
        /// Camera device (defaults to the configured one)
        #[arg(short, long)]
        camera: Option<String>,
        /// Number of frames to classify
        #[arg(short, long, default_value_t = 5)]
        frames: usize,
    },
    /// Print the class attention percentage
    Stats {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Open config file in editor
    Config,
}

#[derive(Args)]
struct SessionArgs {
    /// Session JSON `{"token": ..., "classId": ...}` (falls back to $ATTENTRS_SESSION)
    #[arg(long, conflicts_with_all = ["token", "class_id"])]
    session: Option<String>,
    /// Bearer token
    #[arg(long, requires = "class_id")]
    token: Option<String>,
    /// Class identifier
    #[arg(long, requires = "token")]
    class_id: Option<ClassId>,
}

impl SessionArgs {
    fn resolve(self) -> Result<AuthContext> {
        match (self.session, self.token, self.class_id) {
            (Some(raw), _, _) => AuthContext::from_json(&raw),
            (None, Some(token), Some(class_id)) => Ok(AuthContext::new(token, class_id)),
            _ => AuthContext::from_env().context("No session given"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Watch { camera, session } => {
            let auth = session.resolve()?;
            let local = tokio::task::LocalSet::new();
            local.run_until(watch(&cfg, camera, auth)).await
        }
        Commands::Check { camera, frames } => check(&cfg, camera, frames),
        Commands::Stats { session } => stats(&cfg, session.resolve()?).await,
        Commands::Config => open_config(),
    }
}

fn model_loader(cfg: &config::Config) -> impl FnOnce() -> Result<SinglePoseModel> + Send + 'static {
    let path = cfg.model.clone();
    let input_size = cfg.model_input_size;
    move || SinglePoseModel::load(&path)?.with_input_size(input_size)
}

async fn watch(cfg: &config::Config, camera: Option<String>, auth: AuthContext) -> Result<()> {
    let device = camera.unwrap_or_else(|| cfg.camera.clone());
    info!("Opening camera: {}", device);
    let camera = Camera::open(&device).context("Failed to open camera")?;

    let reporter = HttpReporter::new(&cfg.api_base_url, cfg.request_timeout())
        .context("Failed to build HTTP client")?;
    let detector = AttentionDetector::new(cfg.detector_settings(), reporter);

    detector.start(camera, model_loader(cfg), auth).await?;
    info!("Press Ctrl+C to stop.");
    detector.wait().await;
    Ok(())
}

fn check(cfg: &config::Config, camera: Option<String>, frames: usize) -> Result<()> {
    let device = camera.unwrap_or_else(|| cfg.camera.clone());
    info!("Opening camera: {}", device);
    let mut camera = Camera::open(&device).context("Failed to open camera")?;

    let (width, height) = camera.dimensions();
    let intrinsics = CameraIntrinsics::from_frame_size(width, height)?;
    let estimator = model_loader(cfg)().context("Failed to load pose model")?;
    let mut pipeline = FramePipeline::new(
        estimator,
        PnpSolver::new(cfg.solver),
        AttentionClassifier::new(cfg.thresholds),
        intrinsics,
    );

    for i in 0..frames {
        let frame = camera.frame().context("Failed to capture frame")?;
        match pipeline.process(&frame) {
            Ok(verdict) => match verdict.rotation {
                Some(rotation) => {
                    let [x, y, z] = rotation.degrees();
                    info!(
                        "Frame {}: {:?} attentive={} rotation=({:.1}, {:.1}, {:.1}) error={:.2}px",
                        i + 1,
                        verdict.reason,
                        verdict.attentive,
                        x,
                        y,
                        z,
                        rotation.reprojection_error
                    );
                }
                None => info!(
                    "Frame {}: {:?} attentive={}",
                    i + 1,
                    verdict.reason,
                    verdict.attentive
                ),
            },
            Err(e) => warn!("Frame {}: {:#}", i + 1, e),
        }
    }
    Ok(())
}

async fn stats(cfg: &config::Config, auth: AuthContext) -> Result<()> {
    let client = StatsClient::new(&cfg.api_base_url, cfg.request_timeout())
        .context("Failed to build HTTP client")?;
    let stats = client
        .fetch(&auth)
        .await
        .context("Failed to fetch attention stats")?;
    println!("{}: {:.1}%", auth.class_id, stats.attention);
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
