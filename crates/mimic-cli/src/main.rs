use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mimic_core::{
    classify_with, normalize, DetectionResult, ExpressionLabel, ExpressionScores, LoopSummary,
    RenderLoop, RunFlag, ThresholdTable,
};
use mimic_hw::Camera;
use mimic_vision::{FaceLandmarker, LandmarkerOptions};
use std::io::Read;
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod config;
mod session;
mod surface;

use config::Config;
use session::CameraSession;
use surface::{Snapshots, SurfaceKind};

#[derive(Parser)]
#[command(name = "mimic", about = "Webcam expression mirror: shows an emoji for your face")]
struct Cli {
    /// Threshold override file (TOML); defaults to $MIMIC_THRESHOLDS
    #[arg(long, global = true)]
    thresholds: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera and mirror expressions until Ctrl-C
    Run {
        /// Presentation shell
        #[arg(short, long, value_enum, default_value_t = SurfaceKind::Panel)]
        surface: SurfaceKind,
        /// V4L2 device path (overrides $MIMIC_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
        /// Directory for canvas PNG snapshots (required by overlay and basic)
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
        /// Write a snapshot every N presented frames
        #[arg(long, default_value_t = 30)]
        snapshot_every: u64,
    },
    /// Classify a face landmarker result (JSON) from a file or stdin
    Classify {
        /// Input file; reads stdin when omitted or "-"
        file: Option<PathBuf>,
        /// Also print the candidate scores
        #[arg(long)]
        scores: bool,
    },
    /// Print the effective expression thresholds
    Thresholds,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// V4L2 device path (overrides $MIMIC_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
        /// Number of frames to capture
        #[arg(short, long, default_value_t = 10)]
        frames: usize,
    },
}

/// Options for the `run` subcommand after merging flags into [`Config`].
struct RunOptions {
    surface: SurfaceKind,
    snapshots: Option<Snapshots>,
}

impl RunOptions {
    /// Canvas surfaces are only visible through their snapshots.
    fn check(&self) -> Result<()> {
        let canvas = matches!(self.surface, SurfaceKind::Overlay | SurfaceKind::Basic);
        match (&self.snapshots, canvas) {
            (None, true) => Err(anyhow!(
                "--surface {:?} draws off-screen; pass --snapshot-dir to save its frames",
                self.surface
            )),
            (Some(_), false) => {
                tracing::warn!(surface = ?self.surface, "snapshots only apply to canvas surfaces");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.thresholds {
        config.thresholds_path = Some(path);
    }

    match cli.command {
        Commands::Run {
            surface,
            device,
            snapshot_dir,
            snapshot_every,
        } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            let snapshots = snapshot_dir.map(|dir| Snapshots {
                dir,
                every: snapshot_every,
            });
            run(config, RunOptions { surface, snapshots }).await?;
        }
        Commands::Classify { file, scores } => classify(&config, file, scores)?,
        Commands::Thresholds => {
            let thresholds = config.thresholds().context("failed to load thresholds")?;
            print!("{thresholds}");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { device, frames } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            camera_test(&config, frames)?;
        }
    }

    Ok(())
}

/// Start the render thread and wait for Ctrl-C or for the loop to end.
async fn run(config: Config, options: RunOptions) -> Result<()> {
    let thresholds = config.thresholds().context("failed to load thresholds")?;
    config
        .model_paths()
        .check()
        .context("model preflight failed")?;
    options.check()?;
    if let Some(snapshots) = &options.snapshots {
        std::fs::create_dir_all(&snapshots.dir).with_context(|| {
            format!("failed to create snapshot dir {}", snapshots.dir.display())
        })?;
    }

    let render_loop = RenderLoop::new(thresholds);
    let flag = render_loop.run_flag();
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = std::thread::Builder::new()
        .name("mimic-render".into())
        .spawn(move || render_thread(&config, options, render_loop, ready_tx))
        .context("failed to spawn render thread")?;

    if ready_rx.await.is_err() {
        // Start-up failed; the thread's result carries the reason.
        return match handle.join() {
            Ok(Ok(_)) => Err(anyhow!("render thread exited during start-up")),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("render thread panicked")),
        };
    }
    tracing::info!("mimic running; press Ctrl-C to stop");

    let stopper = flag.clone();
    tokio::spawn(async move {
        let mut interrupts = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupts += 1;
            if !on_interrupt(interrupts, &stopper) {
                std::process::exit(130);
            }
        }
    });

    let summary = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("render thread join failed")?
        .map_err(|_| anyhow!("render thread panicked"))??;

    tracing::info!(
        frames = summary.frames,
        with_face = summary.frames_with_face,
        "mimic stopped"
    );
    Ok(())
}

/// Handle the `count`th Ctrl-C. The first stops the loop; returns `false`
/// when the process should exit instead of waiting for the in-flight frame.
fn on_interrupt(count: u32, flag: &RunFlag) -> bool {
    if count > 1 {
        tracing::warn!("second interrupt, exiting without waiting for the camera");
        return false;
    }
    tracing::info!("interrupt received, stopping");
    flag.stop();
    true
}

/// Body of the render thread. Owns the camera, models and surface.
///
/// `ready` is signalled once start-up succeeds; on failure it is dropped and
/// the error is returned.
fn render_thread(
    config: &Config,
    options: RunOptions,
    render_loop: RenderLoop,
    ready: oneshot::Sender<()>,
) -> Result<LoopSummary> {
    let landmarker = FaceLandmarker::load(&config.model_paths(), LandmarkerOptions::default())
        .context("failed to load models")?;

    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let mut session = CameraSession::start(&camera, landmarker, config.warmup_frames)
        .context("failed to start capture")?;
    let mut surface = surface::build(options.surface, config.canvas_size(), options.snapshots);

    let _ = ready.send(());
    let summary = render_loop
        .run(&mut session, &mut surface)
        .context("render loop failed")?;
    Ok(summary)
}

fn classify(config: &Config, file: Option<PathBuf>, show_scores: bool) -> Result<()> {
    let input = match file.filter(|p| p.as_os_str() != "-") {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let thresholds = config.thresholds().context("failed to load thresholds")?;
    let (label, scores) = classify_json(&input, &thresholds)?;
    println!("{} {label}", label.glyph());
    if show_scores {
        println!("{}", serde_json::to_string_pretty(&scores)?);
    }
    Ok(())
}

/// Label and candidate scores for the first face of a landmarker result.
fn classify_json(
    input: &str,
    thresholds: &ThresholdTable,
) -> Result<(ExpressionLabel, ExpressionScores)> {
    let result: DetectionResult =
        serde_json::from_str(input).context("invalid face landmarker result")?;
    let map = normalize(result.first_face());
    Ok((classify_with(&map, thresholds), ExpressionScores::from_map(&map)))
}

fn camera_test(config: &Config, count: usize) -> Result<()> {
    println!("Opening {}...", config.camera_device);
    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    println!(
        "  {}x{} {:?} ({:?})",
        camera.width,
        camera.height,
        camera.pixel_format(),
        camera.fourcc
    );

    let (frames, dark) = camera
        .capture_frames(count)
        .context("frame capture failed")?;
    for frame in &frames {
        println!(
            "  frame #{:<4} brightness {:6.1}{}",
            frame.sequence,
            frame.avg_brightness(),
            if frame.is_dark { "  dark" } else { "" }
        );
    }
    println!("Captured {} frames, {} dark", frames.len(), dark);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "mimic",
            "run",
            "--surface",
            "basic",
            "--snapshot-dir",
            "/tmp/shots",
            "--snapshot-every",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                surface,
                device,
                snapshot_dir,
                snapshot_every,
            } => {
                assert_eq!(surface, SurfaceKind::Basic);
                assert_eq!(device, None);
                assert_eq!(snapshot_dir, Some(PathBuf::from("/tmp/shots")));
                assert_eq!(snapshot_every, 5);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_defaults_to_panel() {
        let cli = Cli::try_parse_from(["mimic", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run { surface: SurfaceKind::Panel, snapshot_every: 30, .. }
        ));
    }

    #[test]
    fn test_second_interrupt_requests_exit() {
        let flag = RunFlag::new();
        assert!(on_interrupt(1, &flag));
        assert!(!flag.is_running());
        assert!(!on_interrupt(2, &flag));
    }

    #[test]
    fn test_canvas_surface_needs_snapshot_dir() {
        let options = |surface, dir: Option<&str>| RunOptions {
            surface,
            snapshots: dir.map(|d| Snapshots { dir: PathBuf::from(d), every: 30 }),
        };
        assert!(options(SurfaceKind::Overlay, None).check().is_err());
        assert!(options(SurfaceKind::Basic, None).check().is_err());
        assert!(options(SurfaceKind::Overlay, Some("/tmp/shots")).check().is_ok());
        assert!(options(SurfaceKind::Panel, None).check().is_ok());
        assert!(options(SurfaceKind::Json, Some("/tmp/shots")).check().is_ok());
    }

    #[test]
    fn test_classify_json_first_face() {
        let input = r#"{"faceBlendshapes":[
            {"categories":[{"categoryName":"jawOpen","score":0.3},{"categoryName":"mouthPucker","score":0.1}]},
            {"categories":[{"categoryName":"mouthSmileLeft","score":0.9}]}
        ]}"#;
        let (label, scores) = classify_json(input, &ThresholdTable::DEFAULT).unwrap();
        assert_eq!(label, ExpressionLabel::Surprise);
        assert!((scores.surprise - 0.31).abs() < 1e-6);
        assert_eq!(scores.smile, 0.0);
    }

    #[test]
    fn test_classify_json_without_faces_is_neutral() {
        let (label, _) = classify_json("{}", &ThresholdTable::DEFAULT).unwrap();
        assert_eq!(label, ExpressionLabel::Neutral);
        assert!(classify_json("not json", &ThresholdTable::DEFAULT).is_err());
    }

    #[test]
    fn test_classify_json_tolerates_entry_without_score() {
        let input = r#"{"faceBlendshapes":[{"categories":[
            {"categoryName":"mouthSmileLeft","score":0.6},{"categoryName":"jawOpen"}
        ]}]}"#;
        let (label, scores) = classify_json(input, &ThresholdTable::DEFAULT).unwrap();
        assert_eq!(label, ExpressionLabel::Smile);
        assert_eq!(scores.surprise, 0.0);
    }
}
