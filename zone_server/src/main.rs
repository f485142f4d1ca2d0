mod api;
mod settings;
mod views;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gstreamed_common::pipeline::{build_pipeline, run_pipeline};
use gstreamed_common::source::{CameraSource, PipelineOptions};
use inference_common::annotate::Annotator;
use inference_common::detection::DetectionAdapter;
use inference_common::detector::Detector;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort_common::{YoloConfig, YoloDetector};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use zone_monitor::{CameraIngest, ControlInterface, SharedFrameStateStore, SurveillanceStateMachine};

use crate::settings::Settings;

/// Zone-exit vehicle surveillance server.
#[derive(Debug, Parser)]
pub struct Args {
    /// TOML configuration file. Defaults to `zone_server.toml` if present.
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long, short)]
    port: Option<u16>,
    /// Yolov8 onnx model file to use.
    #[arg(long, short)]
    model: Option<PathBuf>,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    /// Minimum detection confidence, in [0, 1].
    #[arg(long)]
    conf_threshold: Option<f32>,
    #[arg(long)]
    nms_threshold: Option<f32>,
    /// TTF/OTF font for labels and the alert banner.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Source of camera 1: "test", a device like "/dev/video0", or an rtsp:// url.
    #[arg(long)]
    camera1: Option<CameraSource>,
    /// Source of camera 2, same forms as camera 1.
    #[arg(long)]
    camera2: Option<CameraSource>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "warn,zone_server=info,zone_monitor=info,ort_common=info,\
                 gstreamed_common=info,inference_common=info,tower_http=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    settings.apply_args(&args);
    settings.validate()?;
    log::debug!("{settings:?}");

    let store = Arc::new(SharedFrameStateStore::new(
        settings.cameras.iter().map(|camera| camera.id),
    ));

    let mut machine = match settings.monitored_camera() {
        Some(camera) => {
            info!("Camera {camera} is monitored");
            Some(SurveillanceStateMachine::new(
                load_detector(&settings),
                DetectionAdapter::new(settings.confidence_threshold, settings.class_names.clone()),
                load_annotator(&settings),
                Arc::clone(&store),
            ))
        }
        None => {
            warn!("No monitored camera configured, streaming only");
            None
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for camera in &settings.cameras {
        let ingest = match machine.take_if(|_| camera.monitored) {
            Some(machine) => CameraIngest::monitored(camera.id, machine, Arc::clone(&store)),
            None => CameraIngest::pass_through(camera.id, Arc::clone(&store)),
        }
        .with_jpeg_quality(settings.jpeg_quality)
        .with_stats_interval(settings.stats_interval_frames);

        workers.push(spawn_camera(
            camera.source.clone(),
            ingest,
            Arc::clone(&shutdown),
        )?);
    }

    let control = ControlInterface::new(Arc::clone(&store))
        .with_stream_interval(Duration::from_millis(settings.stream_interval_ms));
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", settings.host, settings.port))?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let served = runtime.block_on(api::serve(api::AppState { control }, addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    }));

    shutdown.store(true, Ordering::Relaxed);
    for worker in workers {
        if worker.join().is_err() {
            error!("Camera thread panicked");
        }
    }
    info!("Shut down");

    served
}

/// Loads the YOLO model. Failure is not fatal: the monitored camera keeps
/// streaming but nothing is detected and no alert is ever raised.
fn load_detector(settings: &Settings) -> Option<Box<dyn Detector>> {
    let result = init_ort(settings.cuda).and_then(|()| {
        YoloDetector::load(
            &settings.model_path,
            YoloConfig {
                input_size: settings.input_size,
                nms_threshold: settings.nms_threshold,
                ..YoloConfig::default()
            },
        )
    });

    match result {
        Ok(detector) => Some(Box::new(detector)),
        Err(e) => {
            error!("Failed to load detector: {e:#}");
            error!("Running degraded: vehicle detection and alerts are disabled");
            None
        }
    }
}

fn init_ort(cuda: bool) -> anyhow::Result<()> {
    let (ep, ep_name) = if cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };
    ort::init().with_execution_providers([ep]).commit()?;
    info!("Initialized ort with {ep_name} execution provider");
    Ok(())
}

fn load_annotator(settings: &Settings) -> Annotator {
    let Some(path) = &settings.font_path else {
        info!("No font configured, detection labels are not drawn");
        return Annotator::default();
    };
    Annotator::with_font_file(path).unwrap_or_else(|e| {
        warn!("{e:#}, detection labels are not drawn");
        Annotator::default()
    })
}

/// Runs the pipeline of one camera on its own thread until end of stream,
/// pipeline failure, or shutdown.
fn spawn_camera(
    source: CameraSource,
    mut ingest: CameraIngest,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<()>> {
    let camera = ingest.camera();
    thread::Builder::new()
        .name(format!("camera-{camera}"))
        .spawn(move || {
            info!("Camera {camera}: starting {source}");
            let dropped = Arc::new(AtomicU64::new(0));
            let result = build_pipeline(
                &source,
                &PipelineOptions::default(),
                Arc::clone(&dropped),
                move |image| {
                    if let Err(e) = ingest.on_frame(image) {
                        warn!("Camera {camera}: {e:#}");
                    }
                },
            )
            .and_then(|pipeline| run_pipeline(&pipeline, &shutdown));

            match result {
                Ok(()) => info!("Camera {camera}: pipeline stopped"),
                Err(e) => error!("Camera {camera}: {e:#}"),
            }
            let dropped = dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                warn!("Camera {camera}: dropped {dropped} unreadable frames");
            }
        })
        .context("Failed to spawn camera thread")
}
