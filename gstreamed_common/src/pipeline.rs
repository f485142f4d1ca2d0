use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer::MessageView;
use gstreamer_app as gst_app;
use image::RgbImage;

use crate::frame::image_from_sample;
use crate::source::{CameraSource, PipelineOptions};

/// Builds a pipeline for `source` that hands every decoded frame to
/// `on_frame`, on the appsink streaming thread.
///
/// Samples that cannot be converted are dropped and counted in `dropped`.
pub fn build_pipeline<F>(
    source: &CameraSource,
    options: &PipelineOptions,
    dropped: Arc<AtomicU64>,
    mut on_frame: F,
) -> anyhow::Result<gst::Pipeline>
where
    F: FnMut(RgbImage) + Send + 'static,
{
    gst::init().context("Failed to initialize GStreamer")?;

    let description = source.pipeline_description(options);
    log::debug!("Pipeline: {description}");

    let pipeline = gst::parse::launch(&description)
        .with_context(|| format!("Failed to parse pipeline for {source}"))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| anyhow::anyhow!("Failed to create pipeline for {source}"))?;

    let appsink = pipeline
        .by_name("sink")
        .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
        .context("Failed to get appsink")?;

    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                match image_from_sample(&sample) {
                    Ok(image) => on_frame(image),
                    Err(e) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!("Dropping frame: {e:#}");
                    }
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );

    Ok(pipeline)
}

/// Plays `pipeline` until end of stream, a pipeline error, or `shutdown`.
pub fn run_pipeline(pipeline: &gst::Pipeline, shutdown: &AtomicBool) -> anyhow::Result<()> {
    pipeline
        .set_state(gst::State::Playing)
        .context("Failed to start pipeline")?;
    let bus = pipeline.bus().context("Pipeline without bus")?;

    let mut result = Ok(());
    while !shutdown.load(Ordering::Relaxed) {
        let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
            continue;
        };
        match msg.view() {
            MessageView::Eos(..) => {
                log::info!("Pipeline reached end of stream.");
                break;
            }
            MessageView::Error(err) => {
                let name = err.src().map(|e| e.name().to_string());
                log::error!("Error from element {name:?}: {}", err.error());
                result = Err(anyhow::anyhow!("Pipeline error from {name:?}: {}", err.error()));
                break;
            }
            MessageView::StateChanged(s) => {
                if msg.src() == Some(pipeline.upcast_ref()) {
                    log::debug!("Pipeline state: {:?} -> {:?}", s.old(), s.current());
                }
            }
            _ => (),
        }
    }

    pipeline
        .set_state(gst::State::Null)
        .context("Failed to stop pipeline")?;
    result
}
