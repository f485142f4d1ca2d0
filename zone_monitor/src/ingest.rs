use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::machine::SurveillanceStateMachine;
use crate::store::{CameraId, FrameSnapshot, SharedFrameStateStore};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;
pub const DEFAULT_STATS_INTERVAL: u64 = 100;

/// Per-camera frame handler, driven by the frame source.
///
/// The monitored camera runs every frame through the state machine before
/// publishing; other cameras publish frames as delivered.
pub struct CameraIngest {
    camera: CameraId,
    machine: Option<SurveillanceStateMachine>,
    store: Arc<SharedFrameStateStore>,
    jpeg_quality: u8,
    stats_interval: u64,
    sequence: u64,
}

impl CameraIngest {
    pub fn monitored(
        camera: CameraId,
        machine: SurveillanceStateMachine,
        store: Arc<SharedFrameStateStore>,
    ) -> Self {
        Self::new(camera, Some(machine), store)
    }

    pub fn pass_through(camera: CameraId, store: Arc<SharedFrameStateStore>) -> Self {
        Self::new(camera, None, store)
    }

    fn new(
        camera: CameraId,
        machine: Option<SurveillanceStateMachine>,
        store: Arc<SharedFrameStateStore>,
    ) -> Self {
        Self {
            camera,
            machine,
            store,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            stats_interval: DEFAULT_STATS_INTERVAL,
            sequence: 0,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_stats_interval(mut self, frames: u64) -> Self {
        self.stats_interval = frames;
        self
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    /// Processes, encodes and publishes one frame.
    pub fn on_frame(&mut self, mut frame: RgbImage) -> anyhow::Result<()> {
        let state = match self.machine.as_mut() {
            Some(machine) => machine.process(&mut frame).state,
            None => self.store.snapshot_state().state(),
        };

        let jpeg = encode_jpeg(&frame, self.jpeg_quality)
            .with_context(|| format!("Failed to encode frame of camera {}", self.camera))?;

        self.sequence += 1;
        self.store.publish(FrameSnapshot {
            camera: self.camera,
            sequence: self.sequence,
            captured_at: Utc::now(),
            state,
            jpeg,
        })?;

        if self.machine.is_some() && self.stats_interval > 0 && self.sequence % self.stats_interval == 0 {
            let stats = self.store.metrics().snapshot();
            log::info!(
                "Camera {}: {} frames | FPS: {:.1} | Detections: {} | Inference: {:.1}ms | Failures: {} | {}",
                self.camera,
                stats.frames_analysed,
                stats.fps,
                stats.detections,
                stats.avg_inference_ms,
                stats.detection_failures,
                state
            );
        }

        Ok(())
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}
