use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Thread-safe ingestion counters.
#[derive(Debug)]
pub struct IngestMetrics {
    frames_published: AtomicU64,
    frames_analysed: AtomicU64,
    detections: AtomicU64,
    detection_failures: AtomicU64,
    inference_time_ms: AtomicU64,
    start_time: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_published: u64,
    pub frames_analysed: u64,
    pub detections: u64,
    pub detection_failures: u64,
    /// Published frames per second since startup, all cameras.
    pub fps: f64,
    pub avg_inference_ms: f64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            frames_published: AtomicU64::new(0),
            frames_analysed: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            detection_failures: AtomicU64::new(0),
            inference_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_published(&self) -> u64 {
        self.frames_published.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_analysed(&self, detections: u64, inference_ms: u64) {
        self.frames_analysed.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(detections, Ordering::Relaxed);
        self.inference_time_ms.fetch_add(inference_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.detection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let frames_published = self.frames_published.load(Ordering::Relaxed);
        let frames_analysed = self.frames_analysed.load(Ordering::Relaxed);
        let total_inference = self.inference_time_ms.load(Ordering::Relaxed);

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            frames_published as f64 / elapsed
        } else {
            0.0
        };
        let avg_inference_ms = if frames_analysed > 0 {
            total_inference as f64 / frames_analysed as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            frames_published,
            frames_analysed,
            detections: self.detections.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            fps,
            avg_inference_ms,
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
