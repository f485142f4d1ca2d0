//! Operator-facing operations, independent of any transport.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use inference_common::bbox::Point;
use serde::{Serialize, Serializer};
use tokio::sync::watch;

use crate::error::ZoneError;
use crate::metrics::MetricsSnapshot;
use crate::state::{MonitorState, StatusReport, SurveillanceState};
use crate::store::{CameraId, FrameSnapshot, SharedFrameStateStore};

pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_millis(33);

/// Answer to a zone-point submission. A rejected point is not an error for
/// the caller: the current zone and state are echoed back with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSubmission {
    pub points: Vec<Point>,
    pub status: SurveillanceState,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "error_message")]
    pub error: Option<ZoneError>,
}

fn error_message<S: Serializer>(error: &Option<ZoneError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.collect_str(e),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStatus {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraHealth {
    pub camera: CameraId,
    /// Sequence number of the latest published frame, 0 if none yet.
    pub frames_published: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detector: DetectorStatus,
    pub state: SurveillanceState,
    pub metrics: MetricsSnapshot,
    pub cameras: Vec<CameraHealth>,
}

#[derive(Clone)]
pub struct ControlInterface {
    store: Arc<SharedFrameStateStore>,
    stream_interval: Duration,
}

impl ControlInterface {
    pub fn new(store: Arc<SharedFrameStateStore>) -> Self {
        Self {
            store,
            stream_interval: DEFAULT_STREAM_INTERVAL,
        }
    }

    pub fn with_stream_interval(mut self, interval: Duration) -> Self {
        self.stream_interval = interval;
        self
    }

    pub fn store(&self) -> &Arc<SharedFrameStateStore> {
        &self.store
    }

    pub fn submit_zone_point(&self, x: i32, y: i32) -> ZoneSubmission {
        self.store.set_state(|state| {
            let (result, changed) = state.add_zone_point(Point::new(x, y));
            if let Err(e) = &result {
                log::debug!("Zone point ({x}, {y}) rejected: {e}");
            }
            let submission = ZoneSubmission {
                points: state.zone().points().to_vec(),
                status: state.state(),
                error: result.err(),
            };
            (submission, changed)
        })
    }

    pub fn get_status(&self) -> StatusReport {
        self.store.status()
    }

    /// Moves to `Alerted` from any state with a fresh onset.
    pub fn force_alert(&self) -> StatusReport {
        self.store.set_state(|state| {
            state.force_alert();
            (state.report(), true)
        })
    }

    /// Clears zone and alert record and starts a new arming cycle.
    pub fn reset_cycle(&self) -> StatusReport {
        self.store.set_state(|state| {
            state.reset_cycle();
            (state.report(), true)
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.store.subscribe()
    }

    pub fn health(&self) -> HealthReport {
        let detector = if self.store.detector_available() {
            DetectorStatus::Available
        } else {
            DetectorStatus::Unavailable
        };
        let status = match detector {
            DetectorStatus::Available => HealthStatus::Ok,
            DetectorStatus::Unavailable => HealthStatus::Degraded,
        };
        let cameras = self
            .store
            .cameras()
            .into_iter()
            .map(|camera| CameraHealth {
                camera,
                frames_published: self.store.read(camera).map_or(0, |f| f.sequence),
            })
            .collect();

        HealthReport {
            status,
            detector,
            state: self.store.snapshot_state().state(),
            metrics: self.store.metrics().snapshot(),
            cameras,
        }
    }

    /// Endless stream of newly published frames of `camera`, polled at the
    /// configured interval. Each frame is yielded once; ends only when the
    /// consumer drops it. `None` for an unknown camera.
    pub fn stream(
        &self,
        camera: CameraId,
    ) -> Option<impl Stream<Item = Arc<FrameSnapshot>> + Send + 'static> {
        if !self.store.has_camera(camera) {
            return None;
        }
        let store = Arc::clone(&self.store);
        let interval = self.stream_interval;

        Some(stream::unfold(0u64, move |last| {
            let store = Arc::clone(&store);
            async move {
                loop {
                    if let Some(frame) = store.read(camera) {
                        if frame.sequence != last {
                            let sequence = frame.sequence;
                            return Some((frame, sequence));
                        }
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }))
    }
}
