//! The only place where ingestion and control exchange data.
//!
//! Frames are held as `Arc<FrameSnapshot>` behind a per-camera `RwLock`; a
//! publish swaps the pointer and a read clones it, so neither side holds
//! the lock for longer than that. Surveillance state, zone and alert record
//! travel together in one `watch` value: every update is a single atomic
//! read-modify-write and every read sees a consistent triple.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::StoreError;
use crate::metrics::IngestMetrics;
use crate::state::{MonitorState, StatusReport, SurveillanceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CameraId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(CameraId)
    }
}

/// Latest processed image of one camera, JPEG-encoded once at publish time.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub camera: CameraId,
    /// Per-camera publish counter, starting at 1.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// State the frame was rendered under.
    pub state: SurveillanceState,
    pub jpeg: Vec<u8>,
}

pub struct SharedFrameStateStore {
    frames: HashMap<CameraId, RwLock<Option<Arc<FrameSnapshot>>>>,
    monitor: watch::Sender<MonitorState>,
    detector_available: AtomicBool,
    metrics: IngestMetrics,
}

impl SharedFrameStateStore {
    /// Creates a store with one frame slot per camera. The camera set is
    /// fixed for the store's lifetime.
    pub fn new(cameras: impl IntoIterator<Item = CameraId>) -> Self {
        let frames = cameras
            .into_iter()
            .map(|camera| (camera, RwLock::new(None)))
            .collect();
        let (monitor, _) = watch::channel(MonitorState::default());

        Self {
            frames,
            monitor,
            detector_available: AtomicBool::new(false),
            metrics: IngestMetrics::new(),
        }
    }

    pub fn cameras(&self) -> Vec<CameraId> {
        let mut cameras: Vec<_> = self.frames.keys().copied().collect();
        cameras.sort();
        cameras
    }

    pub fn has_camera(&self, camera: CameraId) -> bool {
        self.frames.contains_key(&camera)
    }

    /// Replaces the stored frame for `snapshot.camera`.
    pub fn publish(&self, snapshot: FrameSnapshot) -> Result<(), StoreError> {
        let slot = self
            .frames
            .get(&snapshot.camera)
            .ok_or(StoreError::UnknownCamera(snapshot.camera))?;
        let snapshot = Arc::new(snapshot);
        *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        self.metrics.record_published();
        Ok(())
    }

    /// Latest published frame, or `None` if nothing was published yet (or
    /// the camera is unknown).
    pub fn read(&self, camera: CameraId) -> Option<Arc<FrameSnapshot>> {
        let slot = self.frames.get(&camera)?;
        slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn snapshot_state(&self) -> MonitorState {
        self.monitor.borrow().clone()
    }

    pub fn status(&self) -> StatusReport {
        self.monitor.borrow().report()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.monitor.subscribe()
    }

    /// Atomically applies `f` to the shared state. `f` returns its result and
    /// whether it changed anything; subscribers are notified only on change.
    pub(crate) fn set_state<R>(&self, f: impl FnOnce(&mut MonitorState) -> (R, bool)) -> R {
        let mut out = None;
        self.monitor.send_if_modified(|state| {
            let (result, changed) = f(state);
            out = Some(result);
            changed
        });
        match out {
            Some(result) => result,
            None => unreachable!("send_if_modified runs its closure exactly once"),
        }
    }

    pub fn detector_available(&self) -> bool {
        self.detector_available.load(Ordering::Relaxed)
    }

    pub fn set_detector_available(&self, available: bool) {
        self.detector_available.store(available, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }
}
