use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use inference_common::bbox::Point;
use serde::Serialize;
use uuid::Uuid;

use crate::zone::PolygonZone;

/// Surveillance phase. Within one arming cycle the phase only moves
/// forward: `Arming -> Armed -> Alerted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveillanceState {
    /// Zone is being drawn; no exit detection.
    Arming,
    /// Zone complete; detections are tested for exit.
    Armed,
    /// A vehicle left the zone (or an operator escalated). Latched.
    Alerted,
}

impl SurveillanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveillanceState::Arming => "arming",
            SurveillanceState::Armed => "armed",
            SurveillanceState::Alerted => "alerted",
        }
    }
}

impl fmt::Display for SurveillanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Present only while alerted. Elapsed time is always derived from the
/// monotonic onset, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub id: Uuid,
    pub cycle: u64,
    /// Wall-clock onset, for display.
    pub onset: DateTime<Utc>,
    onset_instant: Instant,
}

impl AlertRecord {
    pub fn new(cycle: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            cycle,
            onset: Utc::now(),
            onset_instant: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.onset_instant.elapsed()
    }
}

/// Everything the ingestion and control sides share, kept as one value so
/// that state, zone and alert record are always read together.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorState {
    pub(crate) state: SurveillanceState,
    pub(crate) zone: PolygonZone,
    pub(crate) alert: Option<AlertRecord>,
    /// Incremented on every reset; transitions computed for an older cycle
    /// are discarded.
    pub(crate) cycle: u64,
}

impl MonitorState {
    pub fn state(&self) -> SurveillanceState {
        self.state
    }

    pub fn zone(&self) -> &PolygonZone {
        &self.zone
    }

    pub fn alert(&self) -> Option<&AlertRecord> {
        self.alert.as_ref()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn report(&self) -> StatusReport {
        let alert = match self.state {
            SurveillanceState::Alerted => self.alert.as_ref(),
            SurveillanceState::Arming | SurveillanceState::Armed => None,
        };

        StatusReport {
            status: self.state,
            elapsed_time: alert.map_or(0, |a| a.elapsed().as_secs()),
            onset: alert.map(|a| a.onset),
            alert_id: alert.map(|a| a.id),
            points: self.zone.points().to_vec(),
            cycle: self.cycle,
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            state: SurveillanceState::Arming,
            zone: PolygonZone::new(),
            alert: None,
            cycle: 0,
        }
    }
}

/// Status as served to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: SurveillanceState,
    /// Whole seconds since onset; zero unless alerted.
    pub elapsed_time: u64,
    pub onset: Option<DateTime<Utc>>,
    pub alert_id: Option<Uuid>,
    pub points: Vec<Point>,
    pub cycle: u64,
}
