//! Zone-exit surveillance core.
//!
//! An operator marks a four-point zone on the monitored camera. Once the
//! zone is complete the monitor is armed, and the first frame in which a
//! detected vehicle's center lies outside the zone latches an alert.
//!
//! All state shared between the ingestion threads and the control server
//! lives in [`SharedFrameStateStore`].

pub mod control;
pub mod error;
pub mod ingest;
pub mod machine;
pub mod metrics;
pub mod state;
pub mod store;
pub mod zone;

pub use control::ControlInterface;
pub use error::ZoneError;
pub use ingest::CameraIngest;
pub use machine::{FrameOutcome, SurveillanceStateMachine};
pub use state::{AlertRecord, MonitorState, StatusReport, SurveillanceState};
pub use store::{CameraId, FrameSnapshot, SharedFrameStateStore};
pub use zone::PolygonZone;
