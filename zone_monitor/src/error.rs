use thiserror::Error;

use crate::state::SurveillanceState;

/// Recoverable zone and state errors. None of these stop monitoring; the
/// control layer reports them alongside the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error("zone is incomplete")]
    ZoneIncomplete,

    #[error("zone already has all of its points")]
    ZoneAlreadyComplete,

    #[error("operation not allowed while {state}")]
    InvalidState { state: SurveillanceState },

    #[error("point ({x}, {y}) is outside the image plane")]
    InvalidPoint { x: i32, y: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown camera {0}")]
    UnknownCamera(crate::store::CameraId),
}
