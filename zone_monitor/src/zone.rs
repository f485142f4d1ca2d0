use inference_common::bbox::Point;
use serde::Serialize;

use crate::error::ZoneError;
use crate::state::SurveillanceState;

/// Number of vertices in a complete zone.
pub const ZONE_POINTS: usize = 4;

/// Largest accepted vertex coordinate, in pixels. Vertices are clicks on
/// the camera image, so anything beyond this is not a real position.
pub const MAX_COORDINATE: i32 = 16_384;

/// Operator-drawn quadrilateral on the monitored camera's image plane.
///
/// Points are appended one at a time while arming and never change once
/// the zone is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PolygonZone {
    points: Vec<Point>,
}

impl PolygonZone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == ZONE_POINTS
    }

    /// Appends `p`, returning the new point count.
    ///
    /// Completeness is checked before the state, so a fifth point is always
    /// reported as [`ZoneError::ZoneAlreadyComplete`]. Coordinates must lie
    /// within `0..=MAX_COORDINATE`.
    pub fn add_point(&mut self, p: Point, state: SurveillanceState) -> Result<usize, ZoneError> {
        if self.is_complete() {
            return Err(ZoneError::ZoneAlreadyComplete);
        }
        if state != SurveillanceState::Arming {
            return Err(ZoneError::InvalidState { state });
        }
        let range = 0..=MAX_COORDINATE;
        if !range.contains(&p.x) || !range.contains(&p.y) {
            return Err(ZoneError::InvalidPoint { x: p.x, y: p.y });
        }
        self.points.push(p);
        Ok(self.points.len())
    }

    /// Even-odd point-in-polygon test. Points on an edge or vertex count
    /// as inside.
    pub fn contains(&self, p: Point) -> Result<bool, ZoneError> {
        if !self.is_complete() {
            return Err(ZoneError::ZoneIncomplete);
        }

        let n = self.points.len();
        let mut inside = false;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];

            if on_segment(a, b, p) {
                return Ok(true);
            }

            if (a.y > p.y) != (b.y > p.y) {
                let (ax, ay) = (a.x as f64, a.y as f64);
                let (bx, by) = (b.x as f64, b.y as f64);
                let x_cross = ax + (p.y as f64 - ay) * (bx - ax) / (by - ay);
                if (p.x as f64) < x_cross {
                    inside = !inside;
                }
            }
        }

        Ok(inside)
    }
}

/// Exact collinearity test. Coordinates are widened before any arithmetic:
/// differences of `i32`s need 33 bits and their products 66.
fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let (ax, ay) = (a.x as i128, a.y as i128);
    let (bx, by) = (b.x as i128, b.y as i128);
    let (px, py) = (p.x as i128, p.y as i128);

    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0
        && px >= ax.min(bx)
        && px <= ax.max(bx)
        && py >= ay.min(by)
        && py <= ay.max(by)
}
