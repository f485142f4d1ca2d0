//! Normalisation of raw detector output into per-frame detections.

use serde::{Deserialize, Serialize};

use crate::bbox::{Bbox, Point};
use crate::vehicle_classes;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// One box as produced by a detector, before any filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: Bbox,
    pub confidence: f32,
    pub class_id: usize,
}

/// A filtered observation for a single frame. Never retained past it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub center: Point,
    pub bbox: Bbox,
    pub confidence: f32,
    /// `None` when the class id is not in the label table.
    pub label: Option<String>,
}

impl Detection {
    /// Text drawn next to the box, e.g. `car: 0.93`.
    pub fn caption(&self) -> Option<String> {
        self.label
            .as_ref()
            .map(|label| format!("{label}: {:.2}", self.confidence))
    }
}

/// Turns raw detector boxes into [`Detection`]s, dropping low-confidence ones.
#[derive(Debug, Clone)]
pub struct DetectionAdapter {
    confidence_threshold: f32,
    class_names: Vec<String>,
}

impl DetectionAdapter {
    pub fn new(confidence_threshold: f32, class_names: Vec<String>) -> Self {
        Self {
            confidence_threshold,
            class_names,
        }
    }

    /// Keeps detections with `confidence >= threshold`.
    ///
    /// Class ids are not filtered: an id outside the label table still
    /// yields a detection, only without a label.
    pub fn adapt(&self, raw: &[RawDetection]) -> Vec<Detection> {
        raw.iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .map(|det| Detection {
                center: det.bbox.center(),
                bbox: det.bbox,
                confidence: det.confidence,
                label: self.class_names.get(det.class_id).cloned(),
            })
            .collect()
    }
}

impl Default for DetectionAdapter {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONFIDENCE_THRESHOLD,
            vehicle_classes::NAMES.iter().map(|name| name.to_string()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32, class_id: usize) -> RawDetection {
        RawDetection {
            bbox: Bbox::new(xmin, ymin, xmax, ymax),
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_below_threshold_dropped() {
        let adapter = DetectionAdapter::default();
        let detections = adapter.adapt(&[
            raw(0.0, 0.0, 10.0, 10.0, 0.5, 0),
            raw(0.0, 0.0, 10.0, 10.0, 0.69, 0),
        ]);
        assert!(detections.is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let adapter = DetectionAdapter::default();
        let detections = adapter.adapt(&[raw(0.0, 0.0, 10.0, 10.0, 0.7, 0)]);
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn test_center_and_label() {
        let adapter = DetectionAdapter::default();
        let detections = adapter.adapt(&[raw(10.0, 20.0, 30.0, 41.0, 0.91, 0)]);
        assert_eq!(detections[0].center, Point::new(20, 30));
        assert_eq!(detections[0].label.as_deref(), Some("car"));
        assert_eq!(detections[0].caption().as_deref(), Some("car: 0.91"));
    }

    #[test]
    fn test_unknown_class_kept_without_label() {
        let adapter = DetectionAdapter::default();
        let detections = adapter.adapt(&[raw(0.0, 0.0, 4.0, 4.0, 0.95, 7)]);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, None);
        assert_eq!(detections[0].caption(), None);
        assert_eq!(detections[0].center, Point::new(2, 2));
    }

    #[test]
    fn test_custom_threshold() {
        let adapter = DetectionAdapter::new(0.3, vec!["truck".into()]);
        let detections = adapter.adapt(&[raw(0.0, 0.0, 4.0, 4.0, 0.5, 0)]);
        assert_eq!(detections[0].label.as_deref(), Some("truck"));
    }
}
