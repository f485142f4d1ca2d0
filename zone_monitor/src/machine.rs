//! Surveillance state transitions and per-frame processing.
//!
//! Every mutation of [`MonitorState`] is defined in this module. The
//! control side applies the same rules through the store, so both
//! execution contexts share one transition table:
//!
//! | from      | event                      | to        |
//! |-----------|----------------------------|-----------|
//! | `Arming`  | fourth zone point          | `Armed`   |
//! | `Armed`   | a detection outside zone   | `Alerted` |
//! | any       | operator override          | `Alerted` |
//! | any       | cycle reset                | `Arming`  |

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use inference_common::annotate::Annotator;
use inference_common::bbox::Point;
use inference_common::detection::{Detection, DetectionAdapter};
use inference_common::detector::Detector;

use crate::error::ZoneError;
use crate::state::{AlertRecord, MonitorState, SurveillanceState};
use crate::store::SharedFrameStateStore;

impl MonitorState {
    /// Appends a zone vertex; the fourth one arms the monitor.
    ///
    /// Returns the new point count and whether anything changed.
    pub(crate) fn add_zone_point(&mut self, p: Point) -> (Result<usize, ZoneError>, bool) {
        match self.zone.add_point(p, self.state) {
            Ok(count) => {
                if self.zone.is_complete() {
                    self.state = SurveillanceState::Armed;
                    log::info!(
                        "Zone complete {:?}, surveillance armed (cycle {})",
                        self.zone.points(),
                        self.cycle
                    );
                }
                (Ok(count), true)
            }
            Err(e) => (Err(e), false),
        }
    }

    /// `Armed -> Alerted`, only if still armed in the cycle the triggering
    /// frame was evaluated in.
    pub(crate) fn raise_alert(&mut self, cycle: u64) -> bool {
        if self.cycle != cycle || self.state != SurveillanceState::Armed {
            return false;
        }
        let record = AlertRecord::new(cycle);
        log::info!(
            "Vehicle left the zone, alert {} raised at {}",
            record.id,
            record.onset
        );
        self.state = SurveillanceState::Alerted;
        self.alert = Some(record);
        true
    }

    /// Operator override: straight to `Alerted` with a fresh onset.
    pub(crate) fn force_alert(&mut self) -> AlertRecord {
        let record = AlertRecord::new(self.cycle);
        log::info!(
            "Alert {} forced by operator at {} (was {})",
            record.id,
            record.onset,
            self.state
        );
        self.state = SurveillanceState::Alerted;
        self.alert = Some(record.clone());
        record
    }

    /// Starts a fresh arming cycle with an empty zone.
    pub(crate) fn reset_cycle(&mut self) {
        self.cycle += 1;
        self.state = SurveillanceState::Arming;
        self.zone = Default::default();
        self.alert = None;
        log::info!("Surveillance reset, arming cycle {}", self.cycle);
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    /// State observed when the frame arrived.
    pub entry_state: SurveillanceState,
    /// State after this frame.
    pub state: SurveillanceState,
    pub detections: Vec<Detection>,
    /// True if this frame triggered `Armed -> Alerted`.
    pub alerted: bool,
}

/// Runs detection on the monitored camera and drives exit detection.
///
/// Without a detector every frame passes through untouched and no
/// transition is ever raised from frames.
pub struct SurveillanceStateMachine {
    detector: Option<Box<dyn Detector>>,
    adapter: DetectionAdapter,
    annotator: Annotator,
    store: Arc<SharedFrameStateStore>,
}

impl SurveillanceStateMachine {
    pub fn new(
        detector: Option<Box<dyn Detector>>,
        adapter: DetectionAdapter,
        annotator: Annotator,
        store: Arc<SharedFrameStateStore>,
    ) -> Self {
        store.set_detector_available(detector.is_some());
        if detector.is_none() {
            log::warn!("No detector available, frames will pass through without analysis");
        }
        Self {
            detector,
            adapter,
            annotator,
            store,
        }
    }

    /// Detects, evaluates zone exit if armed, and draws overlays onto `frame`.
    pub fn process(&mut self, frame: &mut RgbImage) -> FrameOutcome {
        let entry = self.store.snapshot_state();

        let Some(detector) = self.detector.as_mut() else {
            return FrameOutcome {
                entry_state: entry.state(),
                state: entry.state(),
                detections: Vec::new(),
                alerted: false,
            };
        };

        let start = Instant::now();
        // a panicking detector must not take the frame source down with it
        let detected = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame)));
        let raw = match detected {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                log::warn!("Detection failed, treating frame as empty: {e:#}");
                self.store.metrics().record_failure();
                Vec::new()
            }
            Err(_) => {
                log::warn!("Detector panicked, treating frame as empty");
                self.store.metrics().record_failure();
                Vec::new()
            }
        };
        let detections = self.adapter.adapt(&raw);
        self.store
            .metrics()
            .record_analysed(detections.len() as u64, start.elapsed().as_millis() as u64);

        let alerted = match entry.state() {
            SurveillanceState::Armed if any_outside(&entry, &detections) => {
                let cycle = entry.cycle();
                self.store.set_state(|state| {
                    let raised = state.raise_alert(cycle);
                    (raised, raised)
                })
            }
            SurveillanceState::Arming | SurveillanceState::Armed | SurveillanceState::Alerted => false,
        };

        self.annotator.draw_detections(frame, &detections);
        self.annotator
            .draw_zone(frame, entry.zone().points(), entry.zone().is_complete());
        match entry.state() {
            SurveillanceState::Alerted => self.annotator.draw_alert_marker(frame),
            SurveillanceState::Arming | SurveillanceState::Armed => {}
        }

        let state = if alerted {
            SurveillanceState::Alerted
        } else {
            entry.state()
        };
        FrameOutcome {
            entry_state: entry.state(),
            state,
            detections,
            alerted,
        }
    }
}

/// At least one center outside the zone. An incomplete zone never reports
/// an exit.
fn any_outside(entry: &MonitorState, detections: &[Detection]) -> bool {
    detections
        .iter()
        .any(|det| entry.zone().contains(det.center) == Ok(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CameraId;
    use inference_common::bbox::Bbox;
    use inference_common::detection::RawDetection;

    /// Returns the same boxes for every frame.
    struct FixedDetector(Vec<RawDetection>);

    impl Detector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            anyhow::bail!("inference exploded")
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            panic!("index out of bounds in post-processing")
        }
    }

    fn centered_at(x: f32, y: f32, confidence: f32) -> RawDetection {
        RawDetection {
            bbox: Bbox::new(x - 2.0, y - 2.0, x + 2.0, y + 2.0),
            confidence,
            class_id: 0,
        }
    }

    fn store() -> Arc<SharedFrameStateStore> {
        Arc::new(SharedFrameStateStore::new([CameraId(1)]))
    }

    fn arm(store: &SharedFrameStateStore) {
        for (x, y) in [(0, 0), (10, 0), (10, 10), (0, 10)] {
            store.set_state(|s| {
                let (res, changed) = s.add_zone_point(Point::new(x, y));
                (res.unwrap(), changed)
            });
        }
        assert_eq!(store.snapshot_state().state(), SurveillanceState::Armed);
    }

    fn machine(store: &Arc<SharedFrameStateStore>, detections: Vec<RawDetection>) -> SurveillanceStateMachine {
        SurveillanceStateMachine::new(
            Some(Box::new(FixedDetector(detections))),
            DetectionAdapter::default(),
            Annotator::default(),
            Arc::clone(store),
        )
    }

    #[test]
    fn test_inside_never_alerts() {
        let store = store();
        arm(&store);
        let mut machine = machine(&store, vec![centered_at(5.0, 5.0, 0.9)]);

        for _ in 0..5 {
            let outcome = machine.process(&mut RgbImage::new(32, 32));
            assert!(!outcome.alerted);
            assert_eq!(outcome.detections.len(), 1);
        }
        assert_eq!(store.snapshot_state().state(), SurveillanceState::Armed);
    }

    #[test]
    fn test_outside_alerts_on_that_frame() {
        let store = store();
        arm(&store);
        let mut machine = machine(&store, vec![centered_at(20.0, 20.0, 0.9)]);

        let outcome = machine.process(&mut RgbImage::new(32, 32));
        assert!(outcome.alerted);
        assert_eq!(outcome.entry_state, SurveillanceState::Armed);
        assert_eq!(outcome.state, SurveillanceState::Alerted);

        let state = store.snapshot_state();
        assert_eq!(state.state(), SurveillanceState::Alerted);
        assert!(state.alert().is_some());
    }

    #[test]
    fn test_edge_point_is_inside() {
        let store = store();
        arm(&store);
        let mut machine = machine(&store, vec![centered_at(10.0, 5.0, 0.9)]);
        assert!(!machine.process(&mut RgbImage::new(32, 32)).alerted);
        assert_eq!(store.snapshot_state().state(), SurveillanceState::Armed);
    }

    #[test]
    fn test_low_confidence_ignored() {
        let store = store();
        arm(&store);
        let mut machine = machine(&store, vec![centered_at(20.0, 20.0, 0.5)]);
        let outcome = machine.process(&mut RgbImage::new(32, 32));
        assert!(outcome.detections.is_empty());
        assert!(!outcome.alerted);
    }

    #[test]
    fn test_multiple_exits_fire_once() {
        let store = store();
        arm(&store);
        let mut machine = machine(
            &store,
            vec![centered_at(20.0, 20.0, 0.9), centered_at(25.0, 3.0, 0.9)],
        );

        assert!(machine.process(&mut RgbImage::new(32, 32)).alerted);
        let onset = store.snapshot_state().alert().cloned();

        let outcome = machine.process(&mut RgbImage::new(32, 32));
        assert!(!outcome.alerted);
        assert_eq!(outcome.entry_state, SurveillanceState::Alerted);
        assert_eq!(store.snapshot_state().alert().cloned(), onset);
    }

    #[test]
    fn test_arming_never_evaluates_exit() {
        let store = store();
        let mut machine = machine(&store, vec![centered_at(20.0, 20.0, 0.9)]);

        // three points only
        for (x, y) in [(0, 0), (10, 0), (10, 10)] {
            let _ = store.set_state(|s| s.add_zone_point(Point::new(x, y)));
        }
        let outcome = machine.process(&mut RgbImage::new(32, 32));
        assert!(!outcome.alerted);
        assert_eq!(outcome.detections.len(), 1);

        // completing the zone arms it but the vehicle already outside has
        // not been evaluated yet
        let _ = store.set_state(|s| s.add_zone_point(Point::new(0, 10)));
        assert_eq!(store.snapshot_state().state(), SurveillanceState::Armed);

        // the next frame does
        assert!(machine.process(&mut RgbImage::new(32, 32)).alerted);
    }

    #[test]
    fn test_stale_cycle_cannot_alert() {
        let store = store();
        arm(&store);
        let cycle = store.snapshot_state().cycle();
        store.set_state(|s| {
            s.reset_cycle();
            ((), true)
        });
        arm(&store);

        assert!(!store.set_state(|s| {
            let raised = s.raise_alert(cycle);
            (raised, raised)
        }));
        assert_eq!(store.snapshot_state().state(), SurveillanceState::Armed);
    }

    #[test]
    fn test_detector_failure_is_empty_frame() {
        let store = store();
        arm(&store);
        let mut machine = SurveillanceStateMachine::new(
            Some(Box::new(FailingDetector)),
            DetectionAdapter::default(),
            Annotator::default(),
            Arc::clone(&store),
        );

        let outcome = machine.process(&mut RgbImage::new(32, 32));
        assert!(outcome.detections.is_empty());
        assert!(!outcome.alerted);
        assert_eq!(store.metrics().snapshot().detection_failures, 1);
    }

    #[test]
    fn test_detector_panic_is_empty_frame() {
        let store = store();
        arm(&store);
        let mut machine = SurveillanceStateMachine::new(
            Some(Box::new(PanickingDetector)),
            DetectionAdapter::default(),
            Annotator::default(),
            Arc::clone(&store),
        );

        for _ in 0..2 {
            let outcome = machine.process(&mut RgbImage::new(32, 32));
            assert!(outcome.detections.is_empty());
            assert_eq!(outcome.state, SurveillanceState::Armed);
        }
        assert_eq!(store.metrics().snapshot().detection_failures, 2);
    }

    #[test]
    fn test_far_away_detection_alerts_without_overflow() {
        let store = store();
        arm(&store);
        let mut machine = machine(
            &store,
            vec![RawDetection {
                bbox: Bbox::new(3e9, 3e9, 3.1e9, 3.1e9),
                confidence: 0.9,
                class_id: 0,
            }],
        );

        let outcome = machine.process(&mut RgbImage::new(32, 32));
        assert!(outcome.alerted);
        assert_eq!(store.snapshot_state().state(), SurveillanceState::Alerted);
    }

    #[test]
    fn test_no_detector_passes_through() {
        let store = store();
        arm(&store);
        let mut machine = SurveillanceStateMachine::new(
            None,
            DetectionAdapter::default(),
            Annotator::default(),
            Arc::clone(&store),
        );
        assert!(!store.detector_available());

        let original = RgbImage::from_pixel(32, 32, image::Rgb([7, 7, 7]));
        let mut frame = original.clone();
        let outcome = machine.process(&mut frame);

        assert_eq!(frame, original);
        assert!(!outcome.alerted);
        assert_eq!(outcome.state, SurveillanceState::Armed);
    }

    #[test]
    fn test_alerted_frame_gets_marker() {
        let store = store();
        store.set_state(|s| (s.force_alert(), true));
        let mut machine = machine(&store, Vec::new());

        let mut frame = RgbImage::new(64, 64);
        machine.process(&mut frame);
        assert_eq!(*frame.get_pixel(0, 0), inference_common::annotate::ALERT_COLOR);
    }

    #[test]
    fn test_state_never_regresses() {
        let store = store();
        let mut rx = store.subscribe();
        let mut observed = vec![rx.borrow_and_update().state()];

        let mut machine = machine(&store, vec![centered_at(20.0, 20.0, 0.9)]);
        for (x, y) in [(0, 0), (10, 0), (10, 10), (0, 10), (3, 3)] {
            let _ = store.set_state(|s| s.add_zone_point(Point::new(x, y)));
            if rx.has_changed().unwrap() {
                observed.push(rx.borrow_and_update().state());
            }
            machine.process(&mut RgbImage::new(32, 32));
            if rx.has_changed().unwrap() {
                observed.push(rx.borrow_and_update().state());
            }
        }

        observed.dedup();
        assert_eq!(
            observed,
            vec![
                SurveillanceState::Arming,
                SurveillanceState::Armed,
                SurveillanceState::Alerted
            ]
        );
    }
}
