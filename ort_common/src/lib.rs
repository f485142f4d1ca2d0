pub mod yolo;

pub use yolo::{YoloConfig, YoloDetector};
