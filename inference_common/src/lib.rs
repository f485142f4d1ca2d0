pub mod annotate;
pub mod bbox;
pub mod detection;
pub mod detector;
pub mod vehicle_classes;
