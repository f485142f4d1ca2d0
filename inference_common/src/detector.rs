use image::RgbImage;

use crate::detection::RawDetection;

/// An object detector: one image in, zero or more boxes out.
///
/// Implementations may keep mutable inference state (an ort session, for
/// example), hence `&mut self`. The ingestion thread that owns the detector
/// is the only caller.
pub trait Detector: Send {
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Vec<RawDetection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
        (**self).detect(image)
    }
}
