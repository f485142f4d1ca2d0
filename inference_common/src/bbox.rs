use serde::{Deserialize, Serialize};

/// Integer position on the image plane, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Builds a box from YOLO-style center/size coordinates.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Corner coordinates truncated to whole pixels.
    pub fn to_pixels(&self) -> (i32, i32, i32, i32) {
        (
            self.xmin as i32,
            self.ymin as i32,
            self.xmax as i32,
            self.ymax as i32,
        )
    }

    /// Center of the pixel-truncated box, rounded down.
    pub fn center(&self) -> Point {
        let (x1, y1, x2, y2) = self.to_pixels();
        // the mean of two i32s always fits back into an i32
        let mid = |a: i32, b: i32| (a as i64 + b as i64).div_euclid(2) as i32;
        Point::new(mid(x1, x2), mid(y1, y2))
    }

    pub fn iou(&self, other: &Bbox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }

    /// Clamps the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            xmin: self.xmin.clamp(0.0, w),
            ymin: self.ymin.clamp(0.0, h),
            xmax: self.xmax.clamp(0.0, w),
            ymax: self.ymax.clamp(0.0, h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_truncates_then_floors() {
        let bbox = Bbox::new(10.9, 20.2, 21.7, 31.0);
        // (10 + 21) / 2 = 15, (20 + 31) / 2 = 25
        assert_eq!(bbox.center(), Point::new(15, 25));
    }

    #[test]
    fn test_center_of_huge_box_does_not_overflow() {
        let bbox = Bbox::new(3e9, -3e9, 4e9, -2.5e9);
        assert_eq!(bbox.center(), Point::new(i32::MAX, i32::MIN));

        let spanning = Bbox::new(-3e9, -3e9, 3e9, 3e9);
        assert_eq!(spanning.center(), Point::new(-1, -1));
    }

    #[test]
    fn test_from_center() {
        let bbox = Bbox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(bbox, Bbox::new(40.0, 35.0, 60.0, 45.0));
        assert_eq!(bbox.area(), 200.0);
    }

    #[test]
    fn test_iou() {
        let a = Bbox::new(0.0, 0.0, 10.0, 10.0);
        let b = Bbox::new(5.0, 0.0, 15.0, 10.0);
        let iou = a.iou(&b);
        assert!((iou - 50.0 / 150.0).abs() < 1e-6);

        let disjoint = Bbox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&disjoint), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_clamp_to() {
        let bbox = Bbox::new(-5.0, -1.0, 700.0, 500.0).clamp_to(640, 480);
        assert_eq!(bbox, Bbox::new(0.0, 0.0, 640.0, 480.0));
    }
}
