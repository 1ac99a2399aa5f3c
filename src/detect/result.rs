/// Class id reported for people by single-class models.
pub const PERSON_CLASS: u32 = 0;

/// One detected object for one cycle.
///
/// The rectangle is normalized to the frame: `x`, `y`, `w`, `h` in `0..=1`,
/// `(x, y)` being the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn new(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            confidence,
            class_id: PERSON_CLASS,
        }
    }

    pub fn with_class(mut self, class_id: u32) -> Self {
        self.class_id = class_id;
        self
    }

    /// Scale to pixel space, truncating toward zero.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> (i64, i64, i64, i64) {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        (
            (self.x * fw) as i64,
            (self.y * fh) as i64,
            (self.w * fw) as i64,
            (self.h * fh) as i64,
        )
    }
}

/// Drop detections under `threshold` confidence.
pub fn retain_confident(detections: &mut Vec<Detection>, threshold: f32) {
    detections.retain(|detection| detection.confidence >= threshold);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_scaling_truncates() {
        let detection = Detection::new(0.5, 0.25, 0.333, 0.1, 0.9);
        assert_eq!(detection.to_pixels(320, 240), (160, 60, 106, 24));
    }

    #[test]
    fn low_confidence_dropped() {
        let mut detections = vec![
            Detection::new(0.0, 0.0, 0.1, 0.1, 0.4),
            Detection::new(0.0, 0.0, 0.1, 0.1, 0.5).with_class(3),
        ];
        retain_confident(&mut detections, 0.5);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 3);
    }
}
