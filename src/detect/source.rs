use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::{Frame, FrameSize};

/// Upstream producer of per-cycle detections.
///
/// Implementations receive the encoded frame for the current cycle and
/// return normalized rectangles. They must not retain the frame.
pub trait DetectionSource: Send {
    /// Source identifier for logs and status reports.
    fn name(&self) -> &'static str;

    /// Produce detections for one frame.
    fn detect(&mut self, frame: &Frame, size: FrameSize) -> Result<Vec<Detection>>;

    /// Forget inter-frame state, e.g. after a reconnect.
    fn reset(&mut self) {}

    /// Whether confidences are model scores subject to the configured
    /// detection threshold. Motion sources report a change intensity instead.
    fn scores_confidence(&self) -> bool {
        true
    }
}

impl<S: DetectionSource + ?Sized> DetectionSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame, size: FrameSize) -> Result<Vec<Detection>> {
        (**self).detect(frame, size)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn scores_confidence(&self) -> bool {
        (**self).scores_confidence()
    }
}
