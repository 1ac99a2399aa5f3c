use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::result::Detection;
use crate::detect::source::DetectionSource;
use crate::frame::{Frame, FrameSize};

const DEFAULT_SENSITIVITY: f32 = 0.3;
const SAMPLE_STRIDE: usize = 50;
const BYTE_DELTA: u8 = 30;

/// Coarse motion detection over encoded frame bytes.
///
/// Consecutive frames are compared by sampling every 50th byte; a sample
/// counts as changed when it differs by more than 30. When the changed
/// fraction exceeds the sensitivity, one detection covering the middle half
/// of the frame is reported. No pixel decoding takes place.
pub struct FrameDiffSource {
    previous: Vec<u8>,
    previous_hash: Option<[u8; 32]>,
    sensitivity: f32,
}

impl FrameDiffSource {
    pub fn new() -> Self {
        Self {
            previous: Vec::new(),
            previous_hash: None,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }

    /// Changed-sample fraction above which motion is reported (0..1).
    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
        self
    }

    fn remember(&mut self, bytes: &[u8], hash: [u8; 32]) {
        self.previous.clear();
        self.previous.extend_from_slice(bytes);
        self.previous_hash = Some(hash);
    }
}

impl Default for FrameDiffSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of sampled bytes that changed between two buffers.
pub(crate) fn changed_fraction(current: &[u8], previous: &[u8]) -> f32 {
    let len = current.len().min(previous.len());
    let mut samples = 0u32;
    let mut changed = 0u32;
    for i in (0..len).step_by(SAMPLE_STRIDE) {
        samples += 1;
        if current[i].abs_diff(previous[i]) > BYTE_DELTA {
            changed += 1;
        }
    }
    if samples == 0 {
        0.0
    } else {
        changed as f32 / samples as f32
    }
}

impl DetectionSource for FrameDiffSource {
    fn name(&self) -> &'static str {
        "frame-diff"
    }

    fn detect(&mut self, frame: &Frame, _size: FrameSize) -> Result<Vec<Detection>> {
        let bytes = frame.as_bytes();
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        let hash: [u8; 32] = Sha256::digest(bytes).into();
        let Some(previous_hash) = self.previous_hash else {
            self.remember(bytes, hash);
            return Ok(Vec::new());
        };
        if previous_hash == hash {
            return Ok(Vec::new());
        }

        let difference = changed_fraction(bytes, &self.previous);
        self.remember(bytes, hash);
        if difference <= self.sensitivity {
            return Ok(Vec::new());
        }
        log::debug!("frame motion detected, intensity {:.3}", difference);
        Ok(vec![Detection::new(0.25, 0.25, 0.5, 0.5, difference)])
    }

    fn reset(&mut self) {
        self.previous.clear();
        self.previous_hash = None;
    }

    fn scores_confidence(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8, len: usize) -> Frame {
        Frame::from_bytes(vec![fill; len])
    }

    #[test]
    fn first_frame_only_primes() {
        let mut source = FrameDiffSource::new();
        assert!(source
            .detect(&frame(0, 1000), FrameSize::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn large_change_reports_center_detection() {
        let mut source = FrameDiffSource::new();
        source.detect(&frame(0, 1000), FrameSize::default()).unwrap();
        let detections = source
            .detect(&frame(200, 1000), FrameSize::default())
            .unwrap();
        assert_eq!(detections.len(), 1);
        let detection = detections[0];
        assert_eq!((detection.x, detection.y, detection.w, detection.h), (0.25, 0.25, 0.5, 0.5));
        assert_eq!(detection.confidence, 1.0);
    }

    #[test]
    fn moderate_change_reports_intensity_outside_score_threshold() {
        let mut source = FrameDiffSource::new();
        source.detect(&frame(0, 1000), FrameSize::default()).unwrap();
        let mut next = vec![0u8; 1000];
        for offset in (0..1000).step_by(SAMPLE_STRIDE).take(8) {
            next[offset] = 200;
        }
        let detections = source
            .detect(&Frame::from_bytes(next), FrameSize::default())
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].confidence - 0.4).abs() < 1e-6);
        assert!(!source.scores_confidence());
    }

    #[test]
    fn identical_and_small_changes_ignored() {
        let mut source = FrameDiffSource::new();
        source.detect(&frame(10, 1000), FrameSize::default()).unwrap();
        assert!(source
            .detect(&frame(10, 1000), FrameSize::default())
            .unwrap()
            .is_empty());
        assert!(source
            .detect(&frame(35, 1000), FrameSize::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn reset_forgets_previous_frame() {
        let mut source = FrameDiffSource::new();
        source.detect(&frame(0, 1000), FrameSize::default()).unwrap();
        source.reset();
        assert!(source
            .detect(&frame(255, 1000), FrameSize::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn changed_fraction_samples_common_prefix() {
        let current = vec![100u8; 200];
        let mut previous = vec![100u8; 100];
        previous[50] = 0;
        assert_eq!(changed_fraction(&current, &previous), 0.5);
    }
}
