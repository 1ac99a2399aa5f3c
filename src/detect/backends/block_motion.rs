#[cfg(feature = "decode-jpeg")]
use anyhow::Result;

use crate::detect::result::Detection;
#[cfg(feature = "decode-jpeg")]
use crate::detect::source::DetectionSource;
#[cfg(feature = "decode-jpeg")]
use crate::frame::{Frame, FrameSize};

const BLOCK: u32 = 16;
const DEFAULT_BLOCK_THRESHOLD: u32 = 16_000;

/// Block-wise frame differencing over decoded RGB888 pixels.
///
/// Each 16x16 block whose summed per-channel delta exceeds the threshold
/// becomes one detection, with confidence `min(1, diff / (3 * threshold))`.
pub struct BlockMotionSource {
    previous: Vec<u8>,
    width: u32,
    height: u32,
    block_threshold: u32,
}

impl BlockMotionSource {
    pub fn new() -> Self {
        Self {
            previous: Vec::new(),
            width: 0,
            height: 0,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
        }
    }

    pub fn with_block_threshold(mut self, threshold: u32) -> Self {
        self.block_threshold = threshold.max(1);
        self
    }

    /// Compare `rgb` against the previous frame and store it.
    ///
    /// A size change re-primes the detector and reports nothing.
    pub fn detect_pixels(&mut self, rgb: &[u8], width: u32, height: u32) -> Vec<Detection> {
        let expected = width as usize * height as usize * 3;
        if expected == 0 || rgb.len() != expected {
            log::debug!(
                "block motion skipped: {} bytes for {}x{} frame",
                rgb.len(),
                width,
                height
            );
            return Vec::new();
        }
        if self.width != width || self.height != height || self.previous.len() != expected {
            self.prime(rgb, width, height);
            return Vec::new();
        }

        let mut detections = Vec::new();
        for by in 0..height / BLOCK {
            for bx in 0..width / BLOCK {
                let diff = self.block_diff(rgb, bx * BLOCK, by * BLOCK);
                if diff > self.block_threshold {
                    let confidence =
                        (diff as f32 / (self.block_threshold as f32 * 3.0)).min(1.0);
                    detections.push(Detection::new(
                        (bx * BLOCK) as f32 / width as f32,
                        (by * BLOCK) as f32 / height as f32,
                        BLOCK as f32 / width as f32,
                        BLOCK as f32 / height as f32,
                        confidence,
                    ));
                }
            }
        }
        self.previous.copy_from_slice(rgb);
        detections
    }

    fn block_diff(&self, rgb: &[u8], x0: u32, y0: u32) -> u32 {
        let width = self.width as usize;
        let mut diff = 0u32;
        for y in y0 as usize..(y0 + BLOCK) as usize {
            let row = (y * width + x0 as usize) * 3;
            let end = row + BLOCK as usize * 3;
            for (current, previous) in rgb[row..end].iter().zip(&self.previous[row..end]) {
                diff += current.abs_diff(*previous) as u32;
            }
        }
        diff
    }

    fn prime(&mut self, rgb: &[u8], width: u32, height: u32) {
        self.previous.clear();
        self.previous.extend_from_slice(rgb);
        self.width = width;
        self.height = height;
    }
}

impl Default for BlockMotionSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "decode-jpeg")]
impl DetectionSource for BlockMotionSource {
    fn name(&self) -> &'static str {
        "block-motion"
    }

    fn detect(&mut self, frame: &Frame, _size: FrameSize) -> Result<Vec<Detection>> {
        let (pixels, width, height) = crate::decode::decode_rgb(frame.as_bytes())?;
        Ok(self.detect_pixels(&pixels, width, height))
    }

    fn reset(&mut self) {
        self.previous.clear();
        self.width = 0;
        self.height = 0;
    }

    fn scores_confidence(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; (width * height * 3) as usize]
    }

    #[test]
    fn changed_block_reported_at_its_position() {
        let (width, height) = (64, 32);
        let mut source = BlockMotionSource::new();
        assert!(source
            .detect_pixels(&solid(width, height, 0), width, height)
            .is_empty());

        let mut next = solid(width, height, 0);
        for y in 16..32 {
            for x in 32..48 {
                let idx = ((y * width + x) * 3) as usize;
                next[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let detections = source.detect_pixels(&next, width, height);
        assert_eq!(detections.len(), 1);
        let detection = detections[0];
        assert_eq!(detection.x, 0.5);
        assert_eq!(detection.y, 0.5);
        assert_eq!(detection.w, 0.25);
        assert_eq!(detection.h, 0.5);
        assert_eq!(detection.confidence, 1.0);
    }

    #[test]
    fn size_change_reprimes() {
        let mut source = BlockMotionSource::new();
        source.detect_pixels(&solid(32, 32, 0), 32, 32);
        assert!(source
            .detect_pixels(&solid(48, 32, 255), 48, 32)
            .is_empty());
        assert!(source
            .detect_pixels(&solid(48, 32, 255), 48, 32)
            .is_empty());
    }

    #[test]
    fn short_pixel_buffer_ignored() {
        let mut source = BlockMotionSource::new();
        assert!(source.detect_pixels(&[0u8; 10], 32, 32).is_empty());
    }
}
