//! Extracted image payloads.
//!
//! A `Frame` owns the encoded bytes of one image cut from the camera stream.
//! It lives for one control-loop cycle and is released when dropped. Frames
//! are deliberately not `Clone`: each payload has exactly one owner.
//!
//! ```compile_fail
//! fn duplicate(frame: &presence_relay::Frame) -> presence_relay::Frame {
//!     frame.clone()
//! }
//! ```

use std::time::Instant;

/// One encoded image cut from the stream.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Create a frame. Called by the demuxer once the payload has been copied out.
    pub(crate) fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from bytes obtained outside the demuxer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(data, 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 1-based position of this frame in the connection's frame count.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Give up the frame and keep its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Pixel dimensions of the frames fed to detection and zone overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
        }
    }
}
