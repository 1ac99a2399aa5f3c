//! Detection sources: pluggable producers of per-cycle detection rectangles.

mod backends;
mod result;
mod source;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub use backends::{BlockMotionSource, FrameDiffSource};
#[cfg(feature = "backend-tract")]
pub use backends::TractSource;
pub use result::{retain_confident, Detection, PERSON_CLASS};
pub use source::DetectionSource;

use crate::config::DetectionSettings;
use crate::frame::FrameSize;

/// Which detection source the daemon runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Byte-level differencing of encoded frames.
    #[default]
    FrameDiff,
    /// Block differencing of decoded pixels (feature: decode-jpeg).
    BlockMotion,
    /// ONNX person model (feature: backend-tract).
    Tract,
}

impl DetectorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "frame-diff" | "motion" => Ok(Self::FrameDiff),
            "block-motion" => Ok(Self::BlockMotion),
            "tract" | "model" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector '{}'; expected frame-diff, block-motion or tract",
                other
            )),
        }
    }
}

/// Build the configured source.
///
/// When a model-backed source cannot be built and `allow_motion_fallback` is
/// set, frame differencing is used instead and the substitution is logged.
pub fn build_source(
    settings: &DetectionSettings,
    frame_size: FrameSize,
) -> Result<Box<dyn DetectionSource>> {
    match build_exact(settings, frame_size) {
        Ok(source) => Ok(source),
        Err(err) if settings.allow_motion_fallback && settings.kind != DetectorKind::FrameDiff => {
            log::warn!(
                "detector {:?} unavailable ({}); falling back to frame-diff motion detection",
                settings.kind,
                err
            );
            Ok(Box::new(
                FrameDiffSource::new().with_sensitivity(settings.motion_sensitivity),
            ))
        }
        Err(err) => Err(err),
    }
}

// Only the model backend sizes its input from the frame.
#[cfg_attr(not(feature = "backend-tract"), allow(unused_variables))]
fn build_exact(
    settings: &DetectionSettings,
    frame_size: FrameSize,
) -> Result<Box<dyn DetectionSource>> {
    match settings.kind {
        DetectorKind::FrameDiff => Ok(Box::new(
            FrameDiffSource::new().with_sensitivity(settings.motion_sensitivity),
        )),
        DetectorKind::BlockMotion => {
            #[cfg(feature = "decode-jpeg")]
            {
                Ok(Box::new(BlockMotionSource::new()))
            }
            #[cfg(not(feature = "decode-jpeg"))]
            {
                Err(anyhow!("block-motion detection requires the decode-jpeg feature"))
            }
        }
        DetectorKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                let path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract detector requires detection.model_path"))?;
                let source = TractSource::new(path, frame_size.width, frame_size.height)?
                    .with_threshold(settings.threshold);
                Ok(Box::new(source))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                Err(anyhow!("tract detection requires the backend-tract feature"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detector_names() {
        assert_eq!(DetectorKind::parse("motion").unwrap(), DetectorKind::FrameDiff);
        assert_eq!(
            DetectorKind::parse(" Block-Motion ").unwrap(),
            DetectorKind::BlockMotion
        );
        assert_eq!(DetectorKind::parse("tract").unwrap(), DetectorKind::Tract);
        assert!(DetectorKind::parse("yolo").is_err());
    }

    #[test]
    fn frame_diff_always_builds() {
        let settings = DetectionSettings::default();
        let source = build_source(&settings, FrameSize::default()).unwrap();
        assert_eq!(source.name(), "frame-diff");
    }

    #[test]
    fn missing_model_falls_back_only_when_allowed() {
        let mut settings = DetectionSettings {
            kind: DetectorKind::Tract,
            model_path: None,
            ..DetectionSettings::default()
        };
        settings.allow_motion_fallback = true;
        let source = build_source(&settings, FrameSize::default()).unwrap();
        assert_eq!(source.name(), "frame-diff");

        settings.allow_motion_fallback = false;
        assert!(build_source(&settings, FrameSize::default()).is_err());
    }
}
