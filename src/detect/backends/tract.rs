#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::result::{retain_confident, Detection};
use crate::detect::source::DetectionSource;
use crate::frame::{Frame, FrameSize};

const ROW_LEN: usize = 6;

/// Person detection with an ONNX model run through tract.
///
/// The model takes a `1x3xHxW` float tensor in `0..1` and emits rows of
/// `[x, y, w, h, score, class]` with normalized box coordinates.
pub struct TractSource {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractSource {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        let mut detections = parse_rows(&values);
        retain_confident(&mut detections, self.confidence_threshold);
        Ok(detections)
    }
}

/// Interpret a flat `[x, y, w, h, score, class]*` buffer. Trailing partial rows are ignored.
fn parse_rows(values: &[f32]) -> Vec<Detection> {
    values
        .chunks_exact(ROW_LEN)
        .filter(|row| row.iter().all(|value| value.is_finite()))
        .map(|row| {
            Detection::new(
                row[0].clamp(0.0, 1.0),
                row[1].clamp(0.0, 1.0),
                row[2].clamp(0.0, 1.0),
                row[3].clamp(0.0, 1.0),
                row[4],
            )
            .with_class(row[5].max(0.0) as u32)
        })
        .collect()
}

impl DetectionSource for TractSource {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, _size: FrameSize) -> Result<Vec<Detection>> {
        let (pixels, width, height) = crate::decode::decode_rgb(frame.as_bytes())?;
        let input = self.build_input(&pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs)
    }
}
