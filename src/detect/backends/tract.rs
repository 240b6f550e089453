#![cfg(feature = "detect-tract")]

//! ONNX-backed detector (feature `detect-tract`): the closest in-ecosystem
//! stand-in for the original YOLOv8/ultralytics model, adapted from a
//! classification backend to an object-detection box contract (class id,
//! label, confidence, absolute-pixel `xyxy`).

use std::collections::HashMap;
use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionBox, Detector};
use crate::error::RvaError;
use crate::Frame;

const ABSOLUTE_COORD_THRESHOLD: f32 = 1.5;

/// Runs inference on a fixed-size RGB input and maps output tensors to
/// [`DetectionBox`]es using a caller-supplied `class_id -> label` table,
/// mirroring the external detector interface's `names` mapping (spec §6).
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    names: HashMap<i64, String>,
}

impl TractDetector {
    /// Loads an ONNX model from disk and prepares it for inference against
    /// `input_width x input_height` RGB frames.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_width: u32,
        input_height: u32,
        names: HashMap<i64, String>,
    ) -> Result<Self, RvaError> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| RvaError::DetectorError(format!("failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .map_err(|e| RvaError::DetectorError(format!("failed to set input fact: {e}")))?
            .into_optimized()
            .map_err(|e| RvaError::DetectorError(format!("failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| RvaError::DetectorError(format!("failed to build runnable model: {e}")))?;

        Ok(Self {
            model,
            input_width,
            input_height,
            confidence_threshold: 0.5,
            names,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor, RvaError> {
        if frame.width != self.input_width || frame.height != self.input_height {
            return Err(RvaError::DetectorError(format!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width, frame.height, self.input_width, self.input_height
            )));
        }

        let width = frame.width as usize;
        let height = frame.height as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height, width),
            |(_, channel, y, x)| {
                // frame is BGR per the encoder contract; channel 0 of the
                // tensor is expected to be R by ONNX convention.
                let idx = (y * width + x) * 3;
                let bgr_channel = 2 - channel;
                frame.pixels[idx + bgr_channel] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn label_for(&self, class_id: i64) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    fn extract_detections(
        &self,
        outputs: TVec<Tensor>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<DetectionBox>, RvaError> {
        if outputs.is_empty() {
            return Err(RvaError::DetectorError("model produced no outputs".into()));
        }
        match outputs.len() {
            1 => self.parse_combined_output(&outputs[0], frame_width, frame_height),
            3.. => self.parse_separate_outputs(&outputs, frame_width, frame_height),
            _ => Err(RvaError::DetectorError(format!(
                "expected either 1 or 3+ output tensors, got {}",
                outputs.len()
            ))),
        }
    }

    fn parse_combined_output(
        &self,
        output: &Tensor,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<DetectionBox>, RvaError> {
        let shape = output.shape();
        let data = output
            .to_array_view::<f32>()
            .map_err(|_| RvaError::DetectorError("combined output tensor was not f32".into()))?
            .as_slice()
            .ok_or_else(|| RvaError::DetectorError("combined output tensor is not contiguous".into()))?;

        let (rows, cols) = match shape {
            [1, n, 6] => (*n, 6),
            [n, 6] => (*n, 6),
            _ => {
                return Err(RvaError::DetectorError(format!(
                    "combined output tensor must have shape [N,6] or [1,N,6], got {:?}",
                    shape
                )))
            }
        };
        if data.len() != rows.saturating_mul(cols) {
            return Err(RvaError::DetectorError(format!(
                "combined output tensor has {} values, expected {}",
                data.len(),
                rows.saturating_mul(cols)
            )));
        }

        let mut detections = Vec::new();
        for chunk in data.chunks(cols) {
            let confidence = chunk[4];
            if !confidence.is_finite() || confidence < self.confidence_threshold {
                continue;
            }
            let class_id = chunk[5].round() as i64;
            if let Some(xyxy) =
                self.absolute_box([chunk[0], chunk[1], chunk[2], chunk[3]], frame_width, frame_height)?
            {
                detections.push(DetectionBox {
                    class_id,
                    label: self.label_for(class_id),
                    confidence,
                    xyxy,
                });
            }
        }
        Ok(detections)
    }

    fn parse_separate_outputs(
        &self,
        outputs: &TVec<Tensor>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<DetectionBox>, RvaError> {
        let boxes = Self::extract_tensor_rows(&outputs[0], 4)?;
        let scores = Self::extract_scalar_rows(&outputs[1])?;
        let classes = Self::extract_class_ids(&outputs[2])?;

        if boxes.len() != scores.len() || boxes.len() != classes.len() {
            return Err(RvaError::DetectorError(format!(
                "output tensor lengths mismatch: boxes {}, scores {}, classes {}",
                boxes.len(),
                scores.len(),
                classes.len()
            )));
        }

        let mut detections = Vec::new();
        for ((raw_box, confidence), class_id) in
            boxes.into_iter().zip(scores.into_iter()).zip(classes.into_iter())
        {
            if !confidence.is_finite() || confidence < self.confidence_threshold {
                continue;
            }
            if let Some(xyxy) = self.absolute_box(
                [raw_box[0], raw_box[1], raw_box[2], raw_box[3]],
                frame_width,
                frame_height,
            )? {
                detections.push(DetectionBox {
                    class_id,
                    label: self.label_for(class_id),
                    confidence,
                    xyxy,
                });
            }
        }
        Ok(detections)
    }

    fn extract_tensor_rows(output: &Tensor, cols: usize) -> Result<Vec<Vec<f32>>, RvaError> {
        let shape = output.shape();
        let data = output
            .to_array_view::<f32>()
            .map_err(|_| RvaError::DetectorError("tensor was not f32".into()))?
            .as_slice()
            .ok_or_else(|| RvaError::DetectorError("tensor is not contiguous".into()))?;
        let rows = match shape {
            [1, n, c] if *c == cols => *n,
            [n, c] if *c == cols => *n,
            _ => {
                return Err(RvaError::DetectorError(format!(
                    "tensor must have shape [N,{cols}] or [1,N,{cols}], got {:?}",
                    shape
                )))
            }
        };
        let expected = rows.saturating_mul(cols);
        if data.len() != expected {
            return Err(RvaError::DetectorError(format!(
                "tensor has {} values, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(data.chunks(cols).map(|c| c.to_vec()).collect())
    }

    fn extract_scalar_rows(output: &Tensor) -> Result<Vec<f32>, RvaError> {
        let shape = output.shape();
        let data = output
            .to_array_view::<f32>()
            .map_err(|_| RvaError::DetectorError("scores tensor was not f32".into()))?
            .as_slice()
            .ok_or_else(|| RvaError::DetectorError("scores tensor is not contiguous".into()))?;
        let len = match shape {
            [1, n] | [n] | [1, n, 1] => *n,
            _ => {
                return Err(RvaError::DetectorError(format!(
                    "scores tensor must have shape [N], [1,N], or [1,N,1], got {:?}",
                    shape
                )))
            }
        };
        if data.len() != len {
            return Err(RvaError::DetectorError(format!(
                "scores tensor has {} values, expected {}",
                data.len(),
                len
            )));
        }
        Ok(data.to_vec())
    }

    fn extract_class_ids(output: &Tensor) -> Result<Vec<i64>, RvaError> {
        let shape = output.shape();
        let len = match shape {
            [1, n] | [n] | [1, n, 1] => *n,
            _ => {
                return Err(RvaError::DetectorError(format!(
                    "class tensor must have shape [N], [1,N], or [1,N,1], got {:?}",
                    shape
                )))
            }
        };
        if let Ok(view) = output.to_array_view::<i64>() {
            let data = view
                .as_slice()
                .ok_or_else(|| RvaError::DetectorError("class tensor (i64) is not contiguous".into()))?;
            if data.len() != len {
                return Err(RvaError::DetectorError(format!(
                    "class tensor (i64) has {} values, expected {}",
                    data.len(),
                    len
                )));
            }
            Ok(data.to_vec())
        } else if let Ok(view) = output.to_array_view::<f32>() {
            let data = view
                .as_slice()
                .ok_or_else(|| RvaError::DetectorError("class tensor (f32) is not contiguous".into()))?;
            if data.len() != len {
                return Err(RvaError::DetectorError(format!(
                    "class tensor (f32) has {} values, expected {}",
                    data.len(),
                    len
                )));
            }
            Ok(data.iter().map(|v| v.round() as i64).collect())
        } else {
            Err(RvaError::DetectorError(format!(
                "class tensor must be i64 or f32, but was {:?}",
                output.datum_type()
            )))
        }
    }

    /// Converts a raw box (normalized 0..1, or absolute pixels when any
    /// coordinate exceeds [`ABSOLUTE_COORD_THRESHOLD`]) into absolute-pixel
    /// `[x1, y1, x2, y2]`. Returns `None` for a degenerate box.
    fn absolute_box(
        &self,
        raw: [f32; 4],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Option<[f32; 4]>, RvaError> {
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RvaError::DetectorError("box coordinates were not finite".into()));
        }

        let absolute = raw.iter().any(|v| *v > ABSOLUTE_COORD_THRESHOLD);
        let (mut x1, mut y1, mut x2, mut y2) = (raw[0], raw[1], raw[2], raw[3]);
        if !absolute {
            x1 *= frame_width as f32;
            x2 *= frame_width as f32;
            y1 *= frame_height as f32;
            y2 *= frame_height as f32;
        }

        x1 = x1.clamp(0.0, frame_width as f32);
        y1 = y1.clamp(0.0, frame_height as f32);
        x2 = x2.clamp(0.0, frame_width as f32);
        y2 = y2.clamp(0.0, frame_height as f32);

        if x2 <= x1 || y2 <= y1 {
            return Ok(None);
        }
        Ok(Some([x1, y1, x2, y2]))
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionBox>, RvaError> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input))
            .map_err(|e| RvaError::DetectorError(format!("ONNX inference failed: {e}")))?;
        self.extract_detections(outputs, frame.width, frame.height)
    }
}
