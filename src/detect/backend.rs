use crate::error::RvaError;
use crate::Frame;

/// One detector-sourced bounding box (external detector interface, §6):
/// a class id, its label, a confidence in `[0, 1]`, and an absolute-pixel
/// `[x1, y1, x2, y2]` box.
#[derive(Clone, Debug)]
pub struct DetectionBox {
    pub class_id: i64,
    pub label: String,
    pub confidence: f32,
    pub xyxy: [f32; 4],
}

/// A detector backend: an external collaborator supplying class-labelled
/// bounding boxes for a frame.
///
/// The external interface's `verbose` flag (and the retry-without-it rule
/// for implementations that reject it) only matters for detectors backed by
/// an external process; both backends here run in-process and simply
/// ignore it.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Runs detection on `frame`, returning every box the backend produced
    /// before any confidence or class filtering; callers (the pipeline
    /// worker) apply the sensitive-classes filter themselves.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionBox>, RvaError>;

    /// Optional warm-up hook (e.g. loading model weights eagerly).
    fn warm_up(&mut self) -> Result<(), RvaError> {
        Ok(())
    }
}
