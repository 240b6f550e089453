use crate::detect::backend::{DetectionBox, Detector};
use crate::error::RvaError;
use crate::Frame;

/// Deterministic detector used in tests and whenever detection is disabled.
///
/// Returns a fixed, caller-supplied set of boxes for every frame (empty by
/// default), rather than running any real model.
#[derive(Clone, Debug, Default)]
pub struct StubDetector {
    scripted: Vec<DetectionBox>,
}

impl StubDetector {
    /// A stub that reports no detections on any frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub that reports the same fixed set of boxes on every frame.
    pub fn with_script(scripted: Vec<DetectionBox>) -> Self {
        Self { scripted }
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectionBox>, RvaError> {
        Ok(self.scripted.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame() -> Frame {
        Frame {
            frame_index: 0,
            width: 10,
            height: 10,
            pixels: vec![0u8; 300],
        }
    }

    #[test]
    fn default_stub_reports_nothing() {
        let mut stub = StubDetector::new();
        let boxes = stub.detect(&blank_frame()).unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn scripted_stub_repeats_on_every_frame() {
        let scripted = vec![DetectionBox {
            class_id: 0,
            label: "person".into(),
            confidence: 0.9,
            xyxy: [1.0, 1.0, 5.0, 5.0],
        }];
        let mut stub = StubDetector::with_script(scripted.clone());
        let first = stub.detect(&blank_frame()).unwrap();
        let second = stub.detect(&blank_frame()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].label, scripted[0].label);
    }
}
