//! Per-frame worker logic (C6): tracker maintenance, detector invocation,
//! region selection, encrypt+obfuscate, metadata emission.
//!
//! Grounded step-for-step on `original_source/scripts/video_pipeline.py`'s
//! `worker()` function.

use std::sync::{Arc, Mutex};

use crate::crypto::{self, Key};
use crate::detect::Detector;
use crate::obfuscate::{self, ObfuscationStyle};
use crate::pack::{Region, RegionSource};
use crate::progress::{JsonProgressSink, ProgressEvent};
use crate::track::{CorrelationTracker, Tracker};
use crate::{Frame, RvaError};

/// Per-job configuration the worker consults on every frame; immutable for
/// the life of the job.
pub struct WorkerConfig {
    pub aes_key: Key,
    pub style: ObfuscationStyle,
    pub sensitive_classes: Vec<String>,
    pub detector_enabled: bool,
    pub detector: Option<Arc<Mutex<dyn Detector>>>,
    pub manual_seed_bboxes: Vec<(u32, u32, u32, u32)>,
}

/// Mutable per-job worker state: live trackers and the one-shot manual-seed
/// flag. Lives for the full job, same as the detector/tracker objects it
/// owns.
pub struct Worker {
    cfg: WorkerConfig,
    trackers: Vec<(String, CorrelationTracker)>,
    manual_seeded: bool,
}

impl Worker {
    pub fn new(cfg: WorkerConfig) -> Self {
        Self {
            cfg,
            trackers: Vec::new(),
            manual_seeded: false,
        }
    }

    /// Runs the five-step per-frame procedure, returning
    /// the obfuscated frame and the regions recorded for it (manual regions
    /// first, per the explicit ordering tie-break).
    pub fn process_frame(
        &mut self,
        frame: Frame,
        progress: Option<&JsonProgressSink>,
    ) -> Result<(Frame, Vec<Region>), RvaError> {
        let mut processed = frame.clone();

        if !self.manual_seeded {
            for (idx, bbox) in self.cfg.manual_seed_bboxes.iter().enumerate() {
                let clamped = clamp_bbox(*bbox, frame.width, frame.height);
                if is_degenerate(clamped) {
                    continue;
                }
                let (x1, y1, x2, y2) = clamped;
                let tracker = CorrelationTracker::init(&frame, (x1, y1, x2 - x1, y2 - y1));
                self.trackers.push((format!("manual_{idx}"), tracker));
            }
            self.manual_seeded = true;
        }

        let mut manual_regions = Vec::new();
        let mut still_alive = Vec::with_capacity(self.trackers.len());
        for (label, mut tracker) in self.trackers.drain(..) {
            let Some((x, y, w, h)) = tracker.update(&frame) else {
                // tracking lost: drop the entry entirely
                continue;
            };
            let bbox = clamp_bbox((x, y, x + w, y + h), frame.width, frame.height);
            if is_degenerate(bbox) {
                still_alive.push((label, tracker));
                continue;
            }

            let region = seal_and_obfuscate(
                &frame,
                &mut processed,
                bbox,
                label.clone(),
                1.0,
                RegionSource::Manual,
                &self.cfg.aes_key,
                self.cfg.style,
            )?;
            if let Some(sink) = progress {
                sink.emit(&ProgressEvent::ManualRoi {
                    frame_index: frame.frame_index,
                    label: label.clone(),
                    bbox,
                });
            }
            manual_regions.push(region);
            still_alive.push((label, tracker));
        }
        self.trackers = still_alive;

        let mut detection_regions = Vec::new();
        if self.cfg.detector_enabled && !self.cfg.sensitive_classes.is_empty() {
            if let Some(detector) = &self.cfg.detector {
                // Detector runs on the already-obfuscated `processed` frame,
                // not the source frame: replicated faithfully from
                // `video_pipeline.py`'s `model(processed_frame, ...)` call.
                // Kept deliberately rather than fixed, see DESIGN.md's open
                // question about detector recall near manual ROIs.
                let boxes = {
                    let mut guard = detector
                        .lock()
                        .map_err(|_| RvaError::InternalError("detector lock poisoned".into()))?;
                    guard.detect(&processed)?
                };
                for detection in boxes {
                    if !self
                        .cfg
                        .sensitive_classes
                        .iter()
                        .any(|c| c == &detection.label)
                    {
                        continue;
                    }
                    let raw = detection.xyxy;
                    let bbox = clamp_bbox(
                        (
                            raw[0].max(0.0) as u32,
                            raw[1].max(0.0) as u32,
                            raw[2].max(0.0) as u32,
                            raw[3].max(0.0) as u32,
                        ),
                        frame.width,
                        frame.height,
                    );
                    if is_degenerate(bbox) {
                        continue;
                    }

                    let region = seal_and_obfuscate(
                        &frame,
                        &mut processed,
                        bbox,
                        detection.label.clone(),
                        detection.confidence,
                        RegionSource::Detection,
                        &self.cfg.aes_key,
                        self.cfg.style,
                    )?;
                    if let Some(sink) = progress {
                        sink.emit(&ProgressEvent::Detection {
                            frame_index: frame.frame_index,
                            label: detection.label.clone(),
                            confidence: detection.confidence,
                            bbox,
                        });
                    }
                    detection_regions.push(region);
                }
            }
        }

        let mut regions = manual_regions;
        regions.extend(detection_regions);
        Ok((processed, regions))
    }
}

/// Extracts the source ROI, seals it, obfuscates `processed` in place, and
/// builds the pack [`Region`] record. The ciphertext always comes from
/// `source`, never from `processed`: encrypt-then-obfuscate ordering.
#[allow(clippy::too_many_arguments)]
fn seal_and_obfuscate(
    source: &Frame,
    processed: &mut Frame,
    bbox: (u32, u32, u32, u32),
    label: String,
    confidence: f32,
    region_source: RegionSource,
    aes_key: &Key,
    style: ObfuscationStyle,
) -> Result<Region, RvaError> {
    let roi = extract_roi(source, bbox);
    let cipher = crypto::seal(&roi, aes_key)?;

    obfuscate::apply(&mut processed.pixels, processed.width, processed.height, bbox, style);

    let (x1, y1, x2, y2) = bbox;
    Ok(Region {
        label,
        confidence,
        x1,
        y1,
        x2,
        y2,
        source: region_source,
        cipher,
    })
}

/// Copies the `(y2-y1)*(x2-x1)*3` bytes of `bbox` out of `frame`, row-major.
fn extract_roi(frame: &Frame, bbox: (u32, u32, u32, u32)) -> Vec<u8> {
    let (x1, y1, x2, y2) = bbox;
    let row_bytes = ((x2 - x1) as usize) * 3;
    let mut roi = Vec::with_capacity(row_bytes * (y2 - y1) as usize);
    for y in y1..y2 {
        let row_start = (y as usize * frame.width as usize + x1 as usize) * 3;
        roi.extend_from_slice(&frame.pixels[row_start..row_start + row_bytes]);
    }
    roi
}

/// Clamps `bbox` to `0 ≤ x1,y1` and `x2 ≤ width, y2 ≤ height` (invariant I3's
/// bound, prior to the degeneracy check).
fn clamp_bbox(bbox: (u32, u32, u32, u32), width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (x1, y1, x2, y2) = bbox;
    (x1.min(width), y1.min(height), x2.min(width), y2.min(height))
}

fn is_degenerate(bbox: (u32, u32, u32, u32)) -> bool {
    let (x1, y1, x2, y2) = bbox;
    x2 <= x1 || y2 <= y1
}
