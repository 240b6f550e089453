//! End-to-end scenarios for the anonymize/restore round trip.
//!
//! Exercises the full `pipeline::run_anonymize_job` + `restore::run` chain
//! against an in-memory stand-in for the video codec, so these tests never
//! touch a real ffmpeg installation: a tiny length-prefixed raw-frame
//! container that a [`FakeDecoder`]/[`FakeEncoder`] pair can round-trip.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use rva_kernel::crypto::Key;
use rva_kernel::detect::{DetectionBox, Detector, DetectorRegistry, StubDetector};
use rva_kernel::obfuscate::ObfuscationStyle;
use rva_kernel::pipeline::{run_anonymize_job, AnonymizeRequest};
use rva_kernel::video::{Decoder, Encoder};
use rva_kernel::{mp4, pack, restore, Frame, RvaError};

/// A raw, uncompressed frame container used only by these tests:
/// `fps:f64, width:u32, height:u32, frame_count:u32` followed by
/// `frame_count` packed BGR24 planes. Stands in for a real video codec so
/// the pipeline's ordering/cancellation/pack-writing behavior can be
/// verified without an ffmpeg dependency in the test harness.
fn write_fake_video(path: &Path, fps: f64, width: u32, height: u32, frames: &[Vec<u8>]) {
    let mut f = File::create(path).unwrap();
    f.write_all(&fps.to_le_bytes()).unwrap();
    f.write_all(&width.to_le_bytes()).unwrap();
    f.write_all(&height.to_le_bytes()).unwrap();
    f.write_all(&(frames.len() as u32).to_le_bytes()).unwrap();
    for frame in frames {
        f.write_all(frame).unwrap();
    }
}

struct FakeDecoder {
    fps: f64,
    width: u32,
    height: u32,
    frame_count: u32,
    next_index: u32,
    body: Vec<u8>,
}

impl Decoder for FakeDecoder {
    fn open(path: &Path) -> Result<Self, RvaError> {
        let mut f = File::open(path)
            .map_err(|e| RvaError::DecodeOpenFailed(format!("{e}")))?;
        let mut header = [0u8; 20];
        f.read_exact(&mut header)
            .map_err(|e| RvaError::DecodeOpenFailed(format!("{e}")))?;
        let fps = f64::from_le_bytes(header[0..8].try_into().unwrap());
        let width = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let height = u32::from_le_bytes(header[12..16].try_into().unwrap());
        let frame_count = u32::from_le_bytes(header[16..20].try_into().unwrap());
        let mut body = Vec::new();
        f.read_to_end(&mut body)
            .map_err(|e| RvaError::DecodeOpenFailed(format!("{e}")))?;
        Ok(Self {
            fps,
            width,
            height,
            frame_count,
            next_index: 0,
            body,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, RvaError> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let frame_bytes = (self.width as usize) * (self.height as usize) * 3;
        let start = self.next_index as usize * frame_bytes;
        let pixels = self.body[start..start + frame_bytes].to_vec();
        let frame = Frame::new(self.next_index, self.width, self.height, pixels);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn fps(&self) -> f64 {
        self.fps
    }
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.frame_count as u64)
    }
}

struct FakeEncoder {
    path: PathBuf,
    fps: f64,
    width: u32,
    height: u32,
    frames: Vec<Vec<u8>>,
}

impl Encoder for FakeEncoder {
    fn open(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self, RvaError> {
        Ok(Self {
            path: path.to_path_buf(),
            fps,
            width,
            height,
            frames: Vec::new(),
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<(), RvaError> {
        self.frames.push(frame.pixels.clone());
        Ok(())
    }
}

impl Drop for FakeEncoder {
    fn drop(&mut self) {
        write_fake_video(&self.path, self.fps, self.width, self.height, &self.frames);
    }
}

fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let mut buf = vec![0u8; (width * height * 3) as usize];
    for px in buf.chunks_mut(3) {
        px.copy_from_slice(&color);
    }
    buf
}

fn read_pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * width as usize + x as usize) * 3;
    [pixels[idx], pixels[idx + 1], pixels[idx + 2]]
}

// ==================== Scenario 1: manual ROI round trip ====================

#[test]
fn manual_roi_round_trip_restores_exact_pixels() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rvavideo");
    let output = dir.path().join("out.rvavideo");
    let data_pack = dir.path().join("out.rvapack");
    let restored = dir.path().join("restored.rvavideo");

    let (width, height, fps) = (640u32, 480u32, 30.0);
    let frames: Vec<Vec<u8>> = (0..10).map(|_| solid_frame(width, height, [30, 60, 90])).collect();
    write_fake_video(&input, fps, width, height, &frames);

    let aes_key = Key::random(32).unwrap();
    let hmac_key = Key::random(32).unwrap();

    let request = AnonymizeRequest {
        input: input.clone(),
        output: output.clone(),
        data_pack: data_pack.clone(),
        aes_key: aes_key.clone(),
        hmac_key: hmac_key.clone(),
        style: ObfuscationStyle::Blur,
        classes: vec![],
        manual_rois: vec![(100, 100, 200, 200)],
        disable_detector: true,
        detector: None,
        embed_pack: false,
        embedded_output: None,
    };

    let outcome =
        run_anonymize_job::<FakeDecoder, FakeEncoder>(request, Arc::new(AtomicBool::new(false)), None)
            .unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(outcome.frames_processed, 10);

    // invariant I2: strictly increasing frame indices, one entry per frame.
    let reader = pack::DataPackReader::open(&data_pack).unwrap();
    assert!(reader.verify(&hmac_key).unwrap());
    let mut last_index: Option<u32> = None;
    let mut count = 0;
    for entry in reader.iter_frames().unwrap() {
        let (frame_index, regions) = entry.unwrap();
        if let Some(last) = last_index {
            assert!(frame_index > last, "frame indices must be strictly increasing");
        }
        last_index = Some(frame_index);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, "manual_0");
        // invariant I3: bbox fully inside the frame.
        assert!(regions[0].bbox_within(width, height));
        count += 1;
    }
    assert_eq!(count, 10);

    restore::run::<FakeDecoder, FakeEncoder>(
        &output,
        &data_pack,
        &aes_key,
        &hmac_key,
        &restored,
        None,
    )
    .unwrap();

    let mut decoder = FakeDecoder::open(&restored).unwrap();
    let mut restored_count = 0;
    while let Some(frame) = decoder.next_frame().unwrap() {
        assert_eq!(
            read_pixel(&frame.pixels, width, 150, 150),
            [30, 60, 90],
            "pixels inside the stored bbox must restore bit-exact"
        );
        restored_count += 1;
    }
    assert_eq!(restored_count, 10);
}

// ==================== Scenario 2: detector-sourced regions ====================

struct ScriptedDetector(Vec<DetectionBox>);

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectionBox>, RvaError> {
        Ok(self.0.clone())
    }
}

#[test]
fn detector_sourced_region_round_trips() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rvavideo");
    let output = dir.path().join("out.rvavideo");
    let data_pack = dir.path().join("out.rvapack");
    let restored = dir.path().join("restored.rvavideo");

    let (width, height, fps) = (320u32, 240u32, 24.0);
    let frames: Vec<Vec<u8>> = (0..5).map(|_| solid_frame(width, height, [5, 5, 5])).collect();
    write_fake_video(&input, fps, width, height, &frames);

    let aes_key = Key::random(16).unwrap();
    let hmac_key = Key::random(16).unwrap();

    let detector: Arc<Mutex<dyn Detector>> = Arc::new(Mutex::new(ScriptedDetector(vec![DetectionBox {
        class_id: 0,
        label: "person".into(),
        confidence: 0.8,
        xyxy: [50.0, 50.0, 150.0, 250.0],
    }])));

    let request = AnonymizeRequest {
        input: input.clone(),
        output: output.clone(),
        data_pack: data_pack.clone(),
        aes_key: aes_key.clone(),
        hmac_key: hmac_key.clone(),
        style: ObfuscationStyle::Pixelate,
        classes: vec!["person".to_string()],
        manual_rois: vec![],
        disable_detector: false,
        detector: Some(detector),
        embed_pack: false,
        embedded_output: None,
    };

    run_anonymize_job::<FakeDecoder, FakeEncoder>(request, Arc::new(AtomicBool::new(false)), None).unwrap();

    let reader = pack::DataPackReader::open(&data_pack).unwrap();
    assert!(reader.verify(&hmac_key).unwrap());
    for entry in reader.iter_frames().unwrap() {
        let (_, regions) = entry.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, "person");
        assert_eq!(regions[0].source, pack::RegionSource::Detection);
    }

    restore::run::<FakeDecoder, FakeEncoder>(&output, &data_pack, &aes_key, &hmac_key, &restored, None)
        .unwrap();
    let mut decoder = FakeDecoder::open(&restored).unwrap();
    while let Some(frame) = decoder.next_frame().unwrap() {
        assert_eq!(read_pixel(&frame.pixels, width, 100, 100), [5, 5, 5]);
    }
}

// ==================== Scenario 3: no regions at all ====================

#[test]
fn no_regions_produces_empty_pack_with_valid_hmac() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rvavideo");
    let output = dir.path().join("out.rvavideo");
    let data_pack = dir.path().join("out.rvapack");

    let (width, height, fps) = (64u32, 48u32, 15.0);
    let frames: Vec<Vec<u8>> = (0..4).map(|_| solid_frame(width, height, [1, 2, 3])).collect();
    write_fake_video(&input, fps, width, height, &frames);

    let aes_key = Key::random(32).unwrap();
    let hmac_key = Key::random(32).unwrap();

    let request = AnonymizeRequest {
        input: input.clone(),
        output: output.clone(),
        data_pack: data_pack.clone(),
        aes_key: aes_key.clone(),
        hmac_key: hmac_key.clone(),
        style: ObfuscationStyle::Blur,
        classes: vec![],
        manual_rois: vec![],
        disable_detector: true,
        detector: None,
        embed_pack: false,
        embedded_output: None,
    };

    run_anonymize_job::<FakeDecoder, FakeEncoder>(request, Arc::new(AtomicBool::new(false)), None).unwrap();

    let reader = pack::DataPackReader::open(&data_pack).unwrap();
    assert!(reader.verify(&hmac_key).unwrap());
    let frames: Vec<_> = reader.iter_frames().unwrap().collect::<Result<_, _>>().unwrap();
    assert!(frames.is_empty());
}

// ==================== Scenario 4: wrong hmac key fails restore ====================

#[test]
fn restore_fails_fast_on_wrong_hmac_key() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rvavideo");
    let output = dir.path().join("out.rvavideo");
    let data_pack = dir.path().join("out.rvapack");
    let restored = dir.path().join("restored.rvavideo");

    let (width, height, fps) = (80u32, 60u32, 30.0);
    let frames: Vec<Vec<u8>> = (0..3).map(|_| solid_frame(width, height, [9, 9, 9])).collect();
    write_fake_video(&input, fps, width, height, &frames);

    let aes_key = Key::random(32).unwrap();
    let hmac_key = Key::random(32).unwrap();
    let wrong_hmac_key = Key::random(32).unwrap();

    let request = AnonymizeRequest {
        input: input.clone(),
        output: output.clone(),
        data_pack: data_pack.clone(),
        aes_key: aes_key.clone(),
        hmac_key: hmac_key.clone(),
        style: ObfuscationStyle::Blur,
        classes: vec![],
        manual_rois: vec![(10, 10, 30, 30)],
        disable_detector: true,
        detector: None,
        embed_pack: false,
        embedded_output: None,
    };
    run_anonymize_job::<FakeDecoder, FakeEncoder>(request, Arc::new(AtomicBool::new(false)), None).unwrap();

    let err = restore::run::<FakeDecoder, FakeEncoder>(
        &output,
        &data_pack,
        &aes_key,
        &wrong_hmac_key,
        &restored,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, RvaError::AuthFailed));
    assert!(!restored.exists(), "no output file should be created when auth fails");
}

// ==================== Scenario 6: MP4 embed/extract round trip ====================

#[test]
fn embedded_pack_extracts_byte_identical() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rvavideo");
    let output = dir.path().join("out.rvavideo");
    let data_pack = dir.path().join("out.rvapack");

    let (width, height, fps) = (64u32, 48u32, 10.0);
    let frames: Vec<Vec<u8>> = (0..2).map(|_| solid_frame(width, height, [8, 8, 8])).collect();
    write_fake_video(&input, fps, width, height, &frames);

    let aes_key = Key::random(32).unwrap();
    let hmac_key = Key::random(32).unwrap();

    let request = AnonymizeRequest {
        input: input.clone(),
        output: output.clone(),
        data_pack: data_pack.clone(),
        aes_key,
        hmac_key,
        style: ObfuscationStyle::Blur,
        classes: vec![],
        manual_rois: vec![(0, 0, 10, 10)],
        disable_detector: true,
        detector: None,
        embed_pack: false,
        embedded_output: None,
    };
    run_anonymize_job::<FakeDecoder, FakeEncoder>(request, Arc::new(AtomicBool::new(false)), None).unwrap();

    let original_pack = std::fs::read(&data_pack).unwrap();
    let embedded_copy = dir.path().join("embedded.rvavideo");
    mp4::embed(&output, &data_pack, Some(&embedded_copy)).unwrap();

    let extracted = mp4::extract(&embedded_copy).unwrap();
    assert_eq!(extracted, original_pack);
}

// ==================== Cooperative cancellation ====================

#[test]
fn cancellation_stops_processing_but_still_finalizes_a_valid_pack() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.rvavideo");
    let output = dir.path().join("out.rvavideo");
    let data_pack = dir.path().join("out.rvapack");

    let (width, height, fps) = (32u32, 32u32, 30.0);
    let frames: Vec<Vec<u8>> = (0..50).map(|_| solid_frame(width, height, [2, 2, 2])).collect();
    write_fake_video(&input, fps, width, height, &frames);

    let aes_key = Key::random(32).unwrap();
    let hmac_key = Key::random(32).unwrap();

    let request = AnonymizeRequest {
        input: input.clone(),
        output: output.clone(),
        data_pack: data_pack.clone(),
        aes_key,
        hmac_key: hmac_key.clone(),
        style: ObfuscationStyle::Blur,
        classes: vec![],
        manual_rois: vec![],
        disable_detector: true,
        detector: None,
        embed_pack: false,
        embedded_output: None,
    };

    // already-cancelled token: the pipeline must still finalize a
    // HMAC-valid (if empty/partial) pack rather than leaving it sealed.
    let cancel = Arc::new(AtomicBool::new(true));
    let outcome = run_anonymize_job::<FakeDecoder, FakeEncoder>(request, cancel, None).unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.frames_processed < 50);

    let reader = pack::DataPackReader::open(&data_pack).unwrap();
    assert!(reader.verify(&hmac_key).unwrap());
}

// ==================== Stub detector integration ====================

#[test]
fn disabled_detector_registry_reports_nothing() {
    let mut registry = DetectorRegistry::new();
    registry.register(StubDetector::new());
    let backend = registry.default_backend().unwrap();
    let frame = Frame::new(0, 4, 4, vec![0u8; 48]);
    let boxes = backend.lock().unwrap().detect(&frame).unwrap();
    assert!(boxes.is_empty());
}
