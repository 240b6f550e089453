//! Pipeline orchestrator (C5): three stages, decoder, worker, consumer,
//! connected by bounded single-producer/single-consumer channels, with
//! cooperative cancellation and progress events.
//!
//! Grounded on `api/mod.rs`'s `Arc<AtomicBool>` shutdown flag plus
//! `std::thread::spawn`/`JoinHandle` pattern, generalized from one
//! HTTP-serving thread to three pipeline stages joined by
//! `std::sync::mpsc::sync_channel(32)`.

pub mod worker;

pub use worker::{Worker, WorkerConfig};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::crypto::Key;
use crate::detect::Detector;
use crate::obfuscate::ObfuscationStyle;
use crate::pack::{DataPackWriter, PackHeader, Region};
use crate::progress::{JsonProgressSink, ProgressEvent};
use crate::video::{Decoder, Encoder};
use crate::{mp4, Frame, RvaError};

/// Bounds peak in-flight frames to ~64 (two channels of capacity 32 each).
const CHANNEL_CAPACITY: usize = 32;

/// Outcome of one full run of the pipeline.
pub struct PipelineOutcome {
    pub frames_processed: u64,
    pub total_frames: Option<u64>,
    pub cancelled: bool,
    pub pack_digest: [u8; 32],
}

/// Runs the full anonymization pipeline to completion (or to cancellation).
///
/// The caller supplies already-open `decoder`/`encoder`/`pack_writer`
/// (acquisition and release happens around this call) and a worker
/// configuration that owns the job's keys, style, and detector. This
/// function always finalizes `pack_writer`, even on cancellation, so the
/// data pack on disk is always HMAC-valid for whatever frames it holds.
/// The caller decides, based on `PipelineOutcome::cancelled`, whether to
/// publish the resulting files or leave them as partial artifacts; this
/// function never renames anything to a final path itself.
pub fn run<D, E>(
    mut decoder: D,
    mut encoder: E,
    mut pack_writer: DataPackWriter,
    worker_cfg: WorkerConfig,
    hmac_key: Key,
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<JsonProgressSink>>,
) -> Result<PipelineOutcome, RvaError>
where
    D: Decoder + 'static,
    E: Encoder + 'static,
{
    let fps = decoder.fps();
    let width = decoder.width();
    let height = decoder.height();
    let total_frames = decoder.frame_count_hint();

    if let Some(sink) = &progress {
        sink.emit(&ProgressEvent::Metadata {
            fps,
            width,
            height,
            total_frames,
        });
    }

    let (frame_tx, frame_rx) = sync_channel::<Option<Frame>>(CHANNEL_CAPACITY);
    let (processed_tx, processed_rx) =
        sync_channel::<Option<(Frame, Vec<Region>)>>(CHANNEL_CAPACITY);

    let errors: Arc<Mutex<Option<RvaError>>> = Arc::new(Mutex::new(None));

    let decoder_cancel = cancel.clone();
    let decoder_errors = errors.clone();
    let decoder_thread = thread::spawn(move || {
        loop {
            if decoder_cancel.load(Ordering::SeqCst) {
                break;
            }
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    if frame_tx.send(Some(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    record_error(&decoder_errors, e);
                    break;
                }
            }
        }
        let _ = frame_tx.send(None);
    });

    let worker_cancel = cancel.clone();
    let worker_errors = errors.clone();
    let worker_progress = progress.clone();
    let worker_thread = thread::spawn(move || {
        let mut worker = Worker::new(worker_cfg);
        loop {
            if worker_cancel.load(Ordering::SeqCst) {
                break;
            }
            match frame_rx.recv() {
                Ok(Some(frame)) => {
                    match worker.process_frame(frame, worker_progress.as_deref()) {
                        Ok(outcome) => {
                            if processed_tx.send(Some(outcome)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            record_error(&worker_errors, e);
                            break;
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
            if worker_cancel.load(Ordering::SeqCst) {
                break;
            }
        }
        let _ = processed_tx.send(None);
    });

    // The consumer runs on this thread: it is the sole mutator of the
    // encoder and the pack writer.
    let mut frames_processed: u64 = 0;
    loop {
        match processed_rx.recv() {
            Ok(Some((frame, regions))) => {
                let frame_index = frame.frame_index;
                encoder.write(&frame)?;
                if !regions.is_empty() {
                    pack_writer.write_frame_data(frame_index, &regions)?;
                }
                frames_processed += 1;
                if let Some(sink) = &progress {
                    sink.emit(&ProgressEvent::Progress {
                        frame_index,
                        processed: frames_processed,
                        total_frames,
                    });
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    decoder_thread
        .join()
        .map_err(|_| RvaError::InternalError("decoder thread panicked".into()))?;
    worker_thread
        .join()
        .map_err(|_| RvaError::InternalError("worker thread panicked".into()))?;

    if let Some(err) = errors.lock().unwrap().take() {
        return Err(err);
    }

    if let Some(sink) = &progress {
        sink.emit(&ProgressEvent::Finalizing);
    }
    let pack_digest = pack_writer.finalize(&hmac_key)?;
    if let Some(sink) = &progress {
        sink.emit(&ProgressEvent::Finalized);
    }

    Ok(PipelineOutcome {
        frames_processed,
        total_frames,
        cancelled: cancel.load(Ordering::SeqCst),
        pack_digest,
    })
}

fn record_error(slot: &Mutex<Option<RvaError>>, err: RvaError) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
}

/// A fully-resolved anonymization job: everything [`run_anonymize_job`] needs
/// to open its own decoder/encoder/pack-writer and run the pipeline to
/// completion. Shared by the `anonymize` CLI binary and the supervisor IPC
/// daemon so both front ends assemble a job the same way before handing it
/// to the same pipeline entry point.
pub struct AnonymizeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub data_pack: PathBuf,
    pub aes_key: Key,
    pub hmac_key: Key,
    pub style: ObfuscationStyle,
    pub classes: Vec<String>,
    pub manual_rois: Vec<(u32, u32, u32, u32)>,
    pub disable_detector: bool,
    pub detector: Option<Arc<Mutex<dyn Detector>>>,
    pub embed_pack: bool,
    pub embedded_output: Option<PathBuf>,
}

/// Opens `request.input`/`request.output`/`request.data_pack` with the
/// given capability types, runs the pipeline, and, if requested, embeds
/// the finished pack into the output MP4 as a `uuid` box (C3).
pub fn run_anonymize_job<D, E>(
    request: AnonymizeRequest,
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<JsonProgressSink>>,
) -> Result<PipelineOutcome, RvaError>
where
    D: Decoder + 'static,
    E: Encoder + 'static,
{
    let decoder = D::open(&request.input)?;
    let fps = decoder.fps();
    let width = decoder.width();
    let height = decoder.height();

    let encoder = E::open(&request.output, fps, width, height)?;
    let pack_writer = DataPackWriter::create(&request.data_pack, &PackHeader { fps, width, height })?;

    let worker_cfg = WorkerConfig {
        aes_key: request.aes_key,
        style: request.style,
        sensitive_classes: request.classes,
        detector_enabled: !request.disable_detector,
        detector: request.detector,
        manual_seed_bboxes: request.manual_rois,
    };

    let outcome = run(
        decoder,
        encoder,
        pack_writer,
        worker_cfg,
        request.hmac_key,
        cancel,
        progress.clone(),
    )?;

    if request.embed_pack && !outcome.cancelled {
        let out_path: Option<&Path> = request.embedded_output.as_deref();
        mp4::embed(&request.output, &request.data_pack, out_path)?;
        if let Some(sink) = &progress {
            let resolved = out_path.unwrap_or(&request.output);
            sink.emit(&ProgressEvent::EmbeddedOutputResolved {
                path: resolved.display().to_string(),
            });
        }
    }

    Ok(outcome)
}
