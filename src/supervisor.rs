//! Supervisor IPC daemon (C13): a long-lived process that accepts one
//! anonymization job at a time over a line-delimited JSON protocol on
//! stdin/stdout.
//!
//! Grounded on `original_source/scripts/anonymize_service.py` (one job at a
//! time, a `cancel_event`-equivalent `Arc<AtomicBool>`, JSON-line stdout
//! under a shared lock) and `bin/witness_api.rs`/`api/mod.rs`'s
//! shutdown-flag-plus-`JoinHandle` shape for bridging a blocking loop to job
//! state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Deserialize;

use crate::config::AnonymizeConfig;
use crate::crypto::Key;
use crate::detect::{DetectorRegistry, StubDetector};
use crate::obfuscate::ObfuscationStyle;
use crate::pipeline::{run_anonymize_job, AnonymizeRequest, PipelineOutcome};
use crate::progress::{JsonProgressSink, ProgressEvent};
use crate::video::{FfmpegDecoder, FfmpegEncoder};
use crate::RvaError;

/// One incoming command line in the `{type, jobId, payload}` line-delimited
/// JSON protocol.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    Start {
        #[serde(rename = "jobId")]
        job_id: String,
        payload: JobPayload,
    },
    Cancel {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Shutdown,
}

/// Mirrors the anonymize CLI's options, as sent in a `start` command's
/// `payload`.
#[derive(Debug, Deserialize)]
pub struct JobPayload {
    pub input: String,
    pub output: Option<String>,
    #[serde(rename = "dataPack")]
    pub data_pack: Option<String>,
    pub key: Option<String>,
    #[serde(rename = "hmacKey")]
    pub hmac_key: Option<String>,
    pub classes: Option<Vec<String>>,
    #[serde(rename = "manualRoi")]
    pub manual_roi: Option<Vec<[u32; 4]>>,
    pub style: Option<String>,
    #[serde(rename = "disableDetector")]
    pub disable_detector: Option<bool>,
    #[serde(rename = "embedPack")]
    pub embed_pack: Option<bool>,
    #[serde(rename = "embeddedOutput")]
    pub embedded_output: Option<String>,
    /// Reserved: the pipeline always runs exactly one worker today. A value
    /// other than 1 only logs a warning (a known flag/behavior mismatch),
    /// mirrored here from the `anonymize` CLI's `--workers`.
    #[serde(rename = "workerCount")]
    pub worker_count: Option<usize>,
}

struct ActiveJob {
    job_id: String,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns at most one running job; a second `start` while one is active is
/// rejected the same way `anonymize_service.py`'s `start_job` rejects it.
pub struct Supervisor {
    config: AnonymizeConfig,
    active: Mutex<Option<ActiveJob>>,
}

impl Supervisor {
    pub fn new(config: AnonymizeConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Dispatches one command. Returns `true` if the caller should stop
    /// reading further commands (a `shutdown` was processed).
    pub fn handle(&self, command: Command) -> bool {
        self.reap_finished();
        match command {
            Command::Start { job_id, payload } => {
                self.start_job(job_id, payload);
                false
            }
            Command::Cancel { job_id } => {
                self.cancel_job(&job_id);
                false
            }
            Command::Shutdown => {
                self.shutdown();
                true
            }
        }
    }

    fn start_job(&self, job_id: String, payload: JobPayload) {
        let mut guard = self.active.lock().expect("supervisor lock poisoned");
        if guard.is_some() {
            let sink = JsonProgressSink::new(job_id.clone());
            sink.emit(&ProgressEvent::Error {
                message: "Another anonymization job is still running".into(),
            });
            sink.emit(&ProgressEvent::Exit { code: 1 });
            return;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(JsonProgressSink::new(job_id.clone()));
        let defaults = self.config.clone();
        let cancel_for_thread = cancel.clone();
        let sink_for_thread = sink.clone();
        let job_id_for_thread = job_id.clone();

        let handle = std::thread::spawn(move || {
            run_job(job_id_for_thread, payload, defaults, cancel_for_thread, sink_for_thread);
        });

        *guard = Some(ActiveJob { job_id, cancel, handle });
    }

    fn cancel_job(&self, job_id: &str) {
        let guard = self.active.lock().expect("supervisor lock poisoned");
        match guard.as_ref() {
            Some(active) if active.job_id == job_id => {
                active.cancel.store(true, Ordering::SeqCst);
            }
            _ => {
                let sink = JsonProgressSink::new(job_id.to_string());
                sink.emit(&ProgressEvent::Error {
                    message: format!("no active job '{job_id}'"),
                });
                sink.emit(&ProgressEvent::Exit { code: 1 });
            }
        }
    }

    /// Cancels and joins any active job; called on `shutdown` and at
    /// process exit.
    pub fn shutdown(&self) {
        let mut guard = self.active.lock().expect("supervisor lock poisoned");
        if let Some(active) = guard.take() {
            active.cancel.store(true, Ordering::SeqCst);
            let _ = active.handle.join();
        }
    }

    /// Drops a finished job's handle so a subsequent `start` is accepted
    /// without the caller having to issue an explicit `cancel` first.
    fn reap_finished(&self) {
        let mut guard = self.active.lock().expect("supervisor lock poisoned");
        let finished = matches!(guard.as_ref(), Some(active) if active.handle.is_finished());
        if finished {
            if let Some(active) = guard.take() {
                let _ = active.handle.join();
            }
        }
    }
}

fn run_job(
    job_id: String,
    payload: JobPayload,
    defaults: AnonymizeConfig,
    cancel: Arc<AtomicBool>,
    sink: Arc<JsonProgressSink>,
) {
    sink.emit(&ProgressEvent::Started);

    let built = build_request(payload, &defaults);
    let generated_keys = built.as_ref().ok().map(|(_, keys)| keys.clone()).unwrap_or_default();
    let outcome = built.and_then(|(request, _)| {
        run_anonymize_job::<FfmpegDecoder, FfmpegEncoder>(request, cancel, Some(sink.clone()))
    });

    match outcome {
        Ok(outcome) if outcome.cancelled => {
            sink.emit(&ProgressEvent::Cancelled);
            sink.emit(&ProgressEvent::Exit { code: 0 });
        }
        Ok(outcome) => {
            emit_completed(&sink, &outcome, generated_keys);
            sink.emit(&ProgressEvent::Exit { code: 0 });
        }
        Err(e) if e.is_cancelled() => {
            sink.emit(&ProgressEvent::Cancelled);
            sink.emit(&ProgressEvent::Exit { code: 0 });
        }
        Err(e) => {
            sink.emit(&ProgressEvent::Error { message: e.to_string() });
            sink.emit(&ProgressEvent::Exit { code: 1 });
        }
    }

    let _ = job_id; // retained on the struct for future job-table logging
}

fn emit_completed(sink: &JsonProgressSink, outcome: &PipelineOutcome, generated_keys: GeneratedKeys) {
    sink.emit(&ProgressEvent::Completed {
        digest_hex: Some(hex::encode(outcome.pack_digest)),
        aes_key_hex: generated_keys.aes_key_hex,
        hmac_key_hex: generated_keys.hmac_key_hex,
        embedded_output: None,
    });
}

/// Hex of any key `build_request` generated rather than received explicitly,
/// so `emit_completed` can surface it: a generated key that is never echoed
/// back to the IPC caller leaves the resulting pack unrestorable.
#[derive(Clone, Default)]
struct GeneratedKeys {
    aes_key_hex: Option<String>,
    hmac_key_hex: Option<String>,
}

fn build_request(
    payload: JobPayload,
    defaults: &AnonymizeConfig,
) -> Result<(AnonymizeRequest, GeneratedKeys), RvaError> {
    let workers = payload.worker_count.unwrap_or(defaults.workers);
    if workers == 0 {
        return Err(RvaError::InvalidInput("workerCount must be at least 1".into()));
    }
    if workers != 1 {
        log::warn!(
            "workerCount {workers} requested, but this pipeline always runs exactly one worker \
             (known flag/behavior mismatch); proceeding with one worker"
        );
    }

    let input = PathBuf::from(payload.input);
    let output = payload
        .output
        .map(PathBuf::from)
        .unwrap_or_else(|| input.with_file_name("anonymized.mp4"));
    let data_pack = payload
        .data_pack
        .map(PathBuf::from)
        .unwrap_or_else(|| output.with_extension("rvapack"));

    let aes_key_was_generated = payload.key.is_none();
    let aes_key = match payload.key {
        Some(hex_key) => Key::from_hex(&hex_key)?,
        None => Key::random(32)?,
    };
    let hmac_key_was_generated = payload.hmac_key.is_none();
    let hmac_key = match payload.hmac_key {
        Some(hex_key) => Key::from_hex(&hex_key)?,
        None => aes_key.clone(),
    };
    let generated_keys = GeneratedKeys {
        aes_key_hex: aes_key_was_generated.then(|| aes_key.to_hex()),
        hmac_key_hex: hmac_key_was_generated.then(|| hmac_key.to_hex()),
    };

    let style = match payload.style {
        Some(s) => ObfuscationStyle::parse(&s)?,
        None => defaults.style,
    };
    let classes = payload.classes.unwrap_or_else(|| defaults.classes.clone());
    let disable_detector = payload.disable_detector.unwrap_or(defaults.disable_detector);
    let manual_rois = payload
        .manual_roi
        .unwrap_or_default()
        .into_iter()
        .map(|b| (b[0], b[1], b[2], b[3]))
        .collect();

    let detector = if disable_detector {
        None
    } else {
        let mut registry = DetectorRegistry::new();
        registry.register(StubDetector::new());
        registry.default_backend()
    };

    let request = AnonymizeRequest {
        input,
        output,
        data_pack,
        aes_key,
        hmac_key,
        style,
        classes,
        manual_rois,
        disable_detector,
        detector,
        embed_pack: payload.embed_pack.unwrap_or(defaults.embed_pack),
        embedded_output: payload.embedded_output.map(PathBuf::from),
    };

    Ok((request, generated_keys))
}
