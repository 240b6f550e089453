//! Machine-readable progress events (C14, JSON half).
//!
//! `ProgressEvent` enumerates every job lifecycle and status event the CLI
//! and supervisor front ends emit; `JsonProgressSink` serializes one as a
//! single `{jobId, event, ...}` line, under a `Mutex<Stdout>` so two stages
//! can never interleave a partial line, the same guarantee
//! `anonymize_service.py`'s `_stdout_lock` gives the original supervisor.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::json;

/// One lifecycle or status event emitted during an anonymize or restore job.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    Started,
    EmbeddedOutputResolved { path: String },
    Metadata { fps: f64, width: u32, height: u32, total_frames: Option<u64> },
    Detection { frame_index: u32, label: String, confidence: f32, bbox: (u32, u32, u32, u32) },
    ManualRoi { frame_index: u32, label: String, bbox: (u32, u32, u32, u32) },
    Progress { frame_index: u32, processed: u64, total_frames: Option<u64> },
    Log { message: String },
    Finalizing,
    Finalized,
    Completed { digest_hex: Option<String>, aes_key_hex: Option<String>, hmac_key_hex: Option<String>, embedded_output: Option<String> },
    Cancelled,
    Error { message: String },
    Exit { code: i32 },
}

impl ProgressEvent {
    fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Started => "started",
            ProgressEvent::EmbeddedOutputResolved { .. } => "embedded_output_resolved",
            ProgressEvent::Metadata { .. } => "metadata",
            ProgressEvent::Detection { .. } => "detection",
            ProgressEvent::ManualRoi { .. } => "manual_roi",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Log { .. } => "log",
            ProgressEvent::Finalizing => "finalizing",
            ProgressEvent::Finalized => "finalized",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Cancelled => "cancelled",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Exit { .. } => "exit",
        }
    }

    /// Builds the event-specific fields merged alongside `jobId`/`event`.
    fn fields(&self) -> serde_json::Value {
        match self {
            ProgressEvent::Started | ProgressEvent::Finalizing | ProgressEvent::Finalized | ProgressEvent::Cancelled => {
                json!({})
            }
            ProgressEvent::EmbeddedOutputResolved { path } => json!({ "path": path }),
            ProgressEvent::Metadata { fps, width, height, total_frames } => json!({
                "fps": fps,
                "width": width,
                "height": height,
                "totalFrames": total_frames,
            }),
            ProgressEvent::Detection { frame_index, label, confidence, bbox } => json!({
                "frameIndex": frame_index,
                "label": label,
                "confidence": confidence,
                "bbox": [bbox.0, bbox.1, bbox.2, bbox.3],
            }),
            ProgressEvent::ManualRoi { frame_index, label, bbox } => json!({
                "frameIndex": frame_index,
                "label": label,
                "bbox": [bbox.0, bbox.1, bbox.2, bbox.3],
            }),
            ProgressEvent::Progress { frame_index, processed, total_frames } => json!({
                "frameIndex": frame_index,
                "processed": processed,
                "totalFrames": total_frames,
            }),
            ProgressEvent::Log { message } => json!({ "message": message }),
            ProgressEvent::Completed { digest_hex, aes_key_hex, hmac_key_hex, embedded_output } => json!({
                "digest": digest_hex,
                "aesKey": aes_key_hex,
                "hmacKey": hmac_key_hex,
                "embeddedOutput": embedded_output,
            }),
            ProgressEvent::Error { message } => json!({ "message": message }),
            ProgressEvent::Exit { code } => json!({ "code": code }),
        }
    }
}

/// A line-serialized event sink shared across the three pipeline stages and
/// (in the supervisor) across concurrently-emitting callback sites.
pub struct JsonProgressSink {
    job_id: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonProgressSink {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            out: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    #[cfg(test)]
    fn with_writer(job_id: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            job_id: job_id.into(),
            out: Mutex::new(writer),
        }
    }

    /// Serializes `event` as one JSON line and writes it under the shared
    /// lock. A write failure is swallowed (mirrors `_emit`'s best-effort
    /// stdout write; there is no reasonable recovery if stdout itself is
    /// broken).
    pub fn emit(&self, event: &ProgressEvent) {
        #[derive(Serialize)]
        struct Envelope<'a> {
            #[serde(rename = "jobId")]
            job_id: &'a str,
            event: &'a str,
            #[serde(flatten)]
            fields: serde_json::Value,
        }

        let envelope = Envelope {
            job_id: &self.job_id,
            event: event.name(),
            fields: event.fields(),
        };

        if let Ok(mut line) = serde_json::to_vec(&envelope) {
            line.push(b'\n');
            if let Ok(mut out) = self.out.lock() {
                let _ = out.write_all(&line);
                let _ = out.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emits_one_json_line_per_event() {
        let buf = SharedBuf::default();
        let sink = JsonProgressSink::with_writer("job-1", Box::new(buf.clone()));
        sink.emit(&ProgressEvent::Started);
        sink.emit(&ProgressEvent::Progress {
            frame_index: 3,
            processed: 4,
            total_frames: Some(10),
        });

        let contents = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let started: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(started["jobId"], "job-1");
        assert_eq!(started["event"], "started");

        let progress: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(progress["event"], "progress");
        assert_eq!(progress["frameIndex"], 3);
        assert_eq!(progress["totalFrames"], 10);
    }

    #[test]
    fn completed_event_carries_optional_key_material() {
        let buf = SharedBuf::default();
        let sink = JsonProgressSink::with_writer("job-2", Box::new(buf.clone()));
        sink.emit(&ProgressEvent::Completed {
            digest_hex: Some("ab".repeat(32)),
            aes_key_hex: None,
            hmac_key_hex: None,
            embedded_output: Some("out.mp4".into()),
        });
        let contents = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(value["digest"], "ab".repeat(32));
        assert_eq!(value["aesKey"], serde_json::Value::Null);
        assert_eq!(value["embeddedOutput"], "out.mp4");
    }
}
