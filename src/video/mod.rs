//! Video I/O capability (C8): `Decoder`/`Encoder` capability traits with an
//! `ffmpeg-next`-backed default implementation, generalizing the
//! `ingest::file_ffmpeg` decode loop from "ingest a file into
//! privacy-preserving events" to "decode/encode a lossless-ordered BGR24
//! frame sequence".

mod ffmpeg;

pub use self::ffmpeg::{FfmpegDecoder, FfmpegEncoder};

use crate::error::RvaError;
use crate::Frame;

/// Decodes a video container into a BGR24 [`Frame`] sequence in the
/// container's native order (invariant I1 depends on this ordering being
/// preserved downstream).
pub trait Decoder: Send {
    fn open(path: &std::path::Path) -> Result<Self, RvaError>
    where
        Self: Sized;

    /// Returns the next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, RvaError>;

    fn fps(&self) -> f64;
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Best-effort total frame count from container metadata, for progress
    /// reporting; `None` when the container doesn't expose it.
    fn frame_count_hint(&self) -> Option<u64>;
}

/// Encodes a BGR24 [`Frame`] sequence into a video container. Dropping an
/// encoder releases the underlying file on every exit path, including
/// error and cancellation.
pub trait Encoder: Send {
    fn open(path: &std::path::Path, fps: f64, width: u32, height: u32) -> Result<Self, RvaError>
    where
        Self: Sized;

    fn write(&mut self, frame: &Frame) -> Result<(), RvaError>;
}
