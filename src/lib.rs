//! Reversible video anonymization.
//!
//! Given a source video and a set of regions to protect (manually specified,
//! detector-found, or both), this crate produces two artifacts:
//!
//! - an anonymized video where every protected region has been passed
//!   through an irreversible obfuscation kernel (blur, mosaic, pixelate)
//! - an authenticated "data pack" recording, for every frame and region,
//!   an AES-GCM-sealed copy of the original pixels, so the exact original
//!   can be restored by anyone holding the encryption key and the HMAC key
//!
//! The data pack can either sit beside the output video or be embedded
//! directly inside it as an MP4 `uuid` box, so a single file carries both
//! the shareable anonymized video and the means to restore it.
//!
//! # Module structure
//!
//! - [`crypto`]: AES-GCM region sealing, HMAC-SHA256, key handling
//! - [`pack`]: the data pack binary format (reader/writer)
//! - [`mp4`]: embedding/extracting a data pack as an MP4 `uuid` box
//! - [`obfuscate`]: blur/mosaic/pixelate kernels
//! - [`track`]: manual-region tracking across frames
//! - [`detect`]: pluggable object detector backends
//! - [`video`]: video decode/encode
//! - [`pipeline`]: the producer/worker/consumer anonymization pipeline
//! - [`restore`]: rebuilding the original video from a data pack
//! - [`config`]: layered configuration for the CLI and supervisor front ends
//! - [`supervisor`]: the line-delimited-JSON job-control daemon
//! - [`progress`]: machine-readable progress events
//! - [`ui`]: human-readable progress output
//! - [`error`]: the crate's error taxonomy

pub mod config;
pub mod crypto;
pub mod detect;
pub mod error;
pub mod mp4;
pub mod obfuscate;
pub mod pack;
pub mod pipeline;
pub mod progress;
pub mod restore;
pub mod supervisor;
pub mod track;
pub mod ui;
pub mod video;

pub use error::RvaError;

/// One decoded video frame: packed BGR24 pixels, row-major, no padding.
#[derive(Clone, Debug)]
pub struct Frame {
    pub frame_index: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(frame_index: u32, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 3);
        Self {
            frame_index,
            width,
            height,
            pixels,
        }
    }
}
