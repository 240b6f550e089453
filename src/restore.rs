//! Restore engine (C7): the inverse of C5+C6, decrypts and pastes stored
//! regions back into a decoded anonymized video, producing a bit-exact
//! reconstruction inside every stored bbox.
//!
//! Grounded on `original_source/scripts/restore_video.py`: verify the pack's
//! HMAC before opening anything for write (fail fast on a bad key or a
//! tampered pack), then decode/decrypt/paste/encode frame by frame.

use std::collections::HashMap;
use std::path::Path;

use crate::crypto::{self, Key};
use crate::pack::{DataPackReader, Region};
use crate::progress::{JsonProgressSink, ProgressEvent};
use crate::video::{Decoder, Encoder};
use crate::RvaError;

pub struct RestoreOutcome {
    pub frames_written: u64,
}

/// Restores `anonymized_video` using the region metadata in `data_pack`,
/// writing the reconstructed video to `output_path`.
///
/// Fails with [`RvaError::AuthFailed`] before opening the video or creating
/// any output file if `hmac_key` does not authenticate the pack.
pub fn run<D, E>(
    anonymized_video: &Path,
    data_pack: &Path,
    aes_key: &Key,
    hmac_key: &Key,
    output_path: &Path,
    progress: Option<&JsonProgressSink>,
) -> Result<RestoreOutcome, RvaError>
where
    D: Decoder,
    E: Encoder,
{
    let reader = DataPackReader::open(data_pack)?;
    if !reader.verify(hmac_key)? {
        return Err(RvaError::AuthFailed);
    }

    let mut frame_map: HashMap<u32, Vec<Region>> = HashMap::new();
    for entry in reader.iter_frames()? {
        let (frame_index, regions) = entry?;
        frame_map.insert(frame_index, regions);
    }

    let mut decoder = D::open(anonymized_video)?;
    let pack_header = reader.header();

    let video_width = decoder.width();
    let video_height = decoder.height();
    let video_fps = decoder.fps();

    let (width, height) = if video_width == 0 || video_height == 0 {
        (pack_header.width, pack_header.height)
    } else {
        if video_width != pack_header.width || video_height != pack_header.height {
            log::warn!(
                "anonymized video reports {}x{}, data pack header says {}x{}; using the video's dimensions",
                video_width,
                video_height,
                pack_header.width,
                pack_header.height
            );
        }
        (video_width, video_height)
    };
    let fps = if video_fps > 0.0 { video_fps } else { pack_header.fps };

    let mut encoder = E::open(output_path, fps, width, height)?;

    let mut frames_written: u64 = 0;
    while let Some(mut frame) = decoder.next_frame()? {
        if let Some(regions) = frame_map.get(&frame.frame_index) {
            for region in regions {
                let bbox = clamp_bbox((region.x1, region.y1, region.x2, region.y2), width, height);
                if is_degenerate(bbox) {
                    continue;
                }
                let (x1, y1, x2, y2) = bbox;
                let expected_len = ((x2 - x1) as usize) * ((y2 - y1) as usize) * 3;
                let plaintext = crypto::open(&region.cipher, aes_key, expected_len)?;
                paste_roi(&mut frame.pixels, frame.width, bbox, &plaintext);
            }
        }

        encoder.write(&frame)?;
        frames_written += 1;
        if let Some(sink) = progress {
            sink.emit(&ProgressEvent::Progress {
                frame_index: frame.frame_index,
                processed: frames_written,
                total_frames: decoder.frame_count_hint(),
            });
        }
    }

    Ok(RestoreOutcome { frames_written })
}

fn paste_roi(pixels: &mut [u8], frame_width: u32, bbox: (u32, u32, u32, u32), roi: &[u8]) {
    let (x1, y1, x2, y2) = bbox;
    let row_bytes = ((x2 - x1) as usize) * 3;
    for (row_offset, y) in (y1..y2).enumerate() {
        let dst_start = (y as usize * frame_width as usize + x1 as usize) * 3;
        let src_start = row_offset * row_bytes;
        pixels[dst_start..dst_start + row_bytes]
            .copy_from_slice(&roi[src_start..src_start + row_bytes]);
    }
}

fn clamp_bbox(bbox: (u32, u32, u32, u32), width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (x1, y1, x2, y2) = bbox;
    (x1.min(width), y1.min(height), x2.min(width), y2.min(height))
}

fn is_degenerate(bbox: (u32, u32, u32, u32)) -> bool {
    let (x1, y1, x2, y2) = bbox;
    x2 <= x1 || y2 <= y1
}
