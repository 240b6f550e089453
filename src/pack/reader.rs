//! Streaming reader for the data pack (C2 reader contract).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::{self, Key};
use crate::error::RvaError;

use super::format::{self, Cursor, PackHeader, Region, END_MARKER_FRAME_INDEX, TRAILER_LEN};

const READ_CHUNK: usize = 64 * 1024;

type HmacSha256 = Hmac<Sha256>;

/// Opens a data pack for verification and lazy frame iteration.
pub struct DataPackReader {
    path: PathBuf,
    header: PackHeader,
    body_start: u64,
    signed_len: u64,
    file_len: u64,
}

impl DataPackReader {
    /// Opens `path` and parses its header. Does not verify the HMAC trailer;
    /// call [`verify`](Self::verify) for that.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RvaError> {
        let path = path.as_ref().to_path_buf();
        let file_len = std::fs::metadata(&path)
            .map_err(|e| RvaError::InternalError(format!("failed to stat pack file: {e}")))?
            .len();

        let min_len = (format::HEADER_LEN + 8 + TRAILER_LEN) as u64;
        if file_len < min_len {
            return Err(RvaError::PackTruncated);
        }

        let mut file = File::open(&path)
            .map_err(|e| RvaError::InternalError(format!("failed to open pack file: {e}")))?;
        let mut header_buf = vec![0u8; format::HEADER_LEN];
        file.read_exact(&mut header_buf)
            .map_err(|_| RvaError::PackTruncated)?;
        let header = PackHeader::decode(&mut Cursor::new(&header_buf))?;

        Ok(Self {
            path,
            header,
            body_start: format::HEADER_LEN as u64,
            signed_len: file_len - TRAILER_LEN as u64,
            file_len,
        })
    }

    pub fn header(&self) -> &PackHeader {
        &self.header
    }

    /// Streams the signed prefix of the pack, recomputes its HMAC, and
    /// compares it in constant time against the stored trailer.
    ///
    /// Returns `Ok(false)` on any mismatch rather than an error: a bad key
    /// or a tampered pack is an expected outcome of this call, not a fault.
    /// Only I/O failures surface as `Err`.
    pub fn verify(&self, hmac_key: &Key) -> Result<bool, RvaError> {
        let mut mac = HmacSha256::new_from_slice(hmac_key.as_bytes())
            .expect("HMAC accepts keys of any length");

        let file = File::open(&self.path)
            .map_err(|e| RvaError::InternalError(format!("failed to reopen pack file: {e}")))?;
        let mut reader = BufReader::new(file);
        let mut remaining = self.signed_len;
        let mut chunk = vec![0u8; READ_CHUNK];

        while remaining > 0 {
            let want = remaining.min(READ_CHUNK as u64) as usize;
            reader
                .read_exact(&mut chunk[..want])
                .map_err(|_| RvaError::PackTruncated)?;
            mac.update(&chunk[..want]);
            remaining -= want as u64;
        }

        let mut trailer = [0u8; TRAILER_LEN];
        reader
            .read_exact(&mut trailer)
            .map_err(|_| RvaError::PackTruncated)?;

        let computed: [u8; 32] = mac.finalize().into_bytes().into();
        Ok(crypto::constant_time_eq(&computed, &trailer))
    }

    /// Returns a fresh, lazy, restartable iterator over `(frame_index,
    /// regions)` pairs. Each call re-reads from the start of the body, so
    /// callers never need to buffer the whole pack in memory.
    pub fn iter_frames(&self) -> Result<FrameIter, RvaError> {
        let file = File::open(&self.path)
            .map_err(|e| RvaError::InternalError(format!("failed to reopen pack file: {e}")))?;
        let mut reader = BufReader::new(file);
        reader
            .seek_relative(self.body_start as i64)
            .map_err(|e| RvaError::InternalError(format!("failed to seek pack file: {e}")))?;

        Ok(FrameIter {
            reader,
            done: false,
            bytes_remaining: self.file_len - self.body_start - TRAILER_LEN as u64,
        })
    }
}

/// Lazy iterator over `FrameEntry` records up to the end marker.
pub struct FrameIter {
    reader: BufReader<File>,
    done: bool,
    bytes_remaining: u64,
}

impl Iterator for FrameIter {
    type Item = Result<(u32, Vec<Region>), RvaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let frame_index = match read_u32(&mut self.reader, &mut self.bytes_remaining) {
            Ok(v) => v,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let region_count = match read_u32(&mut self.reader, &mut self.bytes_remaining) {
            Ok(v) => v,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if frame_index == END_MARKER_FRAME_INDEX && region_count == 0 {
            self.done = true;
            return None;
        }

        let mut regions = Vec::with_capacity(region_count as usize);
        for _ in 0..region_count {
            match read_region(&mut self.reader, &mut self.bytes_remaining) {
                Ok(region) => regions.push(region),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        Some(Ok((frame_index, regions)))
    }
}

fn read_u32(reader: &mut BufReader<File>, remaining: &mut u64) -> Result<u32, RvaError> {
    if *remaining < 4 {
        return Err(RvaError::PackTruncated);
    }
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(|_| RvaError::PackTruncated)?;
    *remaining -= 4;
    Ok(u32::from_be_bytes(buf))
}

fn take(reader: &mut BufReader<File>, remaining: &mut u64, len: u64) -> Result<Vec<u8>, RvaError> {
    if *remaining < len {
        return Err(RvaError::PackTruncated);
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(|_| RvaError::PackTruncated)?;
    *remaining -= len;
    Ok(buf)
}

/// Like [`take`], but `len` comes from a length prefix the caller just read
/// off the wire (`label_len`, `cipher_len`) rather than a fixed-width field.
/// A declared length that overruns what's left of the signed body is a
/// malformed framing, not mere truncation: a `cipher_len` exceeding the
/// remaining bytes means the frame itself is corrupt, not just cut short.
fn take_declared(
    reader: &mut BufReader<File>,
    remaining: &mut u64,
    len: u64,
    what: &str,
) -> Result<Vec<u8>, RvaError> {
    if *remaining < len {
        return Err(RvaError::PackMalformed(format!(
            "declared {what} length {len} exceeds remaining pack bytes ({remaining})"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(|_| RvaError::PackTruncated)?;
    *remaining -= len;
    Ok(buf)
}

fn read_region(reader: &mut BufReader<File>, remaining: &mut u64) -> Result<Region, RvaError> {
    let label_len = u16::from_be_bytes(take(reader, remaining, 2)?.try_into().unwrap()) as u64;
    let label_bytes = take_declared(reader, remaining, label_len, "label")?;
    let label = String::from_utf8(label_bytes)
        .map_err(|_| RvaError::PackMalformed("region label is not valid utf-8".into()))?;

    let confidence = f32::from_be_bytes(take(reader, remaining, 4)?.try_into().unwrap());
    let x1 = u32::from_be_bytes(take(reader, remaining, 4)?.try_into().unwrap());
    let y1 = u32::from_be_bytes(take(reader, remaining, 4)?.try_into().unwrap());
    let x2 = u32::from_be_bytes(take(reader, remaining, 4)?.try_into().unwrap());
    let y2 = u32::from_be_bytes(take(reader, remaining, 4)?.try_into().unwrap());
    let source_byte = take(reader, remaining, 1)?[0];
    let source = match source_byte {
        0 => format::RegionSource::Detection,
        1 => format::RegionSource::Manual,
        other => {
            return Err(RvaError::PackMalformed(format!(
                "unknown region source byte {other}"
            )))
        }
    };
    let cipher_len = u32::from_be_bytes(take(reader, remaining, 4)?.try_into().unwrap()) as u64;
    let cipher = take_declared(reader, remaining, cipher_len, "cipher")?;

    Ok(Region {
        label,
        confidence,
        x1,
        y1,
        x2,
        y2,
        source,
        cipher,
    })
}
