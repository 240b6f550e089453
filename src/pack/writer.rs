//! Streaming writer for the data pack (C2 writer contract).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::Key;
use crate::error::RvaError;

use super::format::{self, PackHeader, Region};

const READBACK_CHUNK: usize = 64 * 1024;

type HmacSha256 = Hmac<Sha256>;

/// Writes FrameEntry records to a data pack file in strictly increasing
/// `frame_index` order, then seals it with an HMAC trailer on finalize.
pub struct DataPackWriter {
    path: PathBuf,
    file: BufWriter<File>,
    last_frame_index: Option<u32>,
    finalized: bool,
}

impl DataPackWriter {
    /// Creates a new pack file at `path` and writes its header.
    pub fn create(path: impl AsRef<Path>, header: &PackHeader) -> Result<Self, RvaError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| RvaError::InternalError(format!("failed to create pack file: {e}")))?;
        let mut file = BufWriter::new(file);

        let mut buf = Vec::with_capacity(format::HEADER_LEN);
        header.encode(&mut buf);
        file.write_all(&buf)
            .map_err(|e| RvaError::InternalError(format!("failed to write pack header: {e}")))?;

        Ok(Self {
            path,
            file,
            last_frame_index: None,
            finalized: false,
        })
    }

    /// Writes one `FrameEntry`. `frame_index` must be strictly greater than
    /// the previous call's.
    pub fn write_frame_data(
        &mut self,
        frame_index: u32,
        regions: &[Region],
    ) -> Result<(), RvaError> {
        if self.finalized {
            return Err(RvaError::InternalError(
                "write_frame_data called after finalize".into(),
            ));
        }
        if let Some(last) = self.last_frame_index {
            if frame_index <= last {
                return Err(RvaError::InternalError(format!(
                    "frame_index must be strictly increasing: got {frame_index} after {last}"
                )));
            }
        }

        let mut buf = Vec::new();
        format::encode_frame_entry(frame_index, regions, &mut buf)?;
        self.file
            .write_all(&buf)
            .map_err(|e| RvaError::InternalError(format!("failed to write frame entry: {e}")))?;

        self.last_frame_index = Some(frame_index);
        Ok(())
    }

    /// Writes the end marker and the HMAC trailer over every byte written so
    /// far, then returns the 32-byte digest. Fails if called twice.
    pub fn finalize(mut self, hmac_key: &Key) -> Result<[u8; 32], RvaError> {
        if self.finalized {
            return Err(RvaError::InternalError("pack already finalized".into()));
        }
        self.finalized = true;

        let mut end_marker = Vec::new();
        format::encode_end_marker(&mut end_marker);
        self.file
            .write_all(&end_marker)
            .map_err(|e| RvaError::InternalError(format!("failed to write end marker: {e}")))?;
        self.file
            .flush()
            .map_err(|e| RvaError::InternalError(format!("failed to flush pack file: {e}")))?;

        let digest = hash_file(&self.path, hmac_key)?;

        let mut trailer_file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| RvaError::InternalError(format!("failed to reopen pack file: {e}")))?;
        trailer_file
            .write_all(&digest)
            .map_err(|e| RvaError::InternalError(format!("failed to write pack trailer: {e}")))?;
        trailer_file
            .sync_all()
            .map_err(|e| RvaError::InternalError(format!("failed to sync pack file: {e}")))?;

        Ok(digest)
    }

    pub fn close(self) {
        drop(self);
    }
}

/// Streams the just-written file from disk in fixed-size chunks to compute
/// its HMAC, rather than holding the whole pack body in memory at once.
fn hash_file(path: &Path, hmac_key: &Key) -> Result<[u8; 32], RvaError> {
    let mut mac = HmacSha256::new_from_slice(hmac_key.as_bytes())
        .expect("HMAC accepts keys of any length");

    let file = File::open(path)
        .map_err(|e| RvaError::InternalError(format!("failed to read back pack file: {e}")))?;
    let mut reader = BufReader::new(file);
    let mut chunk = vec![0u8; READBACK_CHUNK];

    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| RvaError::InternalError(format!("failed to read back pack file: {e}")))?;
        if n == 0 {
            break;
        }
        mac.update(&chunk[..n]);
    }

    Ok(mac.finalize().into_bytes().into())
}
