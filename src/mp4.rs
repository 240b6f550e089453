//! MP4 UUID-box packager (C3): embeds the data pack inside an MP4 file as a
//! custom top-level `uuid` box, and extracts it back out.
//!
//! Grounded byte-for-byte on the box layout used by the system this crate
//! replaces: a fixed constant UUID, `size:u32, type:"uuid", uuid:[u8;16],
//! payload` appended at end-of-file, plus a full ISO-BMFF top-level box
//! walker that handles the 64-bit `largesize` and to-EOF size variants.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::RvaError;

/// Fixed UUID identifying the embedded data pack box.
pub const PACK_BOX_UUID: [u8; 16] = [
    0x1f, 0x0c, 0xf7, 0xd5, 0x1c, 0x3c, 0x4e, 0x25, 0xba, 0x9d, 0x5c, 0xb0, 0xfc, 0x61, 0xf8, 0x47,
];

const HEADER_LEN: u64 = 8 + 16; // size(4) + "uuid"(4) + uuid(16)

/// Appends the contents of `pack_path` as a `uuid` box at the end of
/// `video_path`. If `out_path` is given, `video_path` is copied there first
/// and the box is appended to the copy; otherwise `video_path` is mutated
/// in place.
pub fn embed(
    video_path: impl AsRef<Path>,
    pack_path: impl AsRef<Path>,
    out_path: Option<&Path>,
) -> Result<(), RvaError> {
    let video_path = video_path.as_ref();
    let pack_path = pack_path.as_ref();

    let payload_len = fs::metadata(pack_path)
        .map_err(|e| RvaError::InternalError(format!("failed to stat data pack: {e}")))?
        .len();

    let box_size = HEADER_LEN
        .checked_add(payload_len)
        .ok_or_else(|| RvaError::PayloadTooLarge(payload_len))?;
    if box_size >= u32::MAX as u64 {
        return Err(RvaError::PayloadTooLarge(payload_len));
    }

    let target_path = if let Some(out_path) = out_path {
        fs::copy(video_path, out_path)
            .map_err(|e| RvaError::InternalError(format!("failed to copy video: {e}")))?;
        out_path.to_path_buf()
    } else {
        video_path.to_path_buf()
    };

    let mut out = OpenOptions::new()
        .append(true)
        .open(&target_path)
        .map_err(|e| RvaError::InternalError(format!("failed to open {}: {e}", target_path.display())))?;

    out.write_all(&(box_size as u32).to_be_bytes())
        .and_then(|_| out.write_all(b"uuid"))
        .and_then(|_| out.write_all(&PACK_BOX_UUID))
        .map_err(|e| RvaError::InternalError(format!("failed to write uuid box header: {e}")))?;

    let mut pack_file = File::open(pack_path)
        .map_err(|e| RvaError::InternalError(format!("failed to open data pack: {e}")))?;
    std::io::copy(&mut pack_file, &mut out)
        .map_err(|e| RvaError::InternalError(format!("failed to copy data pack into video: {e}")))?;

    Ok(())
}

/// Walks `video_path` as a sequence of top-level ISO-BMFF boxes and returns
/// the payload of the first `uuid` box whose identifier matches
/// [`PACK_BOX_UUID`]. The walker never descends into container boxes.
pub fn extract(video_path: impl AsRef<Path>) -> Result<Vec<u8>, RvaError> {
    let video_path = video_path.as_ref();
    let file = File::open(video_path)
        .map_err(|e| RvaError::InternalError(format!("failed to open {}: {e}", video_path.display())))?;
    let file_len = file
        .metadata()
        .map_err(|e| RvaError::InternalError(format!("failed to stat video: {e}")))?
        .len();
    let mut reader = BufReader::new(file);

    let mut offset: u64 = 0;
    while offset < file_len {
        if file_len - offset < 8 {
            return Err(RvaError::PackMalformed(
                "mp4 box header runs past end of file".into(),
            ));
        }

        let mut header = [0u8; 8];
        reader
            .read_exact(&mut header)
            .map_err(|e| RvaError::InternalError(format!("failed to read box header: {e}")))?;
        let size32 = u32::from_be_bytes(header[0..4].try_into().unwrap());
        let box_type = &header[4..8];

        let (header_size, box_size): (u64, u64) = if size32 == 1 {
            let mut largesize_buf = [0u8; 8];
            reader
                .read_exact(&mut largesize_buf)
                .map_err(|_| RvaError::PackMalformed("truncated largesize field".into()))?;
            (16, u64::from_be_bytes(largesize_buf))
        } else if size32 == 0 {
            (8, file_len - offset)
        } else {
            (8, size32 as u64)
        };

        if box_size < header_size {
            return Err(RvaError::PackMalformed(format!(
                "box size {box_size} smaller than its header ({header_size})"
            )));
        }
        let payload_size = box_size - header_size;

        if box_type == b"uuid" {
            let mut uuid = [0u8; 16];
            reader
                .read_exact(&mut uuid)
                .map_err(|_| RvaError::PackMalformed("truncated uuid field".into()))?;
            let remaining_payload = payload_size
                .checked_sub(16)
                .ok_or_else(|| RvaError::PackMalformed("uuid box smaller than its uuid field".into()))?;

            if uuid == PACK_BOX_UUID {
                let mut payload = vec![0u8; remaining_payload as usize];
                reader
                    .read_exact(&mut payload)
                    .map_err(|_| RvaError::PackMalformed("truncated uuid box payload".into()))?;
                return Ok(payload);
            }
            reader
                .seek(SeekFrom::Current(remaining_payload as i64))
                .map_err(|e| RvaError::InternalError(format!("failed to seek past box: {e}")))?;
        } else {
            reader
                .seek(SeekFrom::Current(payload_size as i64))
                .map_err(|e| RvaError::InternalError(format!("failed to seek past box: {e}")))?;
        }

        offset += box_size;
    }

    Err(RvaError::NotFound("no uuid box with the data pack identifier in this MP4".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_box(out: &mut impl Write, box_type: &[u8; 4], payload: &[u8]) {
        let size = 8 + payload.len() as u32;
        out.write_all(&size.to_be_bytes()).unwrap();
        out.write_all(box_type).unwrap();
        out.write_all(payload).unwrap();
    }

    #[test]
    fn embed_then_extract_round_trip() {
        let video = NamedTempFile::new().unwrap();
        {
            let mut f = File::create(video.path()).unwrap();
            write_box(&mut f, b"ftyp", b"isommp42");
            write_box(&mut f, b"free", b"");
        }

        let pack = NamedTempFile::new().unwrap();
        let pack_bytes = b"pretend-data-pack-bytes".to_vec();
        fs::write(pack.path(), &pack_bytes).unwrap();

        embed(video.path(), pack.path(), None).unwrap();
        let extracted = extract(video.path()).unwrap();
        assert_eq!(extracted, pack_bytes);
    }

    #[test]
    fn extract_not_found_without_uuid_box() {
        let video = NamedTempFile::new().unwrap();
        {
            let mut f = File::create(video.path()).unwrap();
            write_box(&mut f, b"ftyp", b"isommp42");
        }
        let err = extract(video.path()).unwrap_err();
        assert!(matches!(err, RvaError::NotFound(_)));
    }

    #[test]
    fn extract_skips_non_matching_uuid() {
        let video = NamedTempFile::new().unwrap();
        {
            let mut f = File::create(video.path()).unwrap();
            write_box(&mut f, b"ftyp", b"isommp42");
            let mut other_uuid_payload = vec![0u8; 16];
            other_uuid_payload[0] = 0xAB;
            other_uuid_payload.extend_from_slice(b"not the pack");
            write_box(&mut f, b"uuid", &other_uuid_payload);
        }
        let err = extract(video.path()).unwrap_err();
        assert!(matches!(err, RvaError::NotFound(_)));
    }

    #[test]
    fn embed_with_out_path_does_not_mutate_original() {
        let video = NamedTempFile::new().unwrap();
        {
            let mut f = File::create(video.path()).unwrap();
            write_box(&mut f, b"ftyp", b"isommp42");
        }
        let original_len = fs::metadata(video.path()).unwrap().len();

        let pack = NamedTempFile::new().unwrap();
        fs::write(pack.path(), b"abc").unwrap();

        let out = NamedTempFile::new().unwrap();
        embed(video.path(), pack.path(), Some(out.path())).unwrap();

        assert_eq!(fs::metadata(video.path()).unwrap().len(), original_len);
        assert!(fs::metadata(out.path()).unwrap().len() > original_len);
    }
}
