//! `ffmpeg-next`-backed [`Decoder`]/[`Encoder`] implementation.
//!
//! The decode loop, scaler construction, and stride-aware row copy mirror
//! `ingest::file_ffmpeg::FfmpegFileSource` almost exactly; this module
//! differs in output pixel format (BGR24, the encoder contract's native
//! channel order, rather than RGB24) and in adding the encode half.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use super::{Decoder, Encoder};
use crate::error::RvaError;
use crate::Frame;

pub struct FfmpegDecoder {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    width: u32,
    height: u32,
    frame_count_hint: Option<u64>,
    next_frame_index: u32,
    decoded: ffmpeg::frame::Video,
    scaled: ffmpeg::frame::Video,
}

impl Decoder for FfmpegDecoder {
    fn open(path: &Path) -> Result<Self, RvaError> {
        ffmpeg::init().map_err(|e| RvaError::DecodeOpenFailed(format!("ffmpeg init failed: {e}")))?;

        let input = ffmpeg::format::input(&path)
            .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to open '{}': {e}", path.display())))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| RvaError::DecodeOpenFailed("input has no video track".into()))?;
        let stream_index = input_stream.index();

        let fps = {
            let rate = input_stream.rate();
            if rate.denominator() == 0 {
                30.0
            } else {
                rate.numerator() as f64 / rate.denominator() as f64
            }
        };
        let frame_count_hint = {
            let frames = input_stream.frames();
            if frames > 0 {
                Some(frames as u64)
            } else {
                None
            }
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to load decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to open video decoder: {e}")))?;

        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::util::format::pixel::Pixel::BGR24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to create scaler: {e}")))?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            width,
            height,
            frame_count_hint,
            next_frame_index: 0,
            decoded: ffmpeg::frame::Video::empty(),
            scaled: ffmpeg::frame::Video::empty(),
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, RvaError> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return self.emit_current_frame();
            }

            let mut packets = self.input.packets();
            let Some((stream, packet)) = packets.next() else {
                self.decoder
                    .send_eof()
                    .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to flush decoder: {e}")))?;
                if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                    return self.emit_current_frame();
                }
                return Ok(None);
            };
            drop(packets);

            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to send packet to decoder: {e}")))?;
        }
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
        self.frame_count_hint
    }
}

impl FfmpegDecoder {
    fn emit_current_frame(&mut self) -> Result<Option<Frame>, RvaError> {
        self.scaler
            .run(&self.decoded, &mut self.scaled)
            .map_err(|e| RvaError::DecodeOpenFailed(format!("failed to scale frame: {e}")))?;

        let pixels = copy_plane_rows(&self.scaled, self.width, self.height);
        let frame = Frame::new(self.next_frame_index, self.width, self.height, pixels);
        self.next_frame_index += 1;
        Ok(Some(frame))
    }
}

fn copy_plane_rows(frame: &ffmpeg::frame::Video, width: u32, height: u32) -> Vec<u8> {
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return data[..row_bytes * height as usize].to_vec();
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }
    pixels
}

pub struct FfmpegEncoder {
    octx: ffmpeg::format::context::Output,
    encoder: ffmpeg::codec::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl Encoder for FfmpegEncoder {
    fn open(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self, RvaError> {
        ffmpeg::init().map_err(|e| RvaError::EncodeOpenFailed(format!("ffmpeg init failed: {e}")))?;

        let mut octx = ffmpeg::format::output(&path)
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to create '{}': {e}", path.display())))?;

        // the "mp4v" fourcc contract maps to the MPEG-4 Part 2 codec.
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| RvaError::EncodeOpenFailed("mp4v (MPEG-4) encoder not available".into()))?;

        let mut ost = octx
            .add_stream(codec)
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to add output stream: {e}")))?;
        let stream_index = ost.index();

        let fps_rational = ffmpeg::Rational::new((fps * 1000.0).round() as i32, 1000);
        let time_base = fps_rational.invert();

        let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to create encoder context: {e}")))?;
        encoder_ctx.set_width(width);
        encoder_ctx.set_height(height);
        encoder_ctx.set_format(ffmpeg::util::format::pixel::Pixel::YUV420P);
        encoder_ctx.set_time_base(time_base);
        encoder_ctx.set_frame_rate(Some(fps_rational));

        if octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER)
        {
            encoder_ctx.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
        }

        let opened = encoder_ctx
            .open_as(codec)
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to open mp4v encoder: {e}")))?;
        ost.set_parameters(&opened);
        ost.set_time_base(time_base);

        octx.write_header()
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to write mp4 header: {e}")))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            ffmpeg::util::format::pixel::Pixel::BGR24,
            width,
            height,
            ffmpeg::util::format::pixel::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to create encode scaler: {e}")))?;

        Ok(Self {
            octx,
            encoder: opened,
            scaler,
            stream_index,
            time_base,
            width,
            height,
            next_pts: 0,
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<(), RvaError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(RvaError::EncodeOpenFailed(format!(
                "frame size {}x{} does not match encoder size {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let mut src = ffmpeg::frame::Video::new(ffmpeg::util::format::pixel::Pixel::BGR24, self.width, self.height);
        let row_bytes = (self.width as usize) * 3;
        let stride = src.stride(0);
        {
            let data = src.data_mut(0);
            for row in 0..self.height as usize {
                let src_start = row * row_bytes;
                let dst_start = row * stride;
                data[dst_start..dst_start + row_bytes]
                    .copy_from_slice(&frame.pixels[src_start..src_start + row_bytes]);
            }
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&src, &mut yuv)
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to scale frame for encoding: {e}")))?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to send frame to encoder: {e}")))?;
        self.drain_packets()?;
        Ok(())
    }
}

impl FfmpegEncoder {
    fn drain_packets(&mut self) -> Result<(), RvaError> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder.time_base(), self.time_base);
            packet
                .write_interleaved(&mut self.octx)
                .map_err(|e| RvaError::EncodeOpenFailed(format!("failed to write packet: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.encoder.send_eof().is_ok() {
            let _ = self.drain_packets();
        }
        let _ = self.octx.write_trailer();
    }
}
