//! FFmpeg codecs: the H.265 [`Decoder`] fed by the decode worker and the
//! per-viewer H.264 [`Encoder`] used by the WebRTC transport.
//!
//! Needs the system FFmpeg libraries, hence the `ffmpeg` feature.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, Id};
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::{Dictionary, Packet};
use tracing::info;

use crate::VideoError;
use crate::decoder::Decoder;
use crate::frame::{I420Frame, VideoFrame};
use crate::rtc::Encoder;
use crate::track::CLOCK_RATE;

/// Key frame interval of the viewer encoders, in frames.
pub const GOP: u32 = 30;

fn decode_error(e: impl std::fmt::Display) -> VideoError {
    VideoError::Decode(e.to_string())
}

fn init() -> Result<(), VideoError> {
    ffmpeg::init().map_err(decode_error)
}

pub struct HevcDecoder {
    decoder: ffmpeg::decoder::Video,
}

impl HevcDecoder {
    pub fn new() -> Result<Self, VideoError> {
        init()?;
        let codec = ffmpeg::decoder::find(Id::HEVC)
            .ok_or_else(|| VideoError::Decode("FFmpeg build has no HEVC decoder".into()))?;
        let decoder = codec::context::Context::new_with_codec(codec)
            .decoder()
            .video()
            .map_err(decode_error)?;
        info!("HEVC decoder opened");
        Ok(Self { decoder })
    }
}

impl Decoder for HevcDecoder {
    fn decode(&mut self, unit: &[u8]) -> Result<Vec<VideoFrame>, VideoError> {
        self.decoder
            .send_packet(&Packet::copy(unit))
            .map_err(decode_error)?;
        let mut frames = Vec::new();
        let mut decoded = Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            frames.push(to_rgb24(&decoded)?);
        }
        Ok(frames)
    }
}

fn to_rgb24(frame: &Video) -> Result<VideoFrame, VideoError> {
    let (width, height) = (frame.width(), frame.height());
    let mut scaler = Scaler::get(
        frame.format(),
        width,
        height,
        Pixel::RGB24,
        width,
        height,
        Flags::BILINEAR,
    )
    .map_err(decode_error)?;
    let mut rgb = Video::empty();
    scaler.run(frame, &mut rgb).map_err(decode_error)?;

    // Rows are padded out to the plane stride.
    let row = width as usize * 3;
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let mut packed = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        packed.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    VideoFrame::rgb24(width, height, packed)
}

/// libx264 tuned for latency: no B-frames, a key frame every [`GOP`].
/// Reopened whenever the frame size changes.
#[derive(Default)]
pub struct H264Encoder {
    open: Option<(ffmpeg::encoder::video::Encoder, u32, u32)>,
}

impl H264Encoder {
    pub fn new() -> Result<Self, VideoError> {
        init()?;
        Ok(Self::default())
    }
}

fn open_encoder(width: u32, height: u32) -> Result<ffmpeg::encoder::video::Encoder, VideoError> {
    let codec = ffmpeg::encoder::find(Id::H264)
        .ok_or_else(|| VideoError::Decode("FFmpeg build has no H.264 encoder".into()))?;
    let mut video = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .map_err(decode_error)?;
    video.set_width(width);
    video.set_height(height);
    video.set_format(Pixel::YUV420P);
    video.set_time_base((1, CLOCK_RATE as i32));
    video.set_gop(GOP);
    video.set_max_b_frames(0);

    let mut options = Dictionary::new();
    options.set("preset", "ultrafast");
    options.set("tune", "zerolatency");
    let encoder = video.open_with(options).map_err(decode_error)?;
    info!(width, height, "H.264 encoder opened");
    Ok(encoder)
}

fn copy_plane(dst: &mut Video, plane: usize, src: &[u8], width: usize, height: usize) {
    let stride = dst.stride(plane);
    let data = dst.data_mut(plane);
    for y in 0..height {
        data[y * stride..y * stride + width].copy_from_slice(&src[y * width..(y + 1) * width]);
    }
}

impl Encoder for H264Encoder {
    fn encode(&mut self, frame: &I420Frame) -> Result<Bytes, VideoError> {
        let (width, height) = (frame.width, frame.height);
        if self
            .open
            .as_ref()
            .is_none_or(|(_, w, h)| (*w, *h) != (width, height))
        {
            self.open = Some((open_encoder(width, height)?, width, height));
        }
        let Some((encoder, ..)) = self.open.as_mut() else {
            return Err(VideoError::Closed);
        };

        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut input = Video::new(Pixel::YUV420P, width, height);
        copy_plane(&mut input, 0, frame.y(), w, h);
        copy_plane(&mut input, 1, frame.u(), cw, ch);
        copy_plane(&mut input, 2, frame.v(), cw, ch);
        input.set_pts(Some(i64::try_from(frame.pts).unwrap_or(i64::MAX)));

        encoder.send_frame(&input).map_err(decode_error)?;
        let mut out = Vec::new();
        let mut packet = Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            if let Some(data) = packet.data() {
                out.extend_from_slice(data);
            }
        }
        Ok(Bytes::from(out))
    }
}
