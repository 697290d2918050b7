//! Local file frame source using FFmpeg.
//!
//! Frames are decoded in stream order and converted to RGB24 in-memory.

use anyhow::Context;
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use crate::error::{PipelineError, Result};

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    frame_count: Option<u64>,
    decode_index: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(location: &str) -> Result<Self> {
        Self::open_inner(location)
            .map_err(|e| PipelineError::unavailable(location, format!("{:#}", e)))
    }

    fn open_inner(location: &str) -> anyhow::Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", location))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let fps = f64::from(input_stream.avg_frame_rate());
        let frame_count = u64::try_from(input_stream.frames()).ok().filter(|n| *n > 0);
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frame_count,
            decode_index: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn fps(&self) -> f64 {
        self.fps
    }

    pub(crate) fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    pub(crate) fn next_frame(&mut self) -> Option<Result<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let index = self.decode_index;
                self.decode_index += 1;
                return Some(self.convert(&decoded).map_err(|e| PipelineError::FrameDecode {
                    index,
                    reason: format!("{:#}", e),
                }));
            }
            if self.eof_sent {
                return None;
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((stream_index, packet)) => {
                    if stream_index != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        // One unreadable packet counts as one frame position.
                        let index = self.decode_index;
                        self.decode_index += 1;
                        return Some(Err(PipelineError::FrameDecode {
                            index,
                            reason: format!("send packet to ffmpeg decoder: {}", e),
                        }));
                    }
                }
                None => {
                    // Flush frames still buffered in the decoder.
                    let _ = self.decoder.send_eof();
                    self.eof_sent = true;
                }
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> anyhow::Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        RgbImage::from_raw(width, height, pixels).context("RGB buffer does not match frame size")
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
