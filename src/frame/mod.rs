//! Frame rasterizing and encoding.
//!
//! The latest camera frame is drawn into a scratch `FrameBuffer`, JPEG-compressed
//! and wrapped as a `data:` URI so it can travel as a single text message.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::io::Cursor;
use thiserror::Error;

use crate::protocol::JPEG_DATA_URI_PREFIX;

/// Used whenever the source has not reported its size yet
pub const FALLBACK_SIZE: (u32, u32) = (640, 480);
/// JPEG quality (1-100). Matches the browser default for `image/jpeg` data URLs.
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JPEG encode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Off-screen scratch surface, overwritten every sampling tick
pub struct FrameBuffer {
    image: RgbImage,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (w, h) = FALLBACK_SIZE;
        Self {
            image: RgbImage::new(w, h),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Track the source's size. A zero in either dimension means "unknown".
    pub fn resize_to(&mut self, (width, height): (u32, u32)) {
        let target = if width == 0 || height == 0 {
            FALLBACK_SIZE
        } else {
            (width, height)
        };
        if self.image.dimensions() != target {
            self.image = RgbImage::new(target.0, target.1);
        }
    }

    /// Draw `frame` over the whole buffer, scaling if the sizes disagree.
    pub fn rasterize(&mut self, frame: &RgbImage) {
        let (w, h) = self.image.dimensions();
        if frame.width() == 0 || frame.height() == 0 {
            self.image.fill(0);
        } else if frame.dimensions() == (w, h) {
            self.image.copy_from_slice(frame.as_raw());
        } else {
            self.image = imageops::resize(frame, w, h, FilterType::Triangle);
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One JPEG snapshot of a `FrameBuffer`, as a `data:image/jpeg;base64,...` URI.
#[derive(Debug)]
pub struct EncodedFrame {
    data_uri: String,
}

impl EncodedFrame {
    pub fn encode(buffer: &FrameBuffer, quality: u8) -> Result<Self, EncodeError> {
        let mut jpeg = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        buffer.image().write_with_encoder(encoder)?;
        let jpeg = jpeg.into_inner();

        let mut data_uri =
            String::with_capacity(JPEG_DATA_URI_PREFIX.len() + jpeg.len().div_ceil(3) * 4);
        data_uri.push_str(JPEG_DATA_URI_PREFIX);
        STANDARD.encode_string(&jpeg, &mut data_uri);

        Ok(Self { data_uri })
    }

    pub fn len(&self) -> usize {
        self.data_uri.len()
    }

    /// Consume the frame into its wire payload
    pub fn into_payload(self) -> String {
        self.data_uri
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_resize_tracks_source() {
        let mut buffer = FrameBuffer::new();
        buffer.resize_to((1280, 720));
        assert_eq!(buffer.dimensions(), (1280, 720));
    }

    #[test]
    fn test_resize_falls_back_when_size_unknown() {
        let mut buffer = FrameBuffer::new();
        buffer.resize_to((1280, 720));

        buffer.resize_to((0, 0));
        assert_eq!(buffer.dimensions(), (640, 480));

        buffer.resize_to((1280, 0));
        assert_eq!(buffer.dimensions(), FALLBACK_SIZE);
    }

    #[test]
    fn test_rasterize_scales_to_buffer() {
        let mut buffer = FrameBuffer::new();
        buffer.resize_to((0, 0));

        let frame = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
        buffer.rasterize(&frame);

        assert_eq!(buffer.dimensions(), (640, 480));
        let px = buffer.image().get_pixel(320, 240);
        for (got, want) in px.0.iter().zip([10u8, 200, 30]) {
            assert!(got.abs_diff(want) <= 1, "{px:?}");
        }
    }

    #[test]
    fn test_rasterize_empty_frame_clears_buffer() {
        let mut buffer = FrameBuffer::new();
        buffer.rasterize(&RgbImage::from_pixel(640, 480, Rgb([255, 255, 255])));
        buffer.rasterize(&RgbImage::new(0, 0));
        assert_eq!(buffer.image().get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_encode_produces_jpeg_data_uri() {
        let mut buffer = FrameBuffer::new();
        buffer.resize_to((64, 48));
        buffer.rasterize(&RgbImage::from_pixel(64, 48, Rgb([128, 64, 32])));

        let frame = EncodedFrame::encode(&buffer, DEFAULT_JPEG_QUALITY).unwrap();
        let payload = frame.into_payload();

        let b64 = payload.strip_prefix("data:image/jpeg;base64,").unwrap();
        let jpeg = STANDARD.decode(b64).unwrap();
        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let mut buffer = FrameBuffer::new();
        let noisy = RgbImage::from_fn(640, 480, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        });
        buffer.rasterize(&noisy);

        let high = EncodedFrame::encode(&buffer, 95).unwrap();
        let low = EncodedFrame::encode(&buffer, 20).unwrap();
        assert!(low.len() < high.len());
    }
}
