//! Frame data structures for captured camera content

use std::sync::Arc;

use image::{DynamicImage, GrayImage, Luma, RgbImage};

use crate::error::FrameError;
use crate::vision::geometry::Rectangle;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
    Bgr8,
    Bgra8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn channels(&self) -> u32 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    /// Byte offsets of the red, green and blue samples inside one pixel
    fn rgb_offsets(&self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Gray8 => (0, 0, 0),
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => (0, 1, 2),
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => (2, 1, 0),
        }
    }
}

/// An immutable camera frame
///
/// The pixel buffer is shared, so clones are cheap and no pipeline stage
/// can modify the caller's frame.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Frame {
    /// Create a frame, checking that the buffer matches the dimensions
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * format.channels() as usize;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                width,
                height,
                channels: format.channels(),
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data: data.into(),
            width,
            height,
            format,
        })
    }

    /// A frame with no pixels
    pub fn empty() -> Self {
        Self {
            data: Arc::from(Vec::new()),
            width: 0,
            height: 0,
            format: PixelFormat::Gray8,
        }
    }

    /// Wrap a grayscale image
    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw().into(),
            width,
            height,
            format: PixelFormat::Gray8,
        }
    }

    /// Wrap an RGB image
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw().into(),
            width,
            height,
            format: PixelFormat::Rgb8,
        }
    }

    /// Convert a decoded image, keeping gray and alpha layouts where possible
    pub fn from_image(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::from_gray(gray),
            DynamicImage::ImageRgba8(rgba) => {
                let (width, height) = rgba.dimensions();
                Self {
                    data: rgba.into_raw().into(),
                    width,
                    height,
                    format: PixelFormat::Rgba8,
                }
            }
            other => Self::from_rgb(other.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True when the frame has no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Luminance plane of the frame
    pub fn to_gray(&self) -> GrayImage {
        if self.format == PixelFormat::Gray8 {
            return GrayImage::from_raw(self.width, self.height, self.data.to_vec())
                .unwrap_or_else(|| GrayImage::new(self.width, self.height));
        }

        let channels = self.format.channels() as usize;
        let (r, g, b) = self.format.rgb_offsets();
        let mut gray = GrayImage::new(self.width, self.height);

        for (i, pixel) in self.data.chunks_exact(channels).enumerate() {
            let x = (i % self.width as usize) as u32;
            let y = (i / self.width as usize) as u32;
            // Standard luminance weights
            let value = 0.299 * pixel[r] as f32 + 0.587 * pixel[g] as f32 + 0.114 * pixel[b] as f32;
            gray.put_pixel(x, y, Luma([value.round() as u8]));
        }

        gray
    }

    /// Color copy of the frame in RGB order
    pub fn to_rgb(&self) -> RgbImage {
        let channels = self.format.channels() as usize;
        let (r, g, b) = self.format.rgb_offsets();
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);

        for pixel in self.data.chunks_exact(channels) {
            rgb.extend_from_slice(&[pixel[r], pixel[g], pixel[b]]);
        }

        RgbImage::from_raw(self.width, self.height, rgb)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Copy out a sub-region, clamped to the frame bounds
    pub fn crop(&self, region: &Rectangle) -> Frame {
        let clamped = region.clamp_to(self.width, self.height);
        let channels = self.format.channels() as usize;
        let row_bytes = clamped.width as usize * channels;
        let mut data = Vec::with_capacity(row_bytes * clamped.height as usize);

        for row in clamped.y..clamped.y + clamped.height {
            let start = (row as usize * self.width as usize + clamped.x as usize) * channels;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Self {
            data: data.into(),
            width: clamped.width,
            height: clamped.height,
            format: self.format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_short_buffer() {
        let err = Frame::new(vec![0; 5], 2, 2, PixelFormat::Rgb8).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { expected: 12, actual: 5, .. }));
    }

    #[test]
    fn test_bgr_to_gray() {
        let data = vec![
            255, 0, 0,    // Blue
            0, 255, 0,    // Green
            0, 0, 255,    // Red
            128, 128, 128, // Gray
        ];
        let frame = Frame::new(data, 2, 2, PixelFormat::Bgr8).unwrap();
        let gray = frame.to_gray();

        assert_eq!(gray.get_pixel(0, 1).0[0], 76); // 0.299 * 255
        assert!(gray.get_pixel(1, 0).0[0] > gray.get_pixel(0, 0).0[0]);
        assert_eq!(gray.get_pixel(1, 1).0[0], 128);
    }

    #[test]
    fn test_gray_rounds_to_nearest() {
        // 0.587 * 255 = 149.685
        let frame = Frame::new(vec![0, 255, 0], 1, 1, PixelFormat::Rgb8).unwrap();
        assert_eq!(frame.to_gray().get_pixel(0, 0).0[0], 150);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let gray = GrayImage::from_fn(10, 8, |x, y| Luma([(y * 10 + x) as u8]));
        let frame = Frame::from_gray(gray);

        let crop = frame.crop(&Rectangle::new(7, 5, 10, 10));
        assert_eq!(crop.dimensions(), (3, 3));
        assert_eq!(crop.data()[0], 57);
        assert_eq!(crop.format(), PixelFormat::Gray8);
    }

    #[test]
    fn test_rgba_to_rgb_drops_alpha() {
        let frame = Frame::new(vec![10, 20, 30, 255], 1, 1, PixelFormat::Rgba8).unwrap();
        assert_eq!(frame.to_rgb().into_raw(), vec![10, 20, 30]);
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty();
        assert!(frame.is_empty());
        assert_eq!(frame.to_gray().dimensions(), (0, 0));
    }
}
