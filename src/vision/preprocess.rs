//! Photometric normalization of camera frames
//!
//! Reduces a frame to its luminance plane and runs local contrast
//! enhancement, denoising and sharpening over it. The caller's color frame is
//! never touched, so it stays available for display.

use image::{GrayImage, Luma};
use imageproc::filter::median_filter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capture::frame::Frame;
use crate::error::StageFailure;
use crate::vision::StageOutput;

/// Preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Run the enhancement chain at all
    pub enabled: bool,
    /// Histogram clip limit for local contrast enhancement
    pub clahe_clip_limit: f32,
    /// Tile grid size (tiles per axis)
    pub clahe_tiles: u32,
    /// Median filter radius, 0 disables denoising
    pub denoise_radius: u32,
    /// Apply the 3x3 sharpening kernel
    pub sharpen: bool,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            denoise_radius: 1,
            sharpen: true,
        }
    }
}

/// Photometric statistics of a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameQuality {
    /// Mean intensity (0-255)
    pub brightness: f32,
    /// Intensity standard deviation
    pub contrast: f32,
    /// Variance of the Laplacian; low values mean a blurry frame
    pub sharpness: f32,
}

/// Grayscale, contrast, denoise and sharpen, in that order
#[derive(Debug, Clone, Default)]
pub struct FramePreprocessor {
    settings: PreprocessSettings,
}

impl FramePreprocessor {
    pub fn new(settings: PreprocessSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// Enhance a frame, falling back to the unmodified input on failure
    pub fn enhance(&self, frame: &Frame) -> StageOutput<Frame> {
        match self.try_enhance(frame) {
            Ok(enhanced) => StageOutput::ok(enhanced),
            Err(cause) => {
                warn!("Preprocessing skipped: {}", cause);
                StageOutput::degraded(frame.clone(), cause)
            }
        }
    }

    /// Enhance a frame into a grayscale analysis frame of identical size
    pub fn try_enhance(&self, frame: &Frame) -> Result<Frame, StageFailure> {
        if frame.is_empty() {
            return Err(StageFailure::EmptyFrame);
        }

        let gray = frame.to_gray();
        if !self.settings.enabled {
            debug!("Preprocessing disabled");
            return Ok(Frame::from_gray(gray));
        }

        if self.settings.clahe_tiles == 0 {
            return Err(StageFailure::MalformedFrame(
                "contrast tile grid must be at least 1x1".to_string(),
            ));
        }

        let mut result = clahe(&gray, self.settings.clahe_clip_limit, self.settings.clahe_tiles);

        if self.settings.denoise_radius > 0 {
            result = median_filter(&result, self.settings.denoise_radius, self.settings.denoise_radius);
        }

        if self.settings.sharpen {
            result = sharpen(&result);
        }

        debug!(
            "Preprocessed {}x{} frame (clip={}, tiles={}, denoise={}, sharpen={})",
            frame.width(),
            frame.height(),
            self.settings.clahe_clip_limit,
            self.settings.clahe_tiles,
            self.settings.denoise_radius,
            self.settings.sharpen
        );

        Ok(Frame::from_gray(result))
    }

    /// Measure brightness, contrast and sharpness of a frame
    pub fn quality(&self, frame: &Frame) -> FrameQuality {
        if frame.is_empty() {
            return FrameQuality::default();
        }
        let gray = frame.to_gray();
        let n = gray.as_raw().len() as f64;

        let mean = gray.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = gray
            .as_raw()
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;

        FrameQuality {
            brightness: mean as f32,
            contrast: variance.sqrt() as f32,
            sharpness: laplacian_variance(&gray) as f32,
        }
    }
}

/// Contrast-limited adaptive histogram equalization
///
/// The image is split into `tiles` x `tiles` regions. Each region gets its own
/// clipped-histogram lookup table and every pixel is bilinearly interpolated
/// between the tables of the four nearest tile centers.
pub fn clahe(gray: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_w = width.div_ceil(tiles).max(1);
    let tile_h = height.div_ceil(tiles).max(1);
    let tiles_x = width.div_ceil(tile_w) as usize;
    let tiles_y = height.div_ceil(tile_h) as usize;

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx as u32 * tile_w;
            let y0 = ty as u32 * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }

            let pixels = (x1 - x0) * (y1 - y0);
            luts[ty * tiles_x + tx] = clipped_lut(&mut hist, pixels, clip_limit);
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        // Position relative to tile centers
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = gy.floor().max(0.0) as usize;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..width {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = gx.floor().max(0.0) as usize;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let fx = (gx - tx0 as f32).clamp(0.0, 1.0);

            let v = gray.get_pixel(x, y).0[0] as usize;
            let p00 = luts[ty0 * tiles_x + tx0][v] as f32;
            let p10 = luts[ty0 * tiles_x + tx1][v] as f32;
            let p01 = luts[ty1 * tiles_x + tx0][v] as f32;
            let p11 = luts[ty1 * tiles_x + tx1][v] as f32;

            let top = p00 * (1.0 - fx) + p10 * fx;
            let bottom = p01 * (1.0 - fx) + p11 * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

/// Clip a tile histogram, redistribute the excess and build the CDF lookup table
fn clipped_lut(hist: &mut [u32; 256], pixels: u32, clip_limit: f32) -> [u8; 256] {
    if clip_limit > 0.0 {
        let limit = ((clip_limit * pixels as f32) / 256.0).max(1.0) as u32;
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }

        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += share + u32::from(i < remainder);
        }
    }

    let scale = 255.0 / pixels.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cumulative += count;
        lut[i] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// 3x3 sharpening: center weight 9, all eight neighbors -1, border replicated
pub fn sharpen(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let mut out = GrayImage::new(width, height);
    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        gray.get_pixel(cx, cy).0[0] as f32
    };

    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut neighbors = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx != 0 || dy != 0 {
                        neighbors += at(x + dx, y + dy);
                    }
                }
            }
            let value = 9.0 * at(x, y) - neighbors;
            out.put_pixel(x as u32, y as u32, Luma([value.clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

/// Variance of the 4-neighbour Laplacian over interior pixels
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
    let mut values = Vec::with_capacity(((width - 2) * (height - 2)) as usize);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            values.push(px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y));
        }
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
