//! Frame Acquisition Layer
//!
//! Frames come from a [`FrameSource`]: a camera driver or a directory of test
//! images. [`FramePump`] polls a source at a bounded rate on its own thread
//! and always hands over the newest frame, so a slow consumer never builds up
//! a backlog.

pub mod frame;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use frame::Frame;

/// File extensions loaded by [`ImageDirSource`]
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Frame acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Maximum frames per second pulled from the source
    pub max_fps: u32,
    /// Directory of test images used instead of a camera
    pub image_dir: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_fps: 30,
            image_dir: None,
        }
    }
}

/// Anything that can produce camera frames
pub trait FrameSource: Send {
    /// Next frame, or `None` when no frame is available right now
    fn get_frame(&mut self) -> Option<Frame>;
}

/// Cycles through the images of a directory in file-name order
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    /// Collect the images in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            bail!("No images found in {}", dir.display());
        }

        info!("Loaded {} test images from {}", paths.len(), dir.display());
        Ok(Self { paths, next: 0 })
    }

    /// Use an explicit list of image files, in the given order
    pub fn from_paths(paths: Vec<PathBuf>) -> Result<Self> {
        if paths.is_empty() {
            bail!("No image paths given");
        }
        Ok(Self { paths, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn get_frame(&mut self) -> Option<Frame> {
        // Unreadable files are skipped, but one full cycle at most
        for _ in 0..self.paths.len() {
            let path = &self.paths[self.next];
            self.next = (self.next + 1) % self.paths.len();

            match image::open(path) {
                Ok(image) => return Some(Frame::from_image(image)),
                Err(e) => warn!("Skipping unreadable image {}: {}", path.display(), e),
            }
        }
        None
    }
}

/// Polls a frame source on a background thread at a bounded rate
pub struct FramePump {
    frames: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FramePump {
    /// Start polling `source` at most `max_fps` times per second
    pub fn start(mut source: Box<dyn FrameSource>, max_fps: u32) -> Result<Self> {
        let interval = Duration::from_secs_f64(1.0 / max_fps.max(1) as f64);
        let (tx, rx) = bounded::<Frame>(1);
        let drain = rx.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || {
                debug!("Frame pump running at {} fps", max_fps);
                while !stop_flag.load(Ordering::Relaxed) {
                    let tick = Instant::now();

                    if let Some(frame) = source.get_frame() {
                        // Replace a frame nobody picked up
                        if let Err(TrySendError::Full(frame)) = tx.try_send(frame) {
                            let _ = drain.try_recv();
                            let _ = tx.try_send(frame);
                        }
                    }

                    if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                debug!("Frame pump stopped");
            })
            .context("Failed to spawn frame pump thread")?;

        Ok(Self {
            frames: rx,
            stop,
            handle: Some(handle),
        })
    }

    /// Wait up to `timeout` for a frame
    pub fn next_frame(&self, timeout: Duration) -> Option<Frame> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the polling thread and wait for it
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Adapts the pump to [`FrameSource`] with a fixed wait per request
pub struct PumpSource {
    pump: FramePump,
    timeout: Duration,
}

impl PumpSource {
    pub fn new(pump: FramePump, timeout: Duration) -> Self {
        Self { pump, timeout }
    }
}

impl FrameSource for PumpSource {
    fn get_frame(&mut self) -> Option<Frame> {
        self.pump.next_frame(self.timeout)
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{blank_frame, VecSource};
    use image::{GrayImage, Luma};

    #[test]
    fn test_image_dir_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 3, Luma([10])).save(dir.path().join("b.png")).unwrap();
        GrayImage::from_pixel(6, 5, Luma([20])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut source = ImageDirSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        assert_eq!(source.get_frame().unwrap().dimensions(), (6, 5));
        assert_eq!(source.get_frame().unwrap().dimensions(), (4, 3));
        assert_eq!(source.get_frame().unwrap().dimensions(), (6, 5));
    }

    #[test]
    fn test_image_dir_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"garbage").unwrap();
        GrayImage::from_pixel(4, 4, Luma([0])).save(dir.path().join("b.png")).unwrap();

        let mut source = ImageDirSource::open(dir.path()).unwrap();
        assert_eq!(source.get_frame().unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn test_empty_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirSource::open(dir.path()).is_err());
    }

    #[test]
    fn test_pump_delivers_frames() {
        let source = VecSource::repeating(blank_frame(8, 8, 128));
        let mut pump = FramePump::start(Box::new(source), 200).unwrap();

        let frame = pump.next_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.dimensions(), (8, 8));
        assert!(pump.is_running());

        pump.stop();
        assert!(!pump.is_running());
    }

    #[test]
    fn test_pump_without_frames_times_out() {
        let pump = FramePump::start(Box::new(VecSource::new(vec![])), 100).unwrap();
        assert!(pump.next_frame(Duration::from_millis(50)).is_none());
    }
}
