//! Turning the assembled raster into image file bytes.
//!
//! Surfaces are encoded in-process. Raw buffers are handed to a dedicated
//! worker, one encode at a time across all sessions sharing the lock table.

pub mod worker;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::assemble::OutputRaster;
use crate::config::Config;
use crate::error::{CaptureError, Result};
use crate::lock::{CaptureMutex, LockTable, ENCODER_KEY};
use crate::progress::{Notice, Progress, ProgressSender};
use worker::{EncodeJob, EncodeWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "PNG"),
            ImageFormat::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Encode an RGBA buffer. Alpha is dropped for JPEG and when `alpha` is off.
pub fn encode_rgba(
    rgba: &[u8],
    width: u32,
    height: u32,
    format: ImageFormat,
    quality: u8,
    alpha: bool,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let keep_alpha = alpha && format == ImageFormat::Png;
    let rgb;
    let (pixels, colour) = if keep_alpha {
        (rgba, ExtendedColorType::Rgba8)
    } else {
        rgb = rgba_to_rgb(rgba);
        (rgb.as_slice(), ExtendedColorType::Rgb8)
    };

    let written = match format {
        ImageFormat::Png => PngEncoder::new(&mut out).write_image(pixels, width, height, colour),
        ImageFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .write_image(pixels, width, height, colour),
    };
    written.map_err(|e| CaptureError::Encode(format!("{} encode failed: {}", format, e)))?;
    Ok(out)
}

/// Drop the alpha channel of an RGBA buffer.
fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}

pub struct EncoderDispatcher {
    mutex: CaptureMutex,
    lock_time: Duration,
    timeout: Duration,
    alpha: bool,
}

impl EncoderDispatcher {
    pub fn new(config: &Config, locks: Arc<LockTable>) -> Self {
        Self {
            mutex: CaptureMutex::new(
                locks,
                config.locks.encoder_lock_time(),
                config.locks.retry_interval(),
            ),
            lock_time: config.locks.encoder_lock_time(),
            timeout: config.encode_timeout(),
            alpha: config.alpha,
        }
    }

    pub async fn encode(
        &self,
        raster: OutputRaster,
        format: ImageFormat,
        quality: u8,
        progress: &ProgressSender,
    ) -> Result<Vec<u8>> {
        match raster {
            OutputRaster::Surface(img) => {
                let start = std::time::Instant::now();
                let (w, h) = img.dimensions();
                let alpha = self.alpha;
                let bytes = tokio::task::spawn_blocking(move || {
                    encode_rgba(img.as_raw(), w, h, format, quality, alpha)
                })
                .await
                .map_err(|e| CaptureError::Encode(format!("encode task failed: {}", e)))??;
                log::info!(
                    "[ENCODE] {} {}x{} in-process: {}ms ({} bytes)",
                    format,
                    w,
                    h,
                    start.elapsed().as_millis(),
                    bytes.len()
                );
                Ok(bytes)
            }
            OutputRaster::Raw(raw) => {
                // The worker is a CPU hog; one at a time is enough.
                if !self.mutex.try_lock_for(ENCODER_KEY, self.lock_time) {
                    log::warn!("[ENCODE] Encoder busy, waiting for it");
                    progress.send(Progress::Notice(Notice::EncoderBusy));
                    self.mutex.lock_for(ENCODER_KEY, self.lock_time).await;
                    progress.send(Progress::Saving);
                }
                let _encoder = self.mutex.guard_held(ENCODER_KEY);

                let start = std::time::Instant::now();
                let (width, height) = (raw.width, raw.height);
                let mut worker = EncodeWorker::spawn()?;
                let job = EncodeJob {
                    pixels: raw.pixels,
                    width,
                    height,
                    format,
                    quality,
                    alpha: self.alpha,
                };
                let result = worker.request(job, self.timeout).await;
                worker.terminate();
                log::info!(
                    "[ENCODE] {} {}x{} in worker: {}ms ({})",
                    format,
                    width,
                    height,
                    start.elapsed().as_millis(),
                    if result.is_ok() { "ok" } else { "failed" }
                );
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::RawBuffer;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_png_roundtrip_keeps_pixels() {
        let rgba: Vec<u8> = [10, 20, 30, 40].repeat(6);
        let png = encode_rgba(&rgba, 3, 2, ImageFormat::Png, 90, false).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        assert_eq!(decoded.to_rgba8().get_pixel(2, 1).0, [10, 20, 30, 255]);

        let png = encode_rgba(&rgba, 3, 2, ImageFormat::Png, 90, true).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0).0, [10, 20, 30, 40]);
    }

    #[test]
    fn test_jpeg_is_jpeg() {
        let rgba = vec![128u8; 8 * 8 * 4];
        let jpg = encode_rgba(&rgba, 8, 8, ImageFormat::Jpeg, 0, true).unwrap();
        assert_eq!(&jpg[..2], &[0xFF, 0xD8]);
        assert_eq!(image::guess_format(&jpg).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_dispatch_surface_and_raw() {
        let locks = Arc::new(LockTable::new());
        let dispatcher = EncoderDispatcher::new(&Config::default(), locks.clone());
        let progress = ProgressSender::none();

        let surface = OutputRaster::Surface(RgbaImage::from_pixel(5, 4, Rgba([1, 2, 3, 255])));
        let bytes = dispatcher.encode(surface, ImageFormat::Png, 90, &progress).await.unwrap();
        assert_eq!(image::load_from_memory(&bytes).unwrap().width(), 5);

        let raw = OutputRaster::Raw(RawBuffer {
            width: 6,
            height: 2,
            pixels: vec![255; 6 * 2 * 4],
        });
        let bytes = dispatcher.encode(raw, ImageFormat::Jpeg, 80, &progress).await.unwrap();
        assert_eq!(image::load_from_memory(&bytes).unwrap().height(), 2);
        assert!(!locks.is_locked(ENCODER_KEY));
    }

    #[tokio::test]
    async fn test_surface_encode_leaves_runtime_free() {
        let dispatcher = EncoderDispatcher::new(&Config::default(), Arc::new(LockTable::new()));
        let progress = ProgressSender::none();
        let order = std::sync::Mutex::new(Vec::new());
        let surface = OutputRaster::Surface(RgbaImage::from_fn(1500, 1500, |x, y| {
            Rgba([x as u8, y as u8, (x ^ y) as u8, 255])
        }));

        let (bytes, ()) = tokio::join!(
            async {
                let bytes = dispatcher.encode(surface, ImageFormat::Png, 90, &progress).await;
                order.lock().unwrap().push("encoded");
                bytes
            },
            async {
                tokio::task::yield_now().await;
                order.lock().unwrap().push("ticked");
            }
        );

        assert_eq!(image::load_from_memory(&bytes.unwrap()).unwrap().width(), 1500);
        assert_eq!(*order.lock().unwrap(), ["ticked", "encoded"]);
    }

    #[tokio::test]
    async fn test_raw_encode_waits_for_busy_encoder() {
        let locks = Arc::new(LockTable::new());
        let mut config = Config::default();
        config.locks.retry_interval_ms = 10;
        let holder = CaptureMutex::new(locks.clone(), Duration::from_secs(60), Duration::from_millis(10));
        assert!(holder.try_lock(ENCODER_KEY));

        let (progress, mut rx) = ProgressSender::channel();
        let dispatcher = EncoderDispatcher::new(&config, locks.clone());
        let raw = OutputRaster::Raw(RawBuffer {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
        });
        let task = tokio::spawn(async move {
            dispatcher.encode(raw, ImageFormat::Png, 90, &progress).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.recv().await.unwrap(), Progress::Notice(Notice::EncoderBusy));
        assert!(!task.is_finished());

        holder.unlock(ENCODER_KEY);
        let bytes = task.await.unwrap().unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(rx.recv().await.unwrap(), Progress::Saving);
        assert!(!locks.is_locked(ENCODER_KEY));
    }
}
