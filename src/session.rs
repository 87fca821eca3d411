//! Capture sessions: everything between a capture request and the encoded
//! image, under the target's lock.

use chrono::{DateTime, Local};
use std::sync::Arc;

use crate::assemble::{Compositor, OutputRaster};
use crate::calibrate::calibrate;
use crate::config::Config;
use crate::encode::{EncoderDispatcher, ImageFormat};
use crate::error::{CaptureError, Result};
use crate::geometry::{resolve, CaptureRequest, RegionKind, Size};
use crate::lock::{target_key, CaptureMutex, LockGuard, LockTable};
use crate::pipeline::{Pipeline, TileContext};
use crate::platform::{Capabilities, CapturePrimitive, PageHost, RegionSelector, Target};
use crate::progress::{Notice, Progress, ProgressSender};
use crate::scroll::{ScrollStrategy, StrategyKind};
use crate::tiles::{RasterKind, TilePlan};

/// Quality tiles are captured at when they will be re-encoded later.
const RAW_TILE_QUALITY: u8 = 100;

/// Runs capture sessions against any number of targets. Sessions on
/// different targets may run concurrently; a second session on a busy target
/// is refused.
#[derive(Debug, Clone)]
pub struct Capturer {
    config: Config,
    locks: Arc<LockTable>,
    strategy: Option<StrategyKind>,
}

impl Capturer {
    pub fn new(config: Config, locks: Arc<LockTable>) -> Self {
        Self {
            config,
            locks,
            strategy: None,
        }
    }

    /// Force a scroll strategy instead of picking one from capabilities.
    pub fn with_strategy(mut self, strategy: Option<StrategyKind>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Capture `request` from `target` and return the encoded image.
    ///
    /// Returns [`CaptureError::LockBusy`] straight away, without touching the
    /// page, if another session is running on the same target.
    pub async fn run_capture<T: Target + ?Sized>(
        &self,
        target: &T,
        request: &CaptureRequest,
        progress: &ProgressSender,
    ) -> Result<Vec<u8>> {
        let mutex = self.target_mutex();
        let key = target_key(&target.id());
        let guard = acquire(&mutex, &key)?;

        let result = self.run_locked(target, request, &guard, progress).await;
        cleanup(&mutex, &key, progress);
        result
    }

    /// Read the page, resolve `region` (asking `selector` for a selection
    /// if needed) and capture it.
    pub async fn capture_region<T: Target + ?Sized>(
        &self,
        target: &T,
        region: RegionKind,
        selector: Option<&dyn RegionSelector>,
        format: ImageFormat,
        quality: Option<u8>,
        progress: &ProgressSender,
    ) -> Result<Vec<u8>> {
        let mutex = self.target_mutex();
        let key = target_key(&target.id());
        let guard = acquire(&mutex, &key)?;

        let result = async {
            let request = self.build_request(target, region, selector, format, quality).await?;
            self.run_locked(target, &request, &guard, progress).await
        }
        .await;
        cleanup(&mutex, &key, progress);
        result
    }

    async fn build_request<T: Target + ?Sized>(
        &self,
        target: &T,
        region: RegionKind,
        selector: Option<&dyn RegionSelector>,
        format: ImageFormat,
        quality: Option<u8>,
    ) -> Result<CaptureRequest> {
        let metrics = target
            .metrics()
            .await
            .map_err(|e| CaptureError::host("read page metrics", e))?;
        let selection = match (region, selector) {
            (RegionKind::Selection, Some(selector)) => selector
                .select()
                .await
                .map_err(|e| CaptureError::host("select region", e))?,
            _ => None,
        };
        let rect = resolve(&metrics, region, selection)?;
        let scale = target
            .device_pixel_ratio()
            .await
            .map_err(|e| CaptureError::host("read device pixel ratio", e))?;
        let quality = quality.unwrap_or(self.config.jpeg_quality);
        Ok(CaptureRequest::new(&metrics, region, rect, scale, format, quality))
    }

    fn target_mutex(&self) -> CaptureMutex {
        CaptureMutex::new(
            self.locks.clone(),
            self.config.locks.target_lock_time(),
            self.config.locks.retry_interval(),
        )
    }

    fn strategy_kind(&self, caps: Capabilities, scale: f64) -> Result<StrategyKind> {
        match self.strategy {
            None => Ok(StrategyKind::select(caps, scale)),
            Some(kind) if kind.is_supported(caps, scale) => Ok(kind),
            Some(kind) => Err(CaptureError::Config(format!(
                "{} capture is not supported by this target",
                kind
            ))),
        }
    }

    async fn run_locked<T: Target + ?Sized>(
        &self,
        target: &T,
        request: &CaptureRequest,
        guard: &LockGuard<'_>,
        progress: &ProgressSender,
    ) -> Result<Vec<u8>> {
        let started = std::time::Instant::now();
        let area = Size::new(request.rect.width, request.rect.height);
        if area.width == 0 || area.height == 0 {
            return Err(CaptureError::Host {
                context: "resolve region",
                reason: "capture area is empty".to_string(),
            });
        }

        let caps = target.capabilities();
        let scale = calibrate(target, request.window(), request.scale).await?;
        let kind = self.strategy_kind(caps, scale)?;
        let plan = TilePlan::new(
            area,
            scale,
            &self.config.limits,
            kind.is_native(),
            request.viewport,
            request.format,
        )?;
        log::info!(
            "[CAPTURE] {:?} {}x{} at {}x: {} tile(s) of up to {}x{} via {} capture",
            request.region,
            area.width,
            area.height,
            scale,
            plan.tile_count(),
            plan.max_tile.width,
            plan.max_tile.height,
            kind
        );

        let raw = plan.raster == RasterKind::RawBuffer;
        if raw {
            log::warn!(
                "[TILES] Output {}x{} exceeds one surface; using a raw buffer",
                plan.output.width,
                plan.output.height
            );
            progress.send(Progress::Notice(Notice::VeryLargeImage));
        }
        let raster = OutputRaster::allocate(&plan, request.format, self.config.alpha)?;

        let ctx = TileContext {
            plan: Arc::new(plan),
            compositor: Arc::new(Compositor::new(&self.config)),
            format: request.format,
            quality: if raw { RAW_TILE_QUALITY } else { request.quality },
            native: kind.is_native(),
            window: request.window(),
        };
        let mut strategy = ScrollStrategy::new(kind, request, caps);
        let pipeline = Pipeline::new(&ctx.plan).with_lease(guard);
        let result = pipeline.run(target, &mut strategy, &ctx, raster, progress).await;
        // Already done by the pipeline unless it never got that far.
        strategy.restore(target).await;
        let raster = result?;

        // Encoding may queue behind another session's encode, then run up to
        // the timeout.
        let locks = &self.config.locks;
        guard.refresh_for(locks.target_lock_time() + locks.encoder_lock_time() + self.config.encode_timeout());

        progress.send(Progress::Saving);
        let dispatcher = EncoderDispatcher::new(&self.config, self.locks.clone());
        let bytes = dispatcher
            .encode(raster, request.format, request.quality, progress)
            .await?;
        log::info!(
            "[CAPTURE] Done in {}ms: {} {} bytes",
            started.elapsed().as_millis(),
            request.format,
            bytes.len()
        );
        Ok(bytes)
    }
}

fn acquire<'a>(mutex: &'a CaptureMutex, key: &str) -> Result<LockGuard<'a>> {
    mutex.try_guard(key).ok_or_else(|| {
        log::info!("[LOCK] {} already capturing, request dropped", key);
        CaptureError::LockBusy(key.to_string())
    })
}

/// Reset the progress indicator while the lock is still ours; the guard
/// releases it afterwards.
fn cleanup(mutex: &CaptureMutex, key: &str, progress: &ProgressSender) {
    mutex.try_lock(key);
    progress.send(Progress::Idle);
}

/// Default download name, e.g. `Screenshot 2024-05-01 13-04-05.png`.
pub fn default_filename(format: ImageFormat, now: DateTime<Local>) -> String {
    format!("Screenshot {}.{}", now.format("%Y-%m-%d %H-%M-%S"), format.extension())
}
