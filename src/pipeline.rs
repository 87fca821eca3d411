//! The two-stage tile pipeline.
//!
//! Stage one walks the tiles in order on a serial queue: position the page,
//! capture, hand the bytes on. Page state is shared, so nothing here may
//! overlap. Stage two decodes and composites every tile as soon as its
//! capture arrives; tiles land on disjoint pixels so their order is free.
//! Each tile's capture reaches its composite job through a oneshot channel.

use futures_util::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use crate::assemble::{Compositor, OutputRaster, TileSource};
use crate::encode::ImageFormat;
use crate::error::{CaptureError, Result};
use crate::geometry::Size;
use crate::lock::LockGuard;
use crate::platform::{CapturePrimitive, Captured, Target};
use crate::progress::{Progress, ProgressSender};
use crate::scroll::ScrollStrategy;
use crate::tiles::{Tile, TilePlan};

/// Per-session settings every tile needs.
#[derive(Debug, Clone)]
pub struct TileContext {
    pub plan: Arc<TilePlan>,
    pub compositor: Arc<Compositor>,
    pub format: ImageFormat,
    pub quality: u8,
    /// Native captures come back cropped to the tile; everything else is a
    /// whole window of this size.
    pub native: bool,
    pub window: Size,
}

impl TileContext {
    /// Image pixels per CSS pixel of a capture of `tile`.
    fn source_scale(&self, tile: &Tile, (width, height): (u32, u32)) -> (f64, f64) {
        let (css_w, css_h) = if self.native {
            (tile.width, tile.height)
        } else {
            (self.window.width, self.window.height)
        };
        (width as f64 / css_w.max(1) as f64, height as f64 / css_h.max(1) as f64)
    }
}

#[derive(Debug)]
struct TileCapture {
    captured: Captured,
    offset: (f64, f64),
}

#[derive(Debug)]
enum SerialStep {
    Prepare,
    Progress(usize),
    Capture {
        tile: Tile,
        reply: oneshot::Sender<TileCapture>,
    },
    Restore,
}

#[derive(Debug)]
struct CompositeJob {
    tile: Tile,
    capture: oneshot::Receiver<TileCapture>,
}

#[derive(Debug)]
pub struct Pipeline<'a> {
    serial: Vec<SerialStep>,
    parallel: Vec<CompositeJob>,
    lease: Option<&'a LockGuard<'a>>,
}

impl<'a> Pipeline<'a> {
    /// Queue one capture and one composite per tile, in row-major order.
    pub fn new(plan: &TilePlan) -> Self {
        let total = plan.tile_count();
        let mut serial = Vec::with_capacity(total * 2 + 2);
        let mut parallel = Vec::with_capacity(total);

        serial.push(SerialStep::Prepare);
        for (i, tile) in plan.tiles().enumerate() {
            let (reply, capture) = oneshot::channel();
            serial.push(SerialStep::Progress(total - i));
            serial.push(SerialStep::Capture { tile, reply });
            parallel.push(CompositeJob { tile, capture });
        }
        serial.push(SerialStep::Restore);

        Self {
            serial,
            parallel,
            lease: None,
        }
    }

    /// Keep `guard` alive while tiles are captured, refreshing it per tile.
    pub fn with_lease(mut self, guard: &'a LockGuard<'a>) -> Self {
        self.lease = Some(guard);
        self
    }

    pub fn serial_len(&self) -> usize {
        self.serial.len()
    }

    pub fn parallel_len(&self) -> usize {
        self.parallel.len()
    }

    /// Run both stages to completion and return the filled raster.
    ///
    /// The serial stage always finishes, restore included, even when the
    /// parallel stage has already failed. A capture failure is reported in
    /// preference to the composite failures it causes.
    pub async fn run<T: Target + ?Sized>(
        self,
        target: &T,
        strategy: &mut ScrollStrategy,
        ctx: &TileContext,
        raster: OutputRaster,
        progress: &ProgressSender,
    ) -> Result<OutputRaster> {
        let raster = Arc::new(Mutex::new(raster));
        let abort = AtomicBool::new(false);

        let (captured, composited) = tokio::join!(
            run_serial(self.serial, self.lease, target, strategy, ctx, progress, &abort),
            run_parallel(self.parallel, ctx, raster.clone(), &abort),
        );
        captured?;
        composited?;

        let raster = Arc::try_unwrap(raster).map_err(|_| CaptureError::Host {
            context: "composite",
            reason: "output raster still in use".to_string(),
        })?;
        Ok(raster.into_inner())
    }
}

async fn run_serial<T: Target + ?Sized>(
    steps: Vec<SerialStep>,
    lease: Option<&LockGuard<'_>>,
    target: &T,
    strategy: &mut ScrollStrategy,
    ctx: &TileContext,
    progress: &ProgressSender,
    abort: &AtomicBool,
) -> Result<()> {
    let mut outcome = Ok(());
    for step in steps {
        let stopped = outcome.is_err() || abort.load(Ordering::SeqCst);
        match step {
            SerialStep::Restore => strategy.restore(target).await,
            // Dropping a pending reply cancels its composite job.
            _ if stopped => {}
            SerialStep::Prepare => {
                if let Err(e) = strategy.prepare(target).await {
                    outcome = Err(CaptureError::host("prepare page", e));
                }
            }
            SerialStep::Progress(remaining) => progress.send(Progress::Capturing { remaining }),
            SerialStep::Capture { .. } if lease.is_some_and(|l| !l.refresh()) => {
                outcome = Err(CaptureError::Host {
                    context: "hold capture lock",
                    reason: "the lock lapsed and another session took the page".to_string(),
                });
            }
            SerialStep::Capture { tile, reply } => match capture_tile(target, strategy, ctx, &tile).await {
                Ok(capture) => {
                    let _ = reply.send(capture);
                }
                Err(e) => {
                    log::error!("[CAPTURE] Tile {} failed: {}", tile.index, e);
                    outcome = Err(e);
                }
            },
        }
    }
    outcome
}

async fn capture_tile<T: Target + ?Sized>(
    target: &T,
    strategy: &mut ScrollStrategy,
    ctx: &TileContext,
    tile: &Tile,
) -> Result<TileCapture> {
    let offset = strategy
        .position(target, tile)
        .await
        .map_err(|e| CaptureError::host("position tile", e))?;
    let call = strategy.capture_call(tile, ctx.plan.scale, ctx.format, ctx.quality);
    let captured = target.capture(&call).await.map_err(|e| CaptureError::CaptureCall {
        tile: tile.index,
        reason: format!("{:#}", e),
    })?;
    log::debug!(
        "[CAPTURE] Tile {} ({}x{} at {},{}) captured, offset {:?}",
        tile.index,
        tile.width,
        tile.height,
        tile.x,
        tile.y,
        offset
    );
    Ok(TileCapture { captured, offset })
}

async fn run_parallel(
    jobs: Vec<CompositeJob>,
    ctx: &TileContext,
    raster: Arc<Mutex<OutputRaster>>,
    abort: &AtomicBool,
) -> Result<()> {
    let result = try_join_all(jobs.into_iter().map(|job| composite(job, ctx, raster.clone())))
        .await
        .map(|_| ());
    if result.is_err() {
        abort.store(true, Ordering::SeqCst);
    }
    result
}

async fn composite(job: CompositeJob, ctx: &TileContext, raster: Arc<Mutex<OutputRaster>>) -> Result<()> {
    let CompositeJob { tile, capture } = job;
    let capture = capture.await.map_err(|_| CaptureError::CaptureCall {
        tile: tile.index,
        reason: "capture was abandoned".to_string(),
    })?;

    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let decode_err = |reason: String| CaptureError::Decode {
            tile: tile.index,
            reason,
        };
        let bytes = capture
            .captured
            .into_bytes()
            .map_err(|e| decode_err(format!("{:#}", e)))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| decode_err(e.to_string()))?
            .to_rgba8();

        let source = TileSource {
            scale: ctx.source_scale(&tile, image.dimensions()),
            offset: capture.offset,
            image,
        };
        let rendered = ctx.compositor.render(&ctx.plan, &tile, &source);
        raster.blocking_lock().blit(&rendered);
        Ok(())
    })
    .await
    .map_err(|e| CaptureError::Decode {
        tile: tile.index,
        reason: format!("composite task failed: {}", e),
    })?
}
