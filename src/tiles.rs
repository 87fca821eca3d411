//! Partitioning the capture area into tiles the platform can capture.

use serde::Serialize;

use crate::config::Limits;
use crate::encode::ImageFormat;
use crate::error::{CaptureError, Result};
use crate::geometry::Size;

/// One unit of capture work, relative to the capture area's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Tile {
    pub index: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Canvas limits after dividing out the device scale, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaledLimits {
    pub max_dimension: u32,
    pub max_area: u64,
}

impl ScaledLimits {
    pub fn new(limits: &Limits, scale: f64) -> Self {
        Self {
            max_dimension: (limits.max_dimension as f64 / scale).trunc() as u32,
            max_area: (limits.max_area as f64 / (scale * scale)).trunc() as u64,
        }
    }
}

/// How the output raster will be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RasterKind {
    /// Fits one drawing surface; encoded in-process.
    Surface,
    /// Too big for a surface; accumulated in a flat buffer and encoded by
    /// the worker.
    RawBuffer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TilePlan {
    /// Capture area in CSS pixels.
    pub area: Size,
    pub scale: f64,
    pub max_tile: Size,
    pub raster: RasterKind,
    /// Output size in device pixels.
    pub output: Size,
    pub limits: ScaledLimits,
}

impl TilePlan {
    /// Plan tiles for a `area` capture.
    ///
    /// `native` selects the larger native tile caps; scroll-based capture is
    /// additionally bounded by `viewport`.
    pub fn new(
        area: Size,
        scale: f64,
        limits: &Limits,
        native: bool,
        viewport: Size,
        format: ImageFormat,
    ) -> Result<Self> {
        let scaled = ScaledLimits::new(limits, scale);
        let fits_surface = area.width.max(area.height) <= scaled.max_dimension
            && area.width as u64 * area.height as u64 <= scaled.max_area;

        let cap = scaled.max_dimension.max(1);
        let max_tile = if native {
            Size::new(
                area.width.min(cap).min(limits.native_tile_width),
                area.height.min(cap).min(limits.native_tile_height),
            )
        } else {
            Size::new(
                viewport.width.min(cap).min(limits.native_tile_width),
                viewport.height.min(cap).min(limits.native_tile_height),
            )
        };

        let output = Size::new(
            (area.width as f64 * scale).trunc() as u32,
            (area.height as f64 * scale).trunc() as u32,
        );

        let raster = if fits_surface {
            RasterKind::Surface
        } else {
            check_raw_buffer(output, format, limits)?;
            RasterKind::RawBuffer
        };

        if area.width > 0 && area.height > 0 && (max_tile.width == 0 || max_tile.height == 0) {
            return Err(CaptureError::Config(format!(
                "tile size {}x{} cannot cover a {}x{} area",
                max_tile.width, max_tile.height, area.width, area.height
            )));
        }

        Ok(Self {
            area,
            scale,
            max_tile,
            raster,
            output,
            limits: scaled,
        })
    }

    pub fn columns(&self) -> u32 {
        ceil_div(self.area.width, self.max_tile.width)
    }

    pub fn rows(&self) -> u32 {
        ceil_div(self.area.height, self.max_tile.height)
    }

    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    /// Tiles in row-major order. Edge tiles are clipped, never padded.
    pub fn tiles(&self) -> Tiles {
        Tiles {
            area: self.area,
            max: self.max_tile,
            x: 0,
            y: 0,
            index: 0,
        }
    }

    /// Device-pixel rectangle of `tile` in the output raster.
    ///
    /// Edges are computed from the truncated positions of both sides so
    /// neighbouring tiles meet exactly even at fractional scales.
    pub fn device_rect(&self, tile: &Tile) -> (u32, u32, u32, u32) {
        let s = self.scale;
        let left = (tile.x as f64 * s).trunc() as u32;
        let top = (tile.y as f64 * s).trunc() as u32;
        let right = ((tile.x + tile.width) as f64 * s).trunc() as u32;
        let bottom = ((tile.y + tile.height) as f64 * s).trunc() as u32;
        (
            left.min(self.output.width),
            top.min(self.output.height),
            right.min(self.output.width).saturating_sub(left),
            bottom.min(self.output.height).saturating_sub(top),
        )
    }
}

fn ceil_div(total: u32, step: u32) -> u32 {
    if step == 0 {
        0
    } else {
        (total + step - 1) / step
    }
}

/// Fail before any capture if the raw output can never be encoded.
fn check_raw_buffer(output: Size, format: ImageFormat, limits: &Limits) -> Result<()> {
    let (w, h) = (output.width as u64, output.height as u64);
    let rejected = || CaptureError::OversizeRejected {
        width: w,
        height: h,
        format,
    };

    let bytes = w.checked_mul(h).and_then(|px| px.checked_mul(4)).ok_or_else(rejected)?;
    if bytes > limits.max_buffer_bytes || usize::try_from(bytes).is_err() {
        return Err(rejected());
    }
    let format_cap = match format {
        ImageFormat::Png => limits.png_max_dimension,
        ImageFormat::Jpeg => limits.jpeg_max_dimension,
    };
    if w > format_cap || h > format_cap {
        return Err(rejected());
    }
    Ok(())
}

/// Lazy row-major tile iterator.
#[derive(Debug, Clone)]
pub struct Tiles {
    area: Size,
    max: Size,
    x: u32,
    y: u32,
    index: usize,
}

impl Iterator for Tiles {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.max.width == 0 || self.max.height == 0 {
            return None;
        }
        if self.x >= self.area.width {
            self.x = 0;
            self.y += self.max.height;
        }
        if self.y >= self.area.height || self.area.width == 0 {
            return None;
        }

        let tile = Tile {
            index: self.index,
            x: self.x,
            y: self.y,
            width: self.max.width.min(self.area.width - self.x),
            height: self.max.height.min(self.area.height - self.y),
        };
        self.x += self.max.width;
        self.index += 1;
        Some(tile)
    }
}
