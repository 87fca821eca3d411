//! Compositing decoded tiles into the output raster.
//!
//! Rendering (crop, rescale, blur) happens per tile without touching the
//! output, so tiles can be rendered in parallel; only the final copy needs
//! exclusive access to the raster. Tiles never overlap in the output, so the
//! order of those copies does not matter.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::config::Config;
use crate::encode::ImageFormat;
use crate::error::{CaptureError, Result};
use crate::geometry::Size;
use crate::tiles::{RasterKind, Tile, TilePlan};

/// Flat RGBA pixel buffer for outputs too large for one surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputRaster {
    Surface(RgbaImage),
    Raw(RawBuffer),
}

impl OutputRaster {
    /// Allocate the raster the plan asks for.
    pub fn allocate(plan: &TilePlan, format: ImageFormat, alpha: bool) -> Result<Self> {
        let Size { width, height } = plan.output;
        match plan.raster {
            RasterKind::Surface => {
                let fill = if alpha { 0 } else { 255 };
                Ok(Self::Surface(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, fill]))))
            }
            RasterKind::RawBuffer => {
                let rejected = || CaptureError::OversizeRejected {
                    width: width as u64,
                    height: height as u64,
                    format,
                };
                let len = (width as u64)
                    .checked_mul(height as u64)
                    .and_then(|n| n.checked_mul(4))
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(rejected)?;
                let mut pixels = Vec::new();
                pixels.try_reserve_exact(len).map_err(|_| rejected())?;
                pixels.resize(len, 0);
                Ok(Self::Raw(RawBuffer {
                    width,
                    height,
                    pixels,
                }))
            }
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Surface(img) => img.dimensions(),
            Self::Raw(raw) => (raw.width, raw.height),
        }
    }

    /// Copy a rendered tile into place.
    pub fn blit(&mut self, tile: &RenderedTile) {
        match self {
            Self::Surface(surface) => {
                imageops::replace(surface, &tile.pixels, tile.left as i64, tile.top as i64);
            }
            Self::Raw(raw) => copy_rows(raw, tile),
        }
    }

    /// RGBA pixel at `(x, y)`; used by tests and debugging tools.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        match self {
            Self::Surface(img) => img.get_pixel_checked(x, y).map(|p| p.0),
            Self::Raw(raw) => {
                if x >= raw.width || y >= raw.height {
                    return None;
                }
                let i = ((y as usize * raw.width as usize) + x as usize) * 4;
                raw.pixels.get(i..i + 4).and_then(|s| s.try_into().ok())
            }
        }
    }
}

fn copy_rows(raw: &mut RawBuffer, tile: &RenderedTile) {
    let stride = raw.width as usize * 4;
    let (tw, th) = tile.pixels.dimensions();
    if tile.left >= raw.width || tile.top >= raw.height {
        return;
    }
    let width = tw.min(raw.width - tile.left) as usize;
    let rows = th.min(raw.height - tile.top) as usize;
    let src = tile.pixels.as_raw();
    let src_stride = tw as usize * 4;

    if tile.left == 0 && width == raw.width as usize && width == tw as usize {
        // Full-width tile: one contiguous block.
        let start = tile.top as usize * stride;
        let len = rows * stride;
        raw.pixels[start..start + len].copy_from_slice(&src[..len]);
        return;
    }

    for row in 0..rows {
        let dst = (tile.top as usize + row) * stride + tile.left as usize * 4;
        let from = row * src_stride;
        raw.pixels[dst..dst + width * 4].copy_from_slice(&src[from..from + width * 4]);
    }
}

/// A decoded capture and where the tile's content sits in it.
#[derive(Debug, Clone)]
pub struct TileSource {
    pub image: RgbaImage,
    /// Offset of the tile's content inside `image`, in CSS pixels.
    pub offset: (f64, f64),
    /// Image pixels per CSS pixel, per axis.
    pub scale: (f64, f64),
}

/// Tile pixels at their final size and output position.
#[derive(Debug, Clone)]
pub struct RenderedTile {
    pub index: usize,
    pub left: u32,
    pub top: u32,
    pub pixels: RgbaImage,
}

const DEBUG_COLOURS: [[u8; 4]; 3] = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]];

#[derive(Debug, Clone)]
pub struct Compositor {
    blur_radius: f32,
    alpha: bool,
    debug_tiles: bool,
}

impl Compositor {
    pub fn new(config: &Config) -> Self {
        Self {
            blur_radius: config.blur_radius,
            alpha: config.alpha,
            debug_tiles: config.debug_tiles,
        }
    }

    /// Crop the tile out of its capture and scale it to its output size.
    pub fn render(&self, plan: &TilePlan, tile: &Tile, source: &TileSource) -> RenderedTile {
        let (left, top, width, height) = plan.device_rect(tile);
        let (img_w, img_h) = source.image.dimensions();

        let (sx, sy) = source.scale;
        let crop_x = ((source.offset.0 * sx).round().max(0.0) as u32).min(img_w);
        let crop_y = ((source.offset.1 * sy).round().max(0.0) as u32).min(img_h);
        let crop_w = ((tile.width as f64 * sx).round() as u32).min(img_w - crop_x);
        let crop_h = ((tile.height as f64 * sy).round() as u32).min(img_h - crop_y);

        let cropped = imageops::crop_imm(&source.image, crop_x, crop_y, crop_w, crop_h).to_image();

        let mut pixels = if self.blur_radius > 0.0 && plan.raster == RasterKind::Surface {
            self.blur_oversampled(&cropped, width, height)
        } else {
            rescale(&cropped, width, height)
        };

        if !self.alpha {
            for p in pixels.pixels_mut() {
                p.0[3] = 255;
            }
        }
        if self.debug_tiles {
            outline(&mut pixels, DEBUG_COLOURS[tile.index % DEBUG_COLOURS.len()]);
        }

        RenderedTile {
            index: tile.index,
            left,
            top,
            pixels,
        }
    }

    /// Blur shrinks visible content at the edges. Draw the tile oversized by
    /// twice the radius on every side and keep the centre.
    fn blur_oversampled(&self, cropped: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        let pad = (self.blur_radius * 2.0).ceil() as u32;
        let big = rescale(cropped, width + pad * 2, height + pad * 2);
        let blurred = imageops::blur(&big, self.blur_radius);
        imageops::crop_imm(&blurred, pad, pad, width, height).to_image()
    }
}

fn rescale(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    if img.width() == 0 || img.height() == 0 {
        return RgbaImage::new(width, height);
    }
    // Smoothing blurs text in screenshots.
    imageops::resize(img, width, height, FilterType::Nearest)
}

fn outline(img: &mut RgbaImage, colour: [u8; 4]) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    for x in 0..w {
        img.put_pixel(x, 0, Rgba(colour));
        img.put_pixel(x, h - 1, Rgba(colour));
    }
    for y in 0..h {
        img.put_pixel(0, y, Rgba(colour));
        img.put_pixel(w - 1, y, Rgba(colour));
    }
}
