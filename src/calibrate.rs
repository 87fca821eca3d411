//! Recovering the real device pixel ratio from a trial capture.
//!
//! Privacy features can make the platform report one ratio and render at
//! another. One low-quality capture of a known CSS size tells us which.

use std::io::Cursor;

use image::ImageReader;

use crate::encode::ImageFormat;
use crate::error::{CaptureError, Result};
use crate::geometry::Size;
use crate::platform::{CaptureCall, CapturePrimitive, NativeRect};

/// Finest fraction a corrected scale is searched at.
const MAX_RESOLUTION: u32 = 1024;

/// Take the calibration capture of `requested` CSS pixels and return the
/// scale that reproduces what came back.
pub async fn calibrate<P>(primitive: &P, requested: Size, nominal: f64) -> Result<f64>
where
    P: CapturePrimitive + ?Sized,
{
    let call = if primitive.capabilities().region_capture {
        CaptureCall::Region {
            rect: NativeRect {
                x: 0,
                y: 0,
                width: requested.width,
                height: requested.height,
            },
            scale: nominal,
            format: ImageFormat::Jpeg,
            quality: 0,
        }
    } else {
        CaptureCall::Viewport {
            format: ImageFormat::Jpeg,
            quality: 0,
        }
    };

    let bytes = primitive
        .capture(&call)
        .await
        .and_then(|captured| captured.into_bytes())
        .map_err(|e| CaptureError::Calibration(format!("{:#}", e)))?;
    let observed = image_size(&bytes)?;

    let scale = corrected_scale(requested, observed, nominal);
    if scale != nominal {
        log::info!(
            "[CAPTURE] Calibrated scale {} (reported {}, {}x{} came back as {}x{})",
            scale,
            nominal,
            requested.width,
            requested.height,
            observed.width,
            observed.height
        );
    }
    Ok(scale)
}

fn image_size(bytes: &[u8]) -> Result<Size> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CaptureError::Calibration(e.to_string()))?
        .into_dimensions()
        .map_err(|e| CaptureError::Calibration(e.to_string()))?;
    Ok(Size::new(width, height))
}

/// Pick the scale that maps `requested` onto `observed`.
///
/// The nominal scale wins if it matches to within one pixel of platform
/// rounding. Otherwise the observed ratio is rounded down and up at a
/// power-of-two resolution and the largest candidate reproducing the
/// observed size exactly is used. With no match, the nominal scale stands.
pub fn corrected_scale(requested: Size, observed: Size, nominal: f64) -> f64 {
    let (w, h) = (requested.width as f64, requested.height as f64);
    let (ow, oh) = (observed.width as u64, observed.height as u64);

    let near = |expected: u64, got: u64| expected == got || expected + 1 == got;
    if near(trunc(w * nominal), ow) && near(trunc(h * nominal), oh) {
        return nominal;
    }
    if requested.width == 0 || requested.height == 0 {
        return nominal;
    }

    let k = resolution(requested) as f64;
    let ratio_w = ow as f64 * k / w;
    let ratio_h = oh as f64 * k / h;
    let mut candidates = [
        ratio_w.floor() / k,
        ratio_w / k,
        ratio_w.ceil() / k,
        ratio_h.floor() / k,
        ratio_h / k,
        ratio_h.ceil() / k,
    ];
    candidates.sort_by(|a, b| b.total_cmp(a));

    candidates
        .into_iter()
        .find(|&c| trunc(w * c) == ow && trunc(h * c) == oh)
        .unwrap_or(nominal)
}

/// `2^ceil(log2(max side))`, capped.
fn resolution(requested: Size) -> u32 {
    requested
        .width
        .max(requested.height)
        .max(1)
        .checked_next_power_of_two()
        .unwrap_or(MAX_RESOLUTION)
        .min(MAX_RESOLUTION)
}

fn trunc(v: f64) -> u64 {
    v.trunc().max(0.0) as u64
}
