//! Page metrics and the rectangle to capture for each region kind.
//!
//! All rectangles leaving this module are in absolute page coordinates
//! (CSS pixels, origin at the top-left corner of the scrollable content),
//! truncated to integers. The sub-pixel part of the scroll position is kept
//! separately in [`ScrollPosition`].

use serde::{Deserialize, Serialize};

use crate::encode::ImageFormat;
use crate::error::{CaptureError, Result};

/// Which way an axis scrolls. Right-to-left and bottom-to-top documents
/// have their scroll origin at the far edge and report negative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AxisDirection {
    #[default]
    Forward,
    Reverse,
}

impl AxisDirection {
    pub fn is_forward(self) -> bool {
        self == AxisDirection::Forward
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Direction {
    pub x: AxisDirection,
    pub y: AxisDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rectangle in absolute page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PageRect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// A rectangle drawn by the user, relative to the visible viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    #[default]
    Full,
    Viewport,
    Selection,
}

/// Raw metrics as reported by the page.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageMetrics {
    /// Viewport excluding scrollbars.
    pub client_width: u32,
    pub client_height: u32,
    /// Viewport including scrollbars.
    pub inner_width: u32,
    pub inner_height: u32,
    /// Scrollable content size. Zero when the page does not report one.
    pub scroll_width: u32,
    pub scroll_height: u32,
    /// `overflow: hidden|clip` on the root or body limits programmatic
    /// scrolling on that axis without changing the reported scroll size.
    pub clip_x: bool,
    pub clip_y: bool,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub direction: Direction,
}

/// True for overflow values that stop programmatic scrolling.
pub fn overflow_clips(value: &str) -> bool {
    matches!(value.trim(), "hidden" | "clip")
}

impl PageMetrics {
    pub fn viewport(&self) -> Size {
        Size::new(self.client_width, self.client_height)
    }

    /// Programmatically scrollable page size, excluding scrollbars.
    pub fn page(&self) -> Size {
        let width = if self.clip_x {
            self.client_width
        } else {
            nonzero_or(self.scroll_width, self.client_width).max(self.client_width)
        };
        let height = if self.clip_y {
            self.client_height
        } else {
            nonzero_or(self.scroll_height, self.client_height).max(self.client_height)
        };
        Size::new(width, height)
    }

    pub fn scrollbar(&self) -> Size {
        Size::new(
            self.inner_width.saturating_sub(self.client_width),
            self.inner_height.saturating_sub(self.client_height),
        )
    }

    pub fn scroll(&self) -> ScrollPosition {
        ScrollPosition::from_offsets(self.scroll_x, self.scroll_y)
    }

    /// Absolute page coordinate of the viewport's left/top edge.
    fn viewport_origin(&self) -> (f64, f64) {
        let page = self.page();
        let x = if self.direction.x.is_forward() {
            self.scroll_x
        } else {
            page.width as f64 + self.scroll_x - self.client_width as f64
        };
        let y = if self.direction.y.is_forward() {
            self.scroll_y
        } else {
            page.height as f64 + self.scroll_y - self.client_height as f64
        };
        (x, y)
    }
}

fn nonzero_or(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

/// Scroll offset split into its integer part and sub-pixel remainder.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub x: i64,
    pub y: i64,
    pub fraction_x: f64,
    pub fraction_y: f64,
}

impl ScrollPosition {
    pub fn from_offsets(x: f64, y: f64) -> Self {
        let (tx, ty) = (x.trunc(), y.trunc());
        Self {
            x: tx as i64,
            y: ty as i64,
            fraction_x: x - tx,
            fraction_y: y - ty,
        }
    }

    /// The exact offsets the page was at.
    pub fn precise(&self) -> (f64, f64) {
        (self.x as f64 + self.fraction_x, self.y as f64 + self.fraction_y)
    }
}

/// Compute the capture rectangle for `region`.
///
/// `selection` must be present for [`RegionKind::Selection`]; it is ignored
/// otherwise.
pub fn resolve(
    metrics: &PageMetrics,
    region: RegionKind,
    selection: Option<SelectionRect>,
) -> Result<PageRect> {
    let page = metrics.page();
    let rect = match region {
        RegionKind::Full => PageRect::new(0, 0, page.width, page.height),
        RegionKind::Viewport => {
            let (left, top) = metrics.viewport_origin();
            PageRect::new(
                clamp_coord(left),
                clamp_coord(top),
                metrics.client_width,
                metrics.client_height,
            )
        }
        RegionKind::Selection => {
            let sel = selection.ok_or(CaptureError::SelectionCancelled)?;
            let (left, top) = metrics.viewport_origin();
            PageRect::new(
                clamp_coord(left + sel.left),
                clamp_coord(top + sel.top),
                sel.width.trunc().max(0.0) as u32,
                sel.height.trunc().max(0.0) as u32,
            )
        }
    };
    log::debug!("[GEOMETRY] {:?} region resolved to {:?}", region, rect);
    Ok(rect)
}

fn clamp_coord(v: f64) -> u32 {
    v.trunc().clamp(0.0, u32::MAX as f64) as u32
}

/// Immutable description of one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub region: RegionKind,
    pub rect: PageRect,
    pub viewport: Size,
    pub page: Size,
    pub scrollbar: Size,
    pub direction: Direction,
    pub scroll: ScrollPosition,
    /// Device pixel ratio reported by the platform.
    pub scale: f64,
    pub format: ImageFormat,
    pub quality: u8,
}

impl CaptureRequest {
    pub fn new(
        metrics: &PageMetrics,
        region: RegionKind,
        rect: PageRect,
        scale: f64,
        format: ImageFormat,
        quality: u8,
    ) -> Self {
        Self {
            region,
            rect,
            viewport: metrics.viewport(),
            page: metrics.page(),
            scrollbar: metrics.scrollbar(),
            direction: metrics.direction,
            scroll: metrics.scroll(),
            scale,
            format,
            quality,
        }
    }

    /// Viewport size including scrollbars, which is what a whole-viewport
    /// capture returns.
    pub fn window(&self) -> Size {
        Size::new(
            self.viewport.width + self.scrollbar.width,
            self.viewport.height + self.scrollbar.height,
        )
    }
}
