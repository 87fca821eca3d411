//! In-memory page for the CLI and tests.
//!
//! The document is an RGBA image in CSS pixels. Injected stylesheets are
//! interpreted through their [`SheetKind`], scrolling clamps like a browser,
//! and captures are rendered from the document and encoded for real.

use async_trait::async_trait;
use image::{imageops, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{data_url, Capabilities, CaptureCall, CapturePrimitive, Captured, PageHost, RegionSelector, Target};
use crate::encode::{encode_rgba, ImageFormat};
use crate::geometry::{AxisDirection, Direction, PageMetrics, SelectionRect, Size};
use crate::scroll::css::{RootStyle, SheetKind, Stylesheet};

/// Off-page area.
const BLANK: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GUTTER: Rgba<u8> = Rgba([200, 200, 200, 255]);

#[derive(Debug, Default)]
struct SimState {
    scroll: (f64, f64),
    sheets: Vec<Stylesheet>,
}

#[derive(Debug)]
pub struct SimulatedPage {
    id: String,
    document: RgbaImage,
    viewport: Size,
    scrollbar: Size,
    direction: Direction,
    clip: (bool, bool),
    reported_scale: f64,
    render_scale: f64,
    caps: Capabilities,
    root: RootStyle,
    selection: Option<SelectionRect>,
    capture_delay: Option<Duration>,
    fail_capture: Option<usize>,
    captures: AtomicUsize,
    state: Mutex<SimState>,
}

impl SimulatedPage {
    /// A page showing `document` through a `viewport`, with every capability.
    pub fn new(id: impl Into<String>, document: RgbaImage, viewport: Size) -> Self {
        Self {
            id: id.into(),
            document,
            viewport,
            scrollbar: Size::default(),
            direction: Direction::default(),
            clip: (false, false),
            reported_scale: 1.0,
            render_scale: 1.0,
            caps: Capabilities {
                region_capture: true,
                region_capture_scaled: true,
                style_injection: true,
            },
            root: RootStyle::default(),
            selection: None,
            capture_delay: None,
            fail_capture: None,
            captures: AtomicUsize::new(0),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_scrollbar(mut self, scrollbar: Size) -> Self {
        self.scrollbar = scrollbar;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_clip(mut self, x: bool, y: bool) -> Self {
        self.clip = (x, y);
        self
    }

    /// Report `reported` as the device pixel ratio but render at `actual`.
    pub fn with_scale(mut self, reported: f64, actual: f64) -> Self {
        self.reported_scale = reported;
        self.render_scale = actual;
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_root_style(mut self, root: RootStyle) -> Self {
        self.root = root;
        self
    }

    pub fn with_scroll(self, x: f64, y: f64) -> Self {
        let clamped = self.clamp_scroll(x, y);
        self.lock().scroll = clamped;
        self
    }

    pub fn with_selection(mut self, selection: Option<SelectionRect>) -> Self {
        self.selection = selection;
        self
    }

    /// Sleep this long inside every capture call.
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = Some(delay);
        self
    }

    /// Make the `n`th capture call (1-based) fail.
    pub fn fail_capture(mut self, n: usize) -> Self {
        self.fail_capture = Some(n);
        self
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn active_sheets(&self) -> Vec<Stylesheet> {
        self.lock().sheets.clone()
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        self.lock().scroll
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn page_size(&self) -> Size {
        Size::new(
            self.document.width().max(self.viewport.width),
            self.document.height().max(self.viewport.height),
        )
    }

    fn max_scroll(&self) -> (f64, f64) {
        let page = self.page_size();
        let x = if self.clip.0 { 0 } else { page.width - self.viewport.width };
        let y = if self.clip.1 { 0 } else { page.height - self.viewport.height };
        (x as f64, y as f64)
    }

    fn clamp_scroll(&self, x: f64, y: f64) -> (f64, f64) {
        let (mx, my) = self.max_scroll();
        (clamp_axis(self.direction.x, x, mx), clamp_axis(self.direction.y, y, my))
    }

    /// Absolute document coordinate of the viewport's top-left corner.
    fn viewport_origin(&self, scroll: (f64, f64)) -> (f64, f64) {
        let page = self.page_size();
        let axis = |dir: AxisDirection, s: f64, p: u32, v: u32| match dir {
            AxisDirection::Forward => s,
            AxisDirection::Reverse => p as f64 - v as f64 + s,
        };
        (
            axis(self.direction.x, scroll.0, page.width, self.viewport.width),
            axis(self.direction.y, scroll.1, page.height, self.viewport.height),
        )
    }

    fn render_viewport(&self) -> RgbaImage {
        let state = self.lock();
        let (mut left, mut top) = self.viewport_origin(state.scroll);
        // The newest shift wins the cascade.
        if let Some((x, y)) = state.sheets.iter().rev().find_map(|s| match s.kind {
            SheetKind::Shift { x, y } => Some((x, y)),
            _ => None,
        }) {
            left += x;
            top += y;
        }
        drop(state);

        let s = self.render_scale;
        let width = ((self.viewport.width + self.scrollbar.width) as f64 * s).trunc() as u32;
        let height = ((self.viewport.height + self.scrollbar.height) as f64 * s).trunc() as u32;
        let (vw, vh) = (self.viewport.width as f64, self.viewport.height as f64);
        RgbaImage::from_fn(width, height, |ox, oy| {
            let (cx, cy) = (ox as f64 / s, oy as f64 / s);
            if cx >= vw || cy >= vh {
                GUTTER
            } else {
                self.document_pixel(left + cx, top + cy)
            }
        })
    }

    fn render_region(&self, x: f64, y: f64, width: u32, height: u32, scale: f64) -> RgbaImage {
        let (out_w, out_h) = (
            (width as f64 * scale).trunc() as u32,
            (height as f64 * scale).trunc() as u32,
        );
        let inside = x >= 0.0
            && y >= 0.0
            && x.fract() == 0.0
            && y.fract() == 0.0
            && x as u32 + width <= self.document.width()
            && y as u32 + height <= self.document.height();
        if scale == 1.0 && inside {
            return imageops::crop_imm(&self.document, x as u32, y as u32, width, height).to_image();
        }
        RgbaImage::from_fn(out_w, out_h, |ox, oy| {
            self.document_pixel(x + ox as f64 / scale, y + oy as f64 / scale)
        })
    }

    fn document_pixel(&self, x: f64, y: f64) -> Rgba<u8> {
        if x < 0.0 || y < 0.0 {
            return BLANK;
        }
        self.document
            .get_pixel_checked(x.floor() as u32, y.floor() as u32)
            .copied()
            .unwrap_or(BLANK)
    }
}

fn clamp_axis(dir: AxisDirection, value: f64, max: f64) -> f64 {
    match dir {
        AxisDirection::Forward => value.clamp(0.0, max),
        AxisDirection::Reverse => value.clamp(-max, 0.0),
    }
}

fn encode(img: &RgbaImage, format: ImageFormat, quality: u8) -> anyhow::Result<Vec<u8>> {
    Ok(encode_rgba(img.as_raw(), img.width(), img.height(), format, quality, false)?)
}

#[async_trait]
impl PageHost for SimulatedPage {
    async fn metrics(&self) -> anyhow::Result<PageMetrics> {
        let (scroll_x, scroll_y) = self.lock().scroll;
        Ok(PageMetrics {
            client_width: self.viewport.width,
            client_height: self.viewport.height,
            inner_width: self.viewport.width + self.scrollbar.width,
            inner_height: self.viewport.height + self.scrollbar.height,
            scroll_width: self.document.width(),
            scroll_height: self.document.height(),
            clip_x: self.clip.0,
            clip_y: self.clip.1,
            scroll_x,
            scroll_y,
            direction: self.direction,
        })
    }

    async fn device_pixel_ratio(&self) -> anyhow::Result<f64> {
        Ok(self.reported_scale)
    }

    async fn root_style(&self) -> anyhow::Result<RootStyle> {
        Ok(self.root.clone())
    }

    async fn insert_css(&self, sheet: &Stylesheet) -> anyhow::Result<()> {
        if !self.caps.style_injection {
            anyhow::bail!("style injection is not available");
        }
        self.lock().sheets.push(sheet.clone());
        Ok(())
    }

    async fn remove_css(&self, sheet: &Stylesheet) -> anyhow::Result<()> {
        let mut state = self.lock();
        if let Some(pos) = state.sheets.iter().rposition(|s| s == sheet) {
            state.sheets.remove(pos);
        }
        Ok(())
    }

    async fn scroll_to(&self, x: f64, y: f64) -> anyhow::Result<()> {
        let clamped = self.clamp_scroll(x, y);
        self.lock().scroll = clamped;
        Ok(())
    }
}

#[async_trait]
impl CapturePrimitive for SimulatedPage {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn capture(&self, call: &CaptureCall) -> anyhow::Result<Captured> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.capture_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_capture == Some(n) {
            anyhow::bail!("capture {} failed: tab was navigated", n);
        }

        match *call {
            CaptureCall::Region {
                rect,
                scale,
                format,
                quality,
            } => {
                if !self.caps.region_capture {
                    anyhow::bail!("region capture is not available");
                }
                // The platform substitutes its real ratio for the one it
                // advertised; any other scale is honoured.
                let scale = if (scale - self.reported_scale).abs() < f64::EPSILON {
                    self.render_scale
                } else {
                    scale
                };
                let page = self.page_size();
                let x = match self.direction.x {
                    AxisDirection::Forward => rect.x,
                    AxisDirection::Reverse => rect.x + page.width as i64 - self.viewport.width as i64,
                };
                let y = match self.direction.y {
                    AxisDirection::Forward => rect.y,
                    AxisDirection::Reverse => rect.y + page.height as i64 - self.viewport.height as i64,
                };
                let img = self.render_region(x as f64, y as f64, rect.width, rect.height, scale);
                Ok(Captured::Bytes(encode(&img, format, quality)?))
            }
            CaptureCall::Viewport { format, quality } => {
                let img = self.render_viewport();
                Ok(Captured::DataUrl(data_url(format, &encode(&img, format, quality)?)))
            }
        }
    }
}

impl Target for SimulatedPage {
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[async_trait]
impl RegionSelector for SimulatedPage {
    async fn select(&self) -> anyhow::Result<Option<SelectionRect>> {
        Ok(self.selection)
    }
}
