//! Getting each tile's content in front of the capture primitive.
//!
//! The strategy is picked once per session from the platform's
//! capabilities. Native capture reaches any page rectangle directly. Without
//! it, the page is moved under a fixed viewport, either by a CSS translate
//! of the root element (no visible scrolling) or by really scrolling.

pub mod css;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::encode::ImageFormat;
use crate::geometry::{AxisDirection, CaptureRequest, Direction, PageRect, RegionKind, Size};
use crate::platform::{Capabilities, CaptureCall, NativeRect, PageHost};
use crate::tiles::Tile;
use css::{RootStyle, Stylesheet};
use state::{ScrollState, Undo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Native,
    Css,
    Real,
}

impl StrategyKind {
    /// Native if the platform can capture rectangles at our scale, then CSS
    /// virtual scrolling, then real scrolling.
    pub fn select(caps: Capabilities, scale: f64) -> Self {
        if Self::Native.is_supported(caps, scale) {
            StrategyKind::Native
        } else if caps.style_injection {
            StrategyKind::Css
        } else {
            StrategyKind::Real
        }
    }

    pub fn is_supported(self, caps: Capabilities, scale: f64) -> bool {
        match self {
            StrategyKind::Native => caps.region_capture && (caps.region_capture_scaled || scale == 1.0),
            StrategyKind::Css => caps.style_injection,
            StrategyKind::Real => true,
        }
    }

    pub fn is_native(self) -> bool {
        self == StrategyKind::Native
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Native => write!(f, "native"),
            StrategyKind::Css => write!(f, "css"),
            StrategyKind::Real => write!(f, "scroll"),
        }
    }
}

#[derive(Debug)]
pub struct ScrollStrategy {
    kind: StrategyKind,
    region: RegionKind,
    rect: PageRect,
    viewport: Size,
    page: Size,
    scrollbar: Size,
    direction: Direction,
    style_injection: bool,
    /// Scroll offsets when the session started.
    origin: (f64, f64),
    /// Scroll offsets right now, as far as we know.
    current: (f64, f64),
    root: Option<RootStyle>,
    state: ScrollState,
}

impl ScrollStrategy {
    pub fn new(kind: StrategyKind, request: &CaptureRequest, caps: Capabilities) -> Self {
        let origin = request.scroll.precise();
        Self {
            kind,
            region: request.region,
            rect: request.rect,
            viewport: request.viewport,
            page: request.page,
            scrollbar: request.scrollbar,
            direction: request.direction,
            style_injection: caps.style_injection,
            origin,
            current: origin,
            root: None,
            state: ScrollState::new(),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn state(&self) -> &ScrollState {
        &self.state
    }

    /// Full-page captures start from a reset page scrolled to the origin,
    /// whatever the strategy, so sticky elements sit where they belong.
    pub async fn prepare<H: PageHost + ?Sized>(&mut self, host: &H) -> anyhow::Result<()> {
        if self.region == RegionKind::Full {
            self.reset(host).await?;
        }
        Ok(())
    }

    /// The capture request for `tile`.
    pub fn capture_call(&self, tile: &Tile, scale: f64, format: ImageFormat, quality: u8) -> CaptureCall {
        if self.kind.is_native() {
            CaptureCall::Region {
                rect: self.native_rect(tile),
                scale,
                format,
                quality,
            }
        } else {
            CaptureCall::Viewport { format, quality }
        }
    }

    /// Tile rectangle relative to the scroll origin of each axis.
    pub fn native_rect(&self, tile: &Tile) -> NativeRect {
        let left = (self.rect.left + tile.x) as i64;
        let top = (self.rect.top + tile.y) as i64;
        NativeRect {
            x: match self.direction.x {
                AxisDirection::Forward => left,
                AxisDirection::Reverse => left - self.page.width as i64 + self.viewport.width as i64,
            },
            y: match self.direction.y {
                AxisDirection::Forward => top,
                AxisDirection::Reverse => top - self.page.height as i64 + self.viewport.height as i64,
            },
            width: tile.width,
            height: tile.height,
        }
    }

    /// Make `tile` capturable and return where its content starts in the
    /// captured image, in CSS pixels.
    pub async fn position<H: PageHost + ?Sized>(&mut self, host: &H, tile: &Tile) -> anyhow::Result<(f64, f64)> {
        let first = self.state.take_first();
        if self.kind.is_native() {
            return Ok((0.0, 0.0));
        }

        let abs = ((self.rect.left + tile.x) as f64, (self.rect.top + tile.y) as f64);
        if first {
            let view = self.viewport_origin(self.current);
            let fits_x = abs.0 >= view.0 && abs.0 + tile.width as f64 <= view.0 + self.viewport.width as f64;
            let fits_y = abs.1 >= view.1 && abs.1 + tile.height as f64 <= view.1 + self.viewport.height as f64;
            if fits_x && fits_y {
                log::debug!("[SCROLL] Tile {} already visible, page left alone", tile.index);
                return Ok((abs.0 - view.0, abs.1 - view.1));
            }
        }

        let target = (
            target_edge(abs.0, tile.width, self.direction.x, self.viewport.width),
            target_edge(abs.1, tile.height, self.direction.y, self.viewport.height),
        );

        match self.kind {
            StrategyKind::Css => {
                self.reset(host).await?;
                let base = self.viewport_origin((0.0, 0.0));
                let root = match &self.root {
                    Some(root) => root.clone(),
                    None => {
                        let root = host.root_style().await?;
                        self.root = Some(root.clone());
                        root
                    }
                };
                let sheet = root.shift(target.0 - base.0, target.1 - base.1);
                host.insert_css(&sheet).await?;
                log::debug!("[SCROLL] Tile {} via {:?}", tile.index, sheet.kind);
                self.state.push(Undo::RemoveCss(sheet));
                Ok((abs.0 - target.0, abs.1 - target.1))
            }
            StrategyKind::Real => {
                self.save_origin();
                let base = self.viewport_origin((0.0, 0.0));
                host.scroll_to(target.0 - base.0, target.1 - base.1).await?;
                let metrics = host.metrics().await?;
                self.current = (metrics.scroll_x, metrics.scroll_y);
                let view = self.viewport_origin(self.current);
                log::debug!("[SCROLL] Tile {} scrolled to {},{}", tile.index, metrics.scroll_x, metrics.scroll_y);
                Ok((abs.0 - view.0, abs.1 - view.1))
            }
            StrategyKind::Native => Ok((0.0, 0.0)),
        }
    }

    /// Undo every page change made so far. Safe to call repeatedly and
    /// before anything was positioned.
    pub async fn restore<H: PageHost + ?Sized>(&mut self, host: &H) {
        self.state.restore(host).await;
        self.current = self.origin;
    }

    async fn reset<H: PageHost + ?Sized>(&mut self, host: &H) -> anyhow::Result<()> {
        if self.state.is_reset() {
            return Ok(());
        }
        self.state.mark_reset();
        self.save_origin();

        if self.style_injection {
            let hide_scrollbars =
                !self.kind.is_native() && self.scrollbar.width == 0 && self.scrollbar.height == 0;
            for sheet in [
                Stylesheet::reset(self.viewport, hide_scrollbars),
                Stylesheet::pause_animations(),
            ] {
                host.insert_css(&sheet).await?;
                self.state.push(Undo::RemoveCss(sheet));
            }
        }
        host.scroll_to(0.0, 0.0).await?;
        self.current = (0.0, 0.0);
        log::debug!("[SCROLL] Page reset for {} capture", self.kind);
        Ok(())
    }

    fn save_origin(&mut self) {
        let saved = self
            .state
            .pending()
            .iter()
            .any(|u| matches!(u, Undo::ScrollTo { .. }));
        if !saved {
            self.state.push(Undo::ScrollTo {
                x: self.origin.0,
                y: self.origin.1,
            });
        }
    }

    /// Absolute page coordinate of the viewport's top-left corner at the
    /// given scroll offsets.
    fn viewport_origin(&self, scroll: (f64, f64)) -> (f64, f64) {
        (
            axis_origin(self.direction.x, scroll.0, self.page.width, self.viewport.width),
            axis_origin(self.direction.y, scroll.1, self.page.height, self.viewport.height),
        )
    }
}

fn axis_origin(dir: AxisDirection, scroll: f64, page: u32, view: u32) -> f64 {
    match dir {
        AxisDirection::Forward => scroll,
        AxisDirection::Reverse => page as f64 - view as f64 + scroll,
    }
}

/// Where the viewport edge goes for a tile: flush with the tile's leading
/// edge, counted from the scroll origin's side.
fn target_edge(start: f64, len: u32, dir: AxisDirection, view: u32) -> f64 {
    match dir {
        AxisDirection::Forward => start,
        AxisDirection::Reverse => start + len as f64 - view as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{resolve, PageMetrics};
    use crate::platform::sim::SimulatedPage;
    use crate::platform::CapturePrimitive;
    use css::SheetKind;
    use image::{Rgba, RgbaImage};

    const CSS_ONLY: Capabilities = Capabilities {
        region_capture: false,
        region_capture_scaled: false,
        style_injection: true,
    };

    fn tile(index: usize, x: u32, y: u32, width: u32, height: u32) -> Tile {
        Tile {
            index,
            x,
            y,
            width,
            height,
        }
    }

    fn page(direction: Direction) -> SimulatedPage {
        SimulatedPage::new("t", RgbaImage::from_pixel(1000, 1500, Rgba([5, 5, 5, 255])), Size::new(800, 600))
            .with_direction(direction)
    }

    async fn request(page: &SimulatedPage, region: RegionKind) -> CaptureRequest {
        let metrics: PageMetrics = page.metrics().await.unwrap();
        let rect = resolve(&metrics, region, None).unwrap();
        CaptureRequest::new(&metrics, region, rect, 1.0, ImageFormat::Png, 90)
    }

    #[test]
    fn test_selection_policy() {
        let all = Capabilities {
            region_capture: true,
            region_capture_scaled: true,
            style_injection: true,
        };
        assert_eq!(StrategyKind::select(all, 2.0), StrategyKind::Native);

        let unscaled = Capabilities {
            region_capture_scaled: false,
            ..all
        };
        assert_eq!(StrategyKind::select(unscaled, 1.0), StrategyKind::Native);
        assert_eq!(StrategyKind::select(unscaled, 2.0), StrategyKind::Css);
        assert_eq!(StrategyKind::select(Capabilities::default(), 2.0), StrategyKind::Real);
        assert!(!StrategyKind::Css.is_supported(Capabilities::default(), 1.0));
    }

    #[tokio::test]
    async fn test_native_position_is_noop() {
        let page = page(Direction::default());
        let req = request(&page, RegionKind::Viewport).await;
        let mut strategy = ScrollStrategy::new(StrategyKind::Native, &req, page.capabilities());
        assert_eq!(strategy.position(&page, &tile(0, 0, 0, 800, 600)).await.unwrap(), (0.0, 0.0));
        assert!(page.active_sheets().is_empty());
    }

    #[test]
    fn test_native_rect_on_reverse_axis() {
        let metrics = PageMetrics {
            client_width: 800,
            client_height: 600,
            inner_width: 800,
            inner_height: 600,
            scroll_width: 1000,
            scroll_height: 600,
            direction: Direction {
                x: AxisDirection::Reverse,
                y: AxisDirection::Forward,
            },
            ..Default::default()
        };
        let rect = resolve(&metrics, RegionKind::Full, None).unwrap();
        let req = CaptureRequest::new(&metrics, RegionKind::Full, rect, 1.0, ImageFormat::Png, 90);
        let strategy = ScrollStrategy::new(StrategyKind::Native, &req, Capabilities::default());
        let native = strategy.native_rect(&tile(0, 0, 0, 1000, 600));
        assert_eq!((native.x, native.y), (-200, 0));
    }

    #[tokio::test]
    async fn test_css_shift_and_restore() {
        let page = page(Direction::default()).with_scroll(0.0, 321.5);
        let req = request(&page, RegionKind::Full).await;
        let mut strategy = ScrollStrategy::new(StrategyKind::Css, &req, CSS_ONLY);

        strategy.prepare(&page).await.unwrap();
        assert_eq!(page.scroll_position(), (0.0, 0.0));

        // First tile is visible after the reset.
        let off = strategy.position(&page, &tile(0, 0, 0, 800, 600)).await.unwrap();
        assert_eq!(off, (0.0, 0.0));
        assert_eq!(page.active_sheets().len(), 2);

        let off = strategy.position(&page, &tile(1, 800, 0, 200, 600)).await.unwrap();
        assert_eq!(off, (0.0, 0.0));
        let off = strategy.position(&page, &tile(3, 800, 600, 200, 600)).await.unwrap();
        assert_eq!(off, (0.0, 0.0));
        let sheets = page.active_sheets();
        assert_eq!(sheets.len(), 4);
        assert_eq!(sheets[3].kind, SheetKind::Shift { x: 800.0, y: 600.0 });

        strategy.restore(&page).await;
        assert!(page.active_sheets().is_empty());
        assert_eq!(page.scroll_position(), (0.0, 321.5));

        strategy.restore(&page).await;
        assert!(page.active_sheets().is_empty());
        assert_eq!(page.scroll_position(), (0.0, 321.5));
    }

    #[tokio::test]
    async fn test_css_right_to_left_aligns_tile_to_far_edge() {
        let rtl = Direction {
            x: AxisDirection::Reverse,
            y: AxisDirection::Forward,
        };
        let page = page(rtl);
        let req = request(&page, RegionKind::Full).await;
        let mut strategy = ScrollStrategy::new(StrategyKind::Css, &req, CSS_ONLY);
        strategy.prepare(&page).await.unwrap();

        // At scroll 0 an RTL viewport shows the right-hand 800px.
        let off = strategy.position(&page, &tile(0, 0, 0, 800, 600)).await.unwrap();
        assert_eq!(off, (0.0, 0.0));
        assert_eq!(page.active_sheets().last().unwrap().kind, SheetKind::Shift { x: -200.0, y: 0.0 });

        let off = strategy.position(&page, &tile(1, 800, 0, 200, 600)).await.unwrap();
        assert_eq!(off, (600.0, 0.0));
        assert_eq!(page.active_sheets().last().unwrap().kind, SheetKind::Shift { x: 0.0, y: 0.0 });
        strategy.restore(&page).await;
    }

    #[tokio::test]
    async fn test_visible_first_tile_touches_nothing() {
        let page = page(Direction::default()).with_scroll(0.0, 400.0);
        let req = request(&page, RegionKind::Viewport).await;
        let mut strategy = ScrollStrategy::new(StrategyKind::Css, &req, CSS_ONLY);
        strategy.prepare(&page).await.unwrap();

        let off = strategy.position(&page, &tile(0, 0, 0, 800, 600)).await.unwrap();
        assert_eq!(off, (0.0, 0.0));
        assert!(page.active_sheets().is_empty());
        assert_eq!(page.scroll_position(), (0.0, 400.0));
        assert!(strategy.state().pending().is_empty());
    }

    #[tokio::test]
    async fn test_real_scroll_offsets_follow_clamping() {
        let page = page(Direction::default()).with_scroll(0.0, 100.0);
        let req = request(&page, RegionKind::Full).await;
        let mut strategy = ScrollStrategy::new(StrategyKind::Real, &req, Capabilities::default());
        strategy.prepare(&page).await.unwrap();

        // The last row only has 300px left; the page cannot scroll past 900.
        let off = strategy.position(&page, &tile(4, 0, 1200, 800, 300)).await.unwrap();
        assert_eq!(off, (0.0, 300.0));
        assert_eq!(page.scroll_position(), (0.0, 900.0));
        assert!(page.active_sheets().is_empty());

        strategy.restore(&page).await;
        assert_eq!(page.scroll_position(), (0.0, 100.0));
    }
}
