//! Integration tests for whole capture sessions against a simulated page.
//!
//! Each test builds a page from a synthetic document, runs a session through
//! `Capturer`, decodes the result and compares it with the document.

use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use pageshot::config::Config;
use pageshot::encode::ImageFormat;
use pageshot::error::CaptureError;
use pageshot::geometry::{AxisDirection, Direction, RegionKind, Size};
use pageshot::lock::{target_key, LockTable};
use pageshot::platform::sim::SimulatedPage;
use pageshot::platform::{Capabilities, RegionSelector};
use pageshot::progress::{Notice, Progress, ProgressSender};
use pageshot::scroll::css::RootStyle;
use pageshot::scroll::StrategyKind;
use pageshot::session::Capturer;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const YELLOW: Rgba<u8> = Rgba([255, 255, 0, 255]);

/// Four solid quadrants.
fn quadrants(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| match (x < width / 2, y < height / 2) {
        (true, true) => RED,
        (false, true) => GREEN,
        (true, false) => BLUE,
        (false, false) => YELLOW,
    })
}

/// Every pixel distinct enough to catch off-by-one placement.
fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x / 256 + y / 256) * 40 % 256) as u8, 255])
    })
}

fn config_with_tiles(width: u32, height: u32) -> Config {
    let mut config = Config::default();
    config.limits.native_tile_width = width;
    config.limits.native_tile_height = height;
    config
}

fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Progress>) -> Vec<Progress> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn capture_full(capturer: &Capturer, page: &SimulatedPage) -> Result<Vec<u8>, CaptureError> {
    capturer
        .capture_region(page, RegionKind::Full, None, ImageFormat::Png, None, &ProgressSender::none())
        .await
}

#[tokio::test]
async fn test_native_quadrants_have_clean_seams() {
    let page = SimulatedPage::new("tab-quad", quadrants(400, 300), Size::new(100, 80));
    let capturer = Capturer::new(config_with_tiles(200, 150), Arc::new(LockTable::new()));
    let (progress, mut rx) = ProgressSender::channel();

    let png = capturer
        .capture_region(&page, RegionKind::Full, None, ImageFormat::Png, None, &progress)
        .await
        .unwrap();
    let img = decode(&png);
    eprintln!("[TEST] {}x{} from {} captures", img.width(), img.height(), page.capture_count());

    assert_eq!(img.dimensions(), (400, 300));
    for (x, y, want) in [
        (0, 0, RED),
        (199, 149, RED),
        (200, 0, GREEN),
        (399, 149, GREEN),
        (0, 150, BLUE),
        (199, 299, BLUE),
        (200, 150, YELLOW),
        (399, 299, YELLOW),
    ] {
        assert_eq!(img.get_pixel(x, y), &want, "pixel {},{}", x, y);
    }
    // One calibration capture plus one per tile.
    assert_eq!(page.capture_count(), 5);

    let events = drain(&mut rx);
    let countdown: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Progress::Capturing { remaining } => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(countdown, vec![4, 3, 2, 1]);
    assert_eq!(events.last(), Some(&Progress::Idle));
}

#[tokio::test]
async fn test_css_strategy_reproduces_document() {
    let doc = gradient(250, 170);
    let page = SimulatedPage::new("tab-css", doc.clone(), Size::new(100, 80))
        .with_scrollbar(Size::new(10, 10))
        .with_scroll(37.0, 12.0)
        .with_capabilities(Capabilities {
            style_injection: true,
            ..Default::default()
        });
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img, doc);
    assert!(page.active_sheets().is_empty());
    assert_eq!(page.scroll_position(), (37.0, 12.0));
}

#[tokio::test]
async fn test_real_scroll_reproduces_document() {
    let doc = gradient(250, 170);
    let page = SimulatedPage::new("tab-scroll", doc.clone(), Size::new(100, 80))
        .with_scrollbar(Size::new(10, 10))
        .with_scroll(5.0, 60.0)
        .with_capabilities(Capabilities::default());
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img, doc);
    assert_eq!(page.scroll_position(), (5.0, 60.0));
}

#[tokio::test]
async fn test_right_to_left_page_with_css_shift() {
    let doc = gradient(250, 120);
    let page = SimulatedPage::new("tab-rtl", doc.clone(), Size::new(100, 80))
        .with_direction(Direction {
            x: AxisDirection::Reverse,
            y: AxisDirection::Forward,
        })
        .with_scroll(-40.0, 0.0);
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()))
        .with_strategy(Some(StrategyKind::Css));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img, doc);
    assert!(page.active_sheets().is_empty());
    assert_eq!(page.scroll_position(), (-40.0, 0.0));
}

#[tokio::test]
async fn test_second_request_on_busy_target_is_dropped() {
    let page = SimulatedPage::new("tab-busy", quadrants(120, 90), Size::new(120, 90))
        .with_capture_delay(Duration::from_millis(20));
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let (first, second) = tokio::join!(capture_full(&capturer, &page), capture_full(&capturer, &page));
    assert!(first.is_ok());
    let err = second.unwrap_err();
    assert!(matches!(err, CaptureError::LockBusy(_)));
    assert!(!err.is_fatal());
    // Calibration and a single tile, all from the first session.
    assert_eq!(page.capture_count(), 2);
    assert!(!capturer.locks().is_locked(&target_key("tab-busy")));
}

#[tokio::test]
async fn test_different_targets_capture_concurrently() {
    let a = SimulatedPage::new("tab-a", quadrants(120, 90), Size::new(60, 40))
        .with_capture_delay(Duration::from_millis(5));
    let b = SimulatedPage::new("tab-b", gradient(90, 70), Size::new(60, 40))
        .with_capture_delay(Duration::from_millis(5));
    let capturer = Capturer::new(config_with_tiles(50, 50), Arc::new(LockTable::new()));

    let (ra, rb) = tokio::join!(capture_full(&capturer, &a), capture_full(&capturer, &b));
    assert_eq!(decode(&ra.unwrap()), quadrants(120, 90));
    assert_eq!(decode(&rb.unwrap()), gradient(90, 70));
}

#[tokio::test]
async fn test_oversized_output_goes_through_raw_buffer() {
    let mut config = config_with_tiles(200, 150);
    config.limits.max_area = 10_000;
    let page = SimulatedPage::new("tab-raw", quadrants(400, 300), Size::new(100, 80));
    let capturer = Capturer::new(config, Arc::new(LockTable::new()));
    let (progress, mut rx) = ProgressSender::channel();

    let png = capturer
        .capture_region(&page, RegionKind::Full, None, ImageFormat::Png, None, &progress)
        .await
        .unwrap();
    assert_eq!(decode(&png), quadrants(400, 300));

    let events = drain(&mut rx);
    assert!(events.contains(&Progress::Notice(Notice::VeryLargeImage)));
    let saving = events.iter().position(|e| *e == Progress::Saving).unwrap();
    assert_eq!(events.last(), Some(&Progress::Idle));
    assert!(saving < events.len() - 1);
}

#[tokio::test]
async fn test_capture_failure_restores_page_and_releases_lock() {
    let page = SimulatedPage::new("tab-fail", gradient(250, 170), Size::new(100, 80))
        .with_scroll(20.0, 30.0)
        .with_capabilities(Capabilities {
            style_injection: true,
            ..Default::default()
        })
        .fail_capture(3);
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let err = capture_full(&capturer, &page).await.unwrap_err();
    eprintln!("[TEST] failed with: {}", err);
    assert!(matches!(err, CaptureError::CaptureCall { .. }));
    assert!(err.is_fatal());
    assert!(page.active_sheets().is_empty());
    assert_eq!(page.scroll_position(), (20.0, 30.0));
    assert!(!capturer.locks().is_locked(&target_key("tab-fail")));

    // The target is usable again straight away.
    let retry = SimulatedPage::new("tab-fail", gradient(250, 170), Size::new(100, 80));
    assert!(capture_full(&capturer, &retry).await.is_ok());
}

#[tokio::test]
async fn test_misreported_pixel_ratio_is_corrected() {
    // Reports 2x but renders at 1.5x.
    let page = SimulatedPage::new("tab-dpr", quadrants(200, 160), Size::new(100, 80)).with_scale(2.0, 1.5);
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img.dimensions(), (300, 240));
    assert_eq!(img.get_pixel(10, 10), &RED);
    assert_eq!(img.get_pixel(290, 230), &YELLOW);
}

#[tokio::test]
async fn test_selection_region() {
    let doc = gradient(300, 200);
    let page = SimulatedPage::new("tab-sel", doc.clone(), Size::new(120, 100))
        .with_scroll(50.0, 40.0)
        .with_selection(Some(pageshot::geometry::SelectionRect {
            left: 10.0,
            top: 20.0,
            width: 30.0,
            height: 25.0,
        }));
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let png = capturer
        .capture_region(
            &page,
            RegionKind::Selection,
            Some(&page as &dyn RegionSelector),
            ImageFormat::Png,
            None,
            &ProgressSender::none(),
        )
        .await
        .unwrap();
    let img = decode(&png);
    assert_eq!(img.dimensions(), (30, 25));
    assert_eq!(img.get_pixel(0, 0), doc.get_pixel(60, 60));
    assert_eq!(img.get_pixel(29, 24), doc.get_pixel(89, 84));
}

fn reversed(x: bool, y: bool) -> Direction {
    let axis = |r| if r { AxisDirection::Reverse } else { AxisDirection::Forward };
    Direction { x: axis(x), y: axis(y) }
}

#[tokio::test]
async fn test_bottom_to_top_real_scroll() {
    let doc = gradient(230, 190);
    let page = SimulatedPage::new("tab-btt", doc.clone(), Size::new(100, 80))
        .with_scrollbar(Size::new(10, 10))
        .with_direction(reversed(false, true))
        .with_scroll(20.0, -35.0)
        .with_capabilities(Capabilities::default());
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img, doc);
    assert_eq!(page.scroll_position(), (20.0, -35.0));
}

#[tokio::test]
async fn test_reversed_axes_under_every_strategy() {
    let doc = gradient(250, 170);
    for (kind, caps) in [
        (
            StrategyKind::Native,
            Capabilities {
                region_capture: true,
                region_capture_scaled: true,
                style_injection: true,
            },
        ),
        (
            StrategyKind::Css,
            Capabilities {
                style_injection: true,
                ..Default::default()
            },
        ),
        (StrategyKind::Real, Capabilities::default()),
    ] {
        let page = SimulatedPage::new("tab-rev", doc.clone(), Size::new(100, 80))
            .with_direction(reversed(true, true))
            .with_scroll(-60.0, -25.0)
            .with_capabilities(caps);
        let capturer =
            Capturer::new(config_with_tiles(120, 70), Arc::new(LockTable::new())).with_strategy(Some(kind));

        let img = decode(&capture_full(&capturer, &page).await.unwrap());
        eprintln!("[TEST] {} capture of a reversed page: {}x{}", kind, img.width(), img.height());
        assert_eq!(img, doc, "{} capture", kind);
        assert!(page.active_sheets().is_empty());
        assert_eq!(page.scroll_position(), (-60.0, -25.0));
    }
}

#[tokio::test]
async fn test_css_capture_at_double_scale() {
    let doc = gradient(250, 170);
    let page = SimulatedPage::new("tab-2x", doc.clone(), Size::new(100, 80))
        .with_scrollbar(Size::new(10, 10))
        .with_scale(2.0, 2.0)
        .with_capabilities(Capabilities {
            style_injection: true,
            ..Default::default()
        });
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img.dimensions(), (500, 340));
    for y in 0..340 {
        for x in 0..500 {
            assert_eq!(img.get_pixel(x, y), doc.get_pixel(x / 2, y / 2), "pixel {},{}", x, y);
        }
    }
}

#[tokio::test]
async fn test_css_capture_without_individual_translate() {
    let doc = gradient(250, 170);
    let legacy = RootStyle {
        translate: None,
        transform: "matrix(1, 0, 0, 1, 0, 0)".to_string(),
        ..Default::default()
    };
    let page = SimulatedPage::new("tab-legacy", doc.clone(), Size::new(100, 80))
        .with_direction(reversed(true, false))
        .with_root_style(legacy)
        .with_capabilities(Capabilities {
            style_injection: true,
            ..Default::default()
        });
    let capturer = Capturer::new(Config::default(), Arc::new(LockTable::new()));

    let img = decode(&capture_full(&capturer, &page).await.unwrap());
    assert_eq!(img, doc);
    assert!(page.active_sheets().is_empty());
}
