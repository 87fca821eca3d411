//! Collaborators the capture engine drives but does not own: the page, the
//! platform's capture primitive, the selection UI and the output sink.
//!
//! Everything here is I/O-facing and reports failures as `anyhow::Error`;
//! the session maps them into [`crate::error::CaptureError`] with context.

pub mod sim;
pub mod sink;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::encode::ImageFormat;
use crate::geometry::{PageMetrics, SelectionRect};
use crate::scroll::css::{RootStyle, Stylesheet};

/// What the capture primitive can do on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Capture accepts an arbitrary page rectangle.
    pub region_capture: bool,
    /// Region capture also honours an explicit scale.
    pub region_capture_scaled: bool,
    /// User stylesheets can be inserted into and removed from the page.
    pub style_injection: bool,
}

/// Rectangle handed to a region capture, in the page's scroll coordinates.
/// On a reverse axis the origin sits at the scroll origin, so `x`/`y` may be
/// negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CaptureCall {
    /// Capture `rect` at `scale` device pixels per CSS pixel.
    Region {
        rect: NativeRect,
        scale: f64,
        format: ImageFormat,
        quality: u8,
    },
    /// Capture whatever the viewport currently shows, scrollbars included.
    Viewport { format: ImageFormat, quality: u8 },
}

impl CaptureCall {
    pub fn format(&self) -> ImageFormat {
        match self {
            CaptureCall::Region { format, .. } | CaptureCall::Viewport { format, .. } => *format,
        }
    }
}

/// An encoded image as the platform returned it.
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Bytes(Vec<u8>),
    /// `data:image/...;base64,...`
    DataUrl(String),
}

impl Captured {
    pub fn into_bytes(self) -> anyhow::Result<Vec<u8>> {
        match self {
            Captured::Bytes(bytes) => Ok(bytes),
            Captured::DataUrl(url) => decode_data_url(&url),
        }
    }
}

fn decode_data_url(url: &str) -> anyhow::Result<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URL has no payload"))?;
    if !meta.ends_with(";base64") {
        return Err(anyhow!("data URL is not base64 encoded ({})", meta));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("invalid base64 in data URL")
}

/// Encode bytes as a data URL the way browsers hand captures back.
pub fn data_url(format: ImageFormat, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        format.mime_type(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// The live page being captured.
#[async_trait]
pub trait PageHost: Send + Sync {
    async fn metrics(&self) -> anyhow::Result<PageMetrics>;

    /// Device pixel ratio as the page reports it.
    async fn device_pixel_ratio(&self) -> anyhow::Result<f64>;

    /// Computed style of the root element.
    async fn root_style(&self) -> anyhow::Result<RootStyle>;

    async fn insert_css(&self, sheet: &Stylesheet) -> anyhow::Result<()>;

    async fn remove_css(&self, sheet: &Stylesheet) -> anyhow::Result<()>;

    /// Scroll the window. The page clamps out-of-range offsets.
    async fn scroll_to(&self, x: f64, y: f64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CapturePrimitive: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn capture(&self, call: &CaptureCall) -> anyhow::Result<Captured>;
}

/// A page that can also be captured; one per browser tab.
pub trait Target: PageHost + CapturePrimitive {
    /// Identity used for the per-target capture lock.
    fn id(&self) -> String;
}

/// Interactive drag-select. `None` means the user cancelled.
#[async_trait]
pub trait RegionSelector: Send + Sync {
    async fn select(&self) -> anyhow::Result<Option<SelectionRect>>;
}

/// Where finished images go.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn deliver(&self, bytes: &[u8], filename: &str) -> anyhow::Result<()>;
}
