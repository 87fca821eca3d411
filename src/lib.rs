//! Whole-page screenshots for hosts that can only capture what is on screen.
//!
//! A capture request is split into tiles no larger than the platform's canvas
//! limits. Each tile is brought on screen (by native region capture, a CSS
//! translate, or real scrolling), captured, and composited into one output
//! raster, which is then encoded as PNG or JPEG. The page is always put back
//! the way it was found.

pub mod assemble;
pub mod calibrate;
pub mod config;
pub mod encode;
pub mod error;
pub mod geometry;
pub mod lock;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod scroll;
pub mod session;
pub mod tiles;

pub use config::Config;
pub use encode::ImageFormat;
pub use error::{CaptureError, Result};
pub use geometry::{CaptureRequest, RegionKind};
pub use session::Capturer;
