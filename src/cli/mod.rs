use clap::{Args, Parser, Subcommand, ValueEnum};

use pageshot::encode::ImageFormat;
use pageshot::geometry::{RegionKind, SelectionRect, Size};
use pageshot::platform::Capabilities;
use pageshot::scroll::StrategyKind;

#[derive(Parser)]
#[command(name = "pageshot")]
#[command(about = "📸 Whole-page screenshots, tiled and stitched", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log debug output (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON config file overriding the built-in limits
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a page, using an image as the page's rendered content
    Capture(CaptureArgs),

    /// Print the tile plan for a capture area
    Plan(PlanArgs),
}

#[derive(Args)]
pub struct CaptureArgs {
    /// Image to load as the page document (CSS pixels)
    #[arg(short, long)]
    pub page: String,

    /// Visible viewport, scrollbars excluded
    #[arg(long, default_value = "1280x800", value_parser = parse_size)]
    pub viewport: Size,

    /// Scrollbar thickness, vertical x horizontal
    #[arg(long, default_value = "0x0", value_parser = parse_size)]
    pub scrollbar: Size,

    /// Initial scroll offsets
    #[arg(long, default_value = "0,0", value_parser = parse_point, allow_hyphen_values = true)]
    pub scroll: (f64, f64),

    /// Right-to-left page (horizontal scroll origin on the right)
    #[arg(long)]
    pub rtl: bool,

    /// Bottom-to-top page (vertical scroll origin at the bottom)
    #[arg(long)]
    pub btt: bool,

    /// Device pixel ratio the page reports
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Ratio the page actually renders at (defaults to --scale)
    #[arg(long)]
    pub real_scale: Option<f64>,

    /// What to capture
    #[arg(short, long, value_enum, default_value_t = Region::Full)]
    pub region: Region,

    /// Selection for --region selection, as X,Y,W,H in viewport pixels
    #[arg(long, value_parser = parse_rect)]
    pub select: Option<SelectionRect>,

    #[arg(short, long, value_enum, default_value_t = Format::Png)]
    pub format: Format,

    /// JPEG quality (1-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// What the simulated browser's capture API supports
    #[arg(long, value_enum, default_value_t = Platform::Full)]
    pub platform: Platform,

    /// Force a scroll strategy
    #[arg(long, value_enum, default_value_t = Strategy::Auto)]
    pub strategy: Strategy,

    /// Output file, or a directory to save into
    #[arg(short, long)]
    pub output: String,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Capture width in CSS pixels
    #[arg(long)]
    pub width: u32,

    /// Capture height in CSS pixels
    #[arg(long)]
    pub height: u32,

    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Viewport bounding scroll-based tiles
    #[arg(long, default_value = "1280x800", value_parser = parse_size)]
    pub viewport: Size,

    /// Plan for scroll-based capture instead of native region capture
    #[arg(long)]
    pub scroll_based: bool,

    #[arg(short, long, value_enum, default_value_t = Format::Png)]
    pub format: Format,

    /// Print the plan and its tiles as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Region {
    Full,
    Viewport,
    Selection,
}

impl From<Region> for RegionKind {
    fn from(region: Region) -> Self {
        match region {
            Region::Full => RegionKind::Full,
            Region::Viewport => RegionKind::Viewport,
            Region::Selection => RegionKind::Selection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Png,
    #[value(alias = "jpeg")]
    Jpg,
}

impl From<Format> for ImageFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => ImageFormat::Png,
            Format::Jpg => ImageFormat::Jpeg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    Auto,
    Native,
    Css,
    Scroll,
}

impl Strategy {
    pub fn kind(self) -> Option<StrategyKind> {
        match self {
            Strategy::Auto => None,
            Strategy::Native => Some(StrategyKind::Native),
            Strategy::Css => Some(StrategyKind::Css),
            Strategy::Scroll => Some(StrategyKind::Real),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    /// Region capture at any scale, plus user stylesheets
    Full,
    /// Region capture at scale 1 only, plus user stylesheets
    Unscaled,
    /// Whole-viewport capture and user stylesheets
    Styles,
    /// Whole-viewport capture only
    Basic,
}

impl Platform {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Platform::Full => Capabilities {
                region_capture: true,
                region_capture_scaled: true,
                style_injection: true,
            },
            Platform::Unscaled => Capabilities {
                region_capture: true,
                region_capture_scaled: false,
                style_injection: true,
            },
            Platform::Styles => Capabilities {
                style_injection: true,
                ..Default::default()
            },
            Platform::Basic => Capabilities::default(),
        }
    }
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w.trim().parse().map_err(|e| format!("bad width '{}': {}", w, e))?;
    let height = h.trim().parse().map_err(|e| format!("bad height '{}': {}", h, e))?;
    Ok(Size::new(width, height))
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let x = x.trim().parse().map_err(|e| format!("bad x '{}': {}", x, e))?;
    let y = y.trim().parse().map_err(|e| format!("bad y '{}': {}", y, e))?;
    Ok((x, y))
}

fn parse_rect(s: &str) -> Result<SelectionRect, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("bad number '{}': {}", p, e)))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [left, top, width, height] if *width > 0.0 && *height > 0.0 => Ok(SelectionRect {
            left: *left,
            top: *top,
            width: *width,
            height: *height,
        }),
        [_, _, _, _] => Err("selection must have a non-zero size".to_string()),
        _ => Err(format!("expected X,Y,W,H, got '{}'", s)),
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_size("800x600").unwrap(), Size::new(800, 600));
        assert!(parse_size("800").is_err());
        assert_eq!(parse_point("-10,2.5").unwrap(), (-10.0, 2.5));
        let sel = parse_rect("1,2,30,40").unwrap();
        assert_eq!((sel.left, sel.width), (1.0, 30.0));
        assert!(parse_rect("1,2,0,40").is_err());
        assert!(parse_rect("1,2,3").is_err());
    }

    #[test]
    fn test_capture_command_parses() {
        let cli = Cli::try_parse_from([
            "pageshot", "capture", "--page", "doc.png", "--viewport", "640x480", "--rtl", "--format", "jpeg",
            "--strategy", "scroll", "-o", "out.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Capture(args) => {
                assert_eq!(args.viewport, Size::new(640, 480));
                assert!(args.rtl);
                assert!(!args.btt);
                assert_eq!(ImageFormat::from(args.format), ImageFormat::Jpeg);
                assert_eq!(args.strategy.kind(), Some(StrategyKind::Real));
            }
            _ => panic!("expected capture"),
        }
    }

    #[test]
    fn test_quality_out_of_range_rejected() {
        let res = Cli::try_parse_from([
            "pageshot", "capture", "--page", "doc.png", "-q", "0", "-o", "out.jpg",
        ]);
        assert!(res.is_err());
    }
}
