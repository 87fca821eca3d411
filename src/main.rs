mod cli;

use anyhow::{Context, Result};
use chrono::Local;
use cli::{CaptureArgs, Cli, Commands, PlanArgs};
use pageshot::config::Config;
use pageshot::encode::ImageFormat;
use pageshot::geometry::{AxisDirection, Direction, Size};
use pageshot::lock::LockTable;
use pageshot::platform::sim::SimulatedPage;
use pageshot::platform::sink::FileSink;
use pageshot::platform::{OutputSink, RegionSelector};
use pageshot::progress::{Notice, Progress, ProgressSender};
use pageshot::session::{default_filename, Capturer};
use pageshot::tiles::TilePlan;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => {
            let path = expand_path(path);
            Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => Config::default(),
    };

    match cli.command {
        Commands::Capture(args) => capture(config, args).await?,
        Commands::Plan(args) => plan(&config, args)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

async fn capture(config: Config, args: CaptureArgs) -> Result<()> {
    let page_path = expand_path(&args.page);
    println!("🖼️  Loading page from: {}", page_path.display());
    let document = image::open(&page_path)
        .with_context(|| format!("Failed to open page image {}", page_path.display()))?
        .to_rgba8();

    let direction = Direction {
        x: if args.rtl { AxisDirection::Reverse } else { AxisDirection::Forward },
        y: if args.btt { AxisDirection::Reverse } else { AxisDirection::Forward },
    };
    let page = SimulatedPage::new("cli", document, args.viewport)
        .with_scrollbar(args.scrollbar)
        .with_direction(direction)
        .with_scale(args.scale, args.real_scale.unwrap_or(args.scale))
        .with_capabilities(args.platform.capabilities())
        .with_selection(args.select)
        .with_scroll(args.scroll.0, args.scroll.1);

    let format = ImageFormat::from(args.format);
    let capturer = Capturer::new(config, Arc::new(LockTable::new())).with_strategy(args.strategy.kind());

    let (progress, mut events) = ProgressSender::channel();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            report(event);
        }
    });

    println!("📸 Capturing {:?} region...", args.region);
    let result = capturer
        .capture_region(
            &page,
            args.region.into(),
            Some(&page as &dyn RegionSelector),
            format,
            args.quality,
            &progress,
        )
        .await;
    drop(progress);
    let _ = reporter.await;

    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) if !e.is_fatal() => {
            println!("⚠️  Nothing captured: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e).context("Capture failed"),
    };

    let sink = FileSink::new(expand_path(&args.output));
    let filename = default_filename(format, Local::now());
    sink.deliver(&bytes, &filename).await?;
    println!("✅ Saved {} ({} bytes) to: {}", format.mime_type(), bytes.len(), sink.destination(&filename).display());

    Ok(())
}

fn report(event: Progress) {
    match event {
        Progress::Capturing { remaining } => println!("⏳ {} tile(s) left", remaining),
        Progress::Saving => println!("💾 Encoding..."),
        Progress::Notice(Notice::VeryLargeImage) => {
            println!("⚠️  Very large image: this may take a while")
        }
        Progress::Notice(Notice::EncoderBusy) => println!("⏸️  Waiting for another capture to finish encoding"),
        Progress::Idle => {}
    }
}

fn plan(config: &Config, args: PlanArgs) -> Result<()> {
    let plan = TilePlan::new(
        Size::new(args.width, args.height),
        args.scale,
        &config.limits,
        !args.scroll_based,
        args.viewport,
        args.format.into(),
    )
    .context("Cannot plan this capture")?;

    if args.json {
        let tiles: Vec<_> = plan.tiles().collect();
        let out = serde_json::json!({ "plan": plan, "tiles": tiles });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("📐 {}x{} CSS px at {}x", plan.area.width, plan.area.height, plan.scale);
    println!("   Output:   {}x{} device px ({:?})", plan.output.width, plan.output.height, plan.raster);
    println!(
        "   Tiles:    {} ({} x {}) of up to {}x{}",
        plan.tile_count(),
        plan.columns(),
        plan.rows(),
        plan.max_tile.width,
        plan.max_tile.height
    );
    for tile in plan.tiles() {
        println!("   #{:<4} {:>6},{:<6} {}x{}", tile.index, tile.x, tile.y, tile.width, tile.height);
    }

    Ok(())
}

fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut buf = PathBuf::from(home);
            buf.push(stripped);
            return buf;
        }
    }
    PathBuf::from(path)
}
