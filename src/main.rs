//! KartenWarp - warp a real-world map onto a stylized game map
//!
//! Reads landmark pairs and warp settings from a TOML configuration file,
//! warps the real-world map image so its landmarks land on the game map's
//! landmarks, and writes the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kartenwarp::config::Config;
use kartenwarp::{AffineModel, Point2D, RasterImage, TpsWarp, Warper};

/// KartenWarp - landmark-driven map warping
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Real-world map image to warp (source)
    #[arg(short, long)]
    real: PathBuf,

    /// Game map image; its size becomes the output size
    #[arg(short, long)]
    game: Option<PathBuf>,

    /// Output width (overrides the game map size)
    #[arg(long)]
    width: Option<u32>,

    /// Output height (overrides the game map size)
    #[arg(long)]
    height: Option<u32>,

    /// Where to write the warped image
    #[arg(short, long, default_value = "warped.png")]
    output: PathBuf,

    /// Configuration file path
    #[arg(short, long, default_value = "kartenwarp.toml")]
    config: PathBuf,

    /// Regularization strength (overrides the config file)
    #[arg(short, long)]
    lambda: Option<f64>,

    /// Scale regularization by the landmark spread
    #[arg(short, long)]
    adaptive: bool,

    /// Write the fitted affine and spline models as JSON
    #[arg(long)]
    dump_models: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Fitted models, as written by `--dump-models`
#[derive(Serialize)]
struct ModelReport<'a> {
    affine: &'a AffineModel,
    tps: &'a TpsWarp,
    aligned_real_points: &'a [Point2D],
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!(
        "kartenwarp {}: warping {:?} -> {:?}",
        env!("CARGO_PKG_VERSION"),
        args.real,
        args.output
    );

    let mut config = Config::load_or_create(&args.config)?;
    if let Some(lambda) = args.lambda {
        config.tps.reg_lambda = lambda;
    }
    if args.adaptive {
        config.tps.adaptive = true;
    }
    config.validate()?;

    let real = image::open(&args.real)
        .with_context(|| format!("Failed to open real-world map {:?}", args.real))?;
    let source = RasterImage::from_dynamic(real);
    info!(
        "Real-world map: {}x{} ({} channels)",
        source.width(),
        source.height(),
        source.channels()
    );

    let output_size = resolve_output_size(&args)?;
    info!("Output size: {}x{}", output_size.0, output_size.1);

    let points = &config.correspondence;
    info!(
        "Landmarks: {} game, {} real; lambda = {}, adaptive = {}",
        points.game_points.len(),
        points.real_points.len(),
        config.tps.reg_lambda,
        config.tps.adaptive
    );

    let started = Instant::now();
    let warper = Warper::new(config.warp_options());
    let result = warper
        .run(&points.game_points, &points.real_points, &source, output_size)
        .context("Warp failed")?;
    info!("Warp computed in {:.2?}", started.elapsed());

    if let Some(path) = &args.dump_models {
        let report = ModelReport {
            affine: &result.affine,
            tps: &result.tps,
            aligned_real_points: &result.aligned_src,
        };
        write_report(path, &report)?;
    }

    result
        .image
        .into_dynamic()?
        .save(&args.output)
        .with_context(|| format!("Failed to write warped image to {:?}", args.output))?;
    info!("Saved warped map to {:?}", args.output);

    Ok(())
}

/// Output size from explicit flags, falling back to the game map's size
fn resolve_output_size(args: &Args) -> Result<(u32, u32)> {
    let game_size = match &args.game {
        Some(path) => {
            let (w, h) = image::image_dimensions(path)
                .with_context(|| format!("Failed to read game map {:?}", path))?;
            Some((w, h))
        }
        None => None,
    };

    match (args.width, args.height, game_size) {
        (Some(w), Some(h), _) => Ok((w, h)),
        (w, h, Some((gw, gh))) => Ok((w.unwrap_or(gw), h.unwrap_or(gh))),
        _ => bail!("Output size unknown: pass --game, or both --width and --height"),
    }
}

fn write_report(path: &Path, report: &ModelReport<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize models")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write models to {:?}", path))?;
    info!("Wrote fitted models to {:?}", path);
    Ok(())
}
