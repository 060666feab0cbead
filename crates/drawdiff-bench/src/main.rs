//! drawdiff-bench: compare two drawing revisions from disk and report
//! per-stage diagnostics.
//!
//! Useful for:
//!
//! - Tuning the difference threshold, blur kernel, and morphology passes
//! - Checking how many features and inliers alignment finds on real scans
//! - Measuring per-stage durations to identify bottlenecks
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin drawdiff-bench -- [OPTIONS] <OLDER> <NEWER>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use drawdiff_pipeline::codec::encode_png;
use drawdiff_pipeline::{CompareConfig, PipelineDiagnostics, StdClock};

/// Drawing comparison diagnostics for drawdiff.
///
/// Runs the comparison pipeline on two images with configurable
/// parameters and prints per-stage timing, counts, and the detected
/// change regions.
#[derive(Parser)]
#[command(name = "drawdiff-bench", version)]
struct Cli {
    /// Older revision (reference frame).
    image_a: PathBuf,

    /// Newer revision (aligned onto the older one).
    image_b: PathBuf,

    /// Maximum keypoints per image.
    #[arg(long, default_value_t = CompareConfig::DEFAULT_MAX_FEATURES)]
    max_features: u32,

    /// Fraction of best matches kept for homography estimation.
    #[arg(long, default_value_t = CompareConfig::DEFAULT_GOOD_MATCH_PERCENT)]
    good_match_percent: f64,

    /// Intensity difference at which a pixel counts as changed.
    #[arg(long, default_value_t = CompareConfig::DEFAULT_DIFF_THRESHOLD)]
    diff_threshold: u8,

    /// Smallest region area kept, in pixels.
    #[arg(long, default_value_t = CompareConfig::DEFAULT_MIN_CONTOUR_AREA)]
    min_contour_area: f64,

    /// Side of the square blur kernel (odd; 1 disables blurring).
    #[arg(long, default_value_t = CompareConfig::DEFAULT_BLUR_KERNEL)]
    blur_kernel: u32,

    /// Dilation passes with a 3x3 element.
    #[arg(long, default_value_t = CompareConfig::DEFAULT_DILATE_ITERATIONS)]
    dilate_iterations: u8,

    /// Erosion passes with a 3x3 element.
    #[arg(long, default_value_t = CompareConfig::DEFAULT_ERODE_ITERATIONS)]
    erode_iterations: u8,

    /// Write the change mask PNG to this path.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Write the annotated visualization PNG to this path.
    #[arg(long)]
    visualization: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics and regions as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Pipeline overrides as a JSON object.
    ///
    /// When provided, all other pipeline parameter flags are ignored and
    /// missing keys take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build a [`CompareConfig`] from CLI arguments.
///
/// If `--config-json` is provided it is resolved against the defaults
/// and the individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<CompareConfig, String> {
    if let Some(ref json) = cli.config_json {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?;
        return drawdiff_pipeline::ConfigOverrides::from_json(value)
            .and_then(|o| o.resolve())
            .map_err(|e| format!("Error in --config-json: {e}"));
    }

    let config = CompareConfig {
        max_features: cli.max_features,
        good_match_percent: cli.good_match_percent,
        diff_threshold: cli.diff_threshold,
        min_contour_area: cli.min_contour_area,
        blur_kernel: cli.blur_kernel,
        dilate_iterations: cli.dilate_iterations,
        erode_iterations: cli.erode_iterations,
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn write_png(path: &Path, image: drawdiff_pipeline::types::DynamicImage) {
    match encode_png(&image).map(|png| std::fs::write(path, &png).map(|()| png.len())) {
        Ok(Ok(len)) => eprintln!("Wrote {} ({len} bytes)", path.display()),
        Ok(Err(e)) => eprintln!("Error writing {}: {e}", path.display()),
        Err(e) => eprintln!("Error encoding {}: {e}", path.display()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let (a, b) = match (read(&cli.image_a), read(&cli.image_b)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(msg), _) | (_, Err(msg)) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("A: {} ({} bytes)", cli.image_a.display(), a.len());
    eprintln!("B: {} ({} bytes)", cli.image_b.display(), b.len());
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (comparison, diagnostics) =
            match drawdiff_pipeline::try_compare_with_diagnostics(&a, &b, &config, &StdClock) {
                Ok(out) => out,
                Err(e) => {
                    eprintln!("Pipeline error: {e}");
                    return ExitCode::FAILURE;
                }
            };

        if cli.json {
            let doc = serde_json::json!({
                "diagnostics": diagnostics,
                "alignment": comparison.alignment.diagnostics,
                "regions": comparison.regions,
            });
            match serde_json::to_string_pretty(&doc) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", diagnostics.report());
            println!();
            for r in &comparison.regions {
                let p = r.pixel_coords;
                println!(
                    "#{:<3} {}x{} at ({}, {})  area={}px ({:.2}%)",
                    r.region_id, p.width, p.height, p.x, p.y, r.area_pixels, r.area_percent,
                );
            }
        }

        // Write images on the first run only.
        if run == 0 {
            if let Some(ref path) = cli.mask {
                write_png(
                    path,
                    drawdiff_pipeline::types::DynamicImage::ImageLuma8(comparison.difference.mask),
                );
            }
            if let Some(ref path) = cli.visualization {
                write_png(
                    path,
                    drawdiff_pipeline::types::DynamicImage::ImageRgb8(comparison.visualization),
                );
            }
        }

        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> std::time::Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<16} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(32));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Decode", |d| d.decode.duration),
        ("Align", |d| d.align.duration),
        ("Difference", |d| d.difference.duration),
        ("Regions", |d| d.regions.duration),
        ("Visualize", |d| d.visualize.duration),
    ];

    for (name, extractor) in stage_extractors {
        let stage_mean = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<16} {stage_mean:>10.3}ms");
    }
}
