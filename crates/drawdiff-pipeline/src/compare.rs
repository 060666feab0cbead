//! End-to-end comparison of two drawing revisions.
//!
//! [`try_compare`] is the typed entry point: bytes in, in-memory rasters
//! and regions out, errors as [`PipelineError`]. [`compare`] wraps it for
//! transport: base64 inputs, a JSON override mapping, and a
//! [`ComparisonResult`] that is a success or a structured failure but
//! never an `Err` or a panic.

use std::panic::{AssertUnwindSafe, catch_unwind};

use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::align::{AlignmentDiagnostics, AlignmentOutcome, align};
use crate::codec;
use crate::config::{CompareConfig, ConfigOverrides};
use crate::diagnostics::{Clock, PipelineDiagnostics, StageDiagnostics, StageMetrics, StdClock};
use crate::difference::{Difference, difference, kernel_sigma};
use crate::regions::extract_regions;
use crate::types::{ChangeRegion, Dimensions, DynamicImage, PipelineError, RgbImage};
use crate::visualize::render;

/// Everything one comparison produces, before transport encoding.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Reference (first image) dimensions; all outputs share them.
    pub dimensions: Dimensions,
    pub alignment: AlignmentOutcome,
    pub difference: Difference,
    /// Ranked change regions, largest first.
    pub regions: Vec<ChangeRegion>,
    pub visualization: RgbImage,
    pub config: CompareConfig,
}

/// Serialized comparison result.
///
/// On failure only `success`, `error`, `regions` (empty) and
/// `region_count` (0) are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentDiagnostics>,
    pub regions: Vec<ChangeRegion>,
    pub region_count: usize,
    /// Binary change mask as a PNG data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_image: Option<String>,
    /// Annotated composite as a PNG data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
    /// Resolved configuration. Override keys the pipeline does not know
    /// are dropped, not echoed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_used: Option<CompareConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dimensions: Option<Dimensions>,
}

impl ComparisonResult {
    /// A failure result carrying `message`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            alignment: None,
            regions: Vec::new(),
            region_count: 0,
            diff_image: None,
            visualization: None,
            config_used: None,
            image_dimensions: None,
        }
    }

    /// Encode a finished comparison for transport.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ImageEncode`] if an output image cannot be
    /// PNG-encoded.
    pub fn from_comparison(comparison: Comparison) -> Result<Self, PipelineError> {
        let diff_image = codec::to_data_url(&DynamicImage::ImageLuma8(comparison.difference.mask))?;
        let visualization = codec::to_data_url(&DynamicImage::ImageRgb8(comparison.visualization))?;
        Ok(Self {
            success: true,
            error: None,
            alignment: Some(comparison.alignment.diagnostics),
            region_count: comparison.regions.len(),
            regions: comparison.regions,
            diff_image: Some(diff_image),
            visualization: Some(visualization),
            config_used: Some(comparison.config),
            image_dimensions: Some(comparison.dimensions),
        })
    }
}

struct Stopwatch<'a, C: Clock> {
    clock: &'a C,
    mark: C::Instant,
}

impl<'a, C: Clock> Stopwatch<'a, C> {
    fn start(clock: &'a C) -> Self {
        Self {
            clock,
            mark: clock.now(),
        }
    }

    /// Close the current stage and start the next.
    fn lap(&mut self, metrics: StageMetrics) -> StageDiagnostics {
        let duration = self.clock.elapsed(&self.mark);
        self.mark = self.clock.now();
        StageDiagnostics { duration, metrics }
    }
}

/// Decode both inputs; the second is resized to the first's dimensions
/// when they differ (aspect ratio is not preserved).
fn decode_pair(a: &[u8], b: &[u8]) -> Result<(RgbImage, RgbImage, bool), PipelineError> {
    let reference = codec::decode(a)?.to_rgb8();
    let other = codec::decode(b)?.to_rgb8();
    tracing::info!(
        a = %Dimensions::of(&reference),
        b = %Dimensions::of(&other),
        "images decoded"
    );

    if reference.dimensions() == other.dimensions() {
        return Ok((reference, other, false));
    }
    let (width, height) = reference.dimensions();
    tracing::info!(
        from = %Dimensions::of(&other),
        to = %Dimensions::of(&reference),
        "resizing second image to match the first"
    );
    let resized = imageops::resize(&other, width, height, FilterType::Triangle);
    Ok((reference, resized, true))
}

/// Run the whole pipeline on raw image bytes, timing each stage.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails validation,
/// and propagates decode errors for either input. Alignment failure is
/// not an error; it is reported in [`Comparison::alignment`].
pub fn try_compare_with_diagnostics<C: Clock>(
    a: &[u8],
    b: &[u8],
    config: &CompareConfig,
    clock: &C,
) -> Result<(Comparison, PipelineDiagnostics), PipelineError> {
    config.validate()?;
    let start = clock.now();
    let mut watch = Stopwatch::start(clock);

    let (reference, other, resized) = decode_pair(a, b)?;
    let dimensions = Dimensions::of(&reference);
    let decode = watch.lap(StageMetrics::Decode {
        input_bytes: [a.len(), b.len()],
        width: dimensions.width,
        height: dimensions.height,
        resized,
    });

    tracing::info!("aligning images");
    let alignment = align(&reference, &other, config);
    let d = &alignment.diagnostics;
    let align_stage = watch.lap(StageMetrics::Align {
        success: d.success,
        features: [d.total_features_ref, d.total_features_align],
        matches: d.total_matches,
        good_matches: d.good_matches,
        inliers: d.inliers,
    });

    tracing::info!("computing difference");
    let difference = difference(&reference, &alignment.aligned, config)?;
    let difference_stage = watch.lap(StageMetrics::Difference {
        sigma: kernel_sigma(config.blur_kernel),
        changed_pixels: crate::diagnostics::count_changed(&difference.mask),
        total_pixels: dimensions.pixel_count(),
    });

    let regions = extract_regions(&difference.mask, dimensions, config);
    tracing::info!(count = regions.len(), "change regions found");
    let regions_stage = watch.lap(StageMetrics::Regions {
        region_count: regions.len(),
        largest_area: regions.first().map_or(0, |r| r.area_pixels),
    });

    let visualization = render(&alignment.aligned, &difference.mask, &regions);
    let visualize_stage = watch.lap(StageMetrics::Visualize {
        region_count: regions.len(),
    });

    let diagnostics = PipelineDiagnostics {
        decode,
        align: align_stage,
        difference: difference_stage,
        regions: regions_stage,
        visualize: visualize_stage,
        total_duration: clock.elapsed(&start),
    };

    Ok((
        Comparison {
            dimensions,
            alignment,
            difference,
            regions,
            visualization,
            config: *config,
        },
        diagnostics,
    ))
}

/// Run the whole pipeline on raw image bytes.
///
/// # Errors
///
/// See [`try_compare_with_diagnostics`].
pub fn try_compare(
    a: &[u8],
    b: &[u8],
    config: &CompareConfig,
) -> Result<Comparison, PipelineError> {
    try_compare_with_diagnostics(a, b, config, &StdClock).map(|(comparison, _)| comparison)
}

fn run_transport<C: Clock>(
    image_a: &str,
    image_b: &str,
    overrides: serde_json::Value,
    clock: &C,
) -> Result<(ComparisonResult, PipelineDiagnostics), PipelineError> {
    let config = ConfigOverrides::from_json(overrides)?.resolve()?;
    let a = codec::decode_base64(image_a)?;
    let b = codec::decode_base64(image_b)?;
    let (comparison, diagnostics) = try_compare_with_diagnostics(&a, &b, &config, clock)?;
    Ok((ComparisonResult::from_comparison(comparison)?, diagnostics))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "comparison panicked".to_owned())
}

/// Like [`compare`], also returning per-stage diagnostics when the
/// comparison ran to completion.
#[must_use]
pub fn compare_with_diagnostics<C: Clock>(
    image_a: &str,
    image_b: &str,
    overrides: serde_json::Value,
    clock: &C,
) -> (ComparisonResult, Option<PipelineDiagnostics>) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run_transport(image_a, image_b, overrides, clock)
    }));
    match outcome {
        Ok(Ok((result, diagnostics))) => (result, Some(diagnostics)),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "comparison failed");
            (ComparisonResult::failure(e.to_string()), None)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(error = %message, "comparison panicked");
            (ComparisonResult::failure(message), None)
        }
    }
}

/// Compare two transport-encoded images (base64, optionally as data URLs)
/// under a JSON override mapping (`null` for defaults).
///
/// Never fails: decode errors, invalid configuration, and panics inside
/// the pipeline all become a `success: false` result.
#[must_use]
pub fn compare(image_a: &str, image_b: &str, overrides: serde_json::Value) -> ComparisonResult {
    compare_with_diagnostics(image_a, image_b, overrides, &StdClock).0
}
