//! Per-stage timing and counts for a comparison run.
//!
//! Collected by [`compare_with_diagnostics`](crate::compare_with_diagnostics)
//! for parameter tuning and benchmarking. Time is read through the
//! [`Clock`] trait so callers (and tests) can substitute their own source.
//!
//! Durations are serialized as fractional seconds (`f64`), since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source of monotonic time.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn elapsed(&self, since: &Self::Instant) -> Duration {
        since.elapsed()
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Decoding both inputs (and resizing the second, if needed).
    pub decode: StageDiagnostics,
    /// Feature detection, matching, homography, warp.
    pub align: StageDiagnostics,
    /// Blur, absolute difference, threshold, morphology.
    pub difference: StageDiagnostics,
    /// Border following and region measurement.
    pub regions: StageDiagnostics,
    /// Overlay rendering.
    pub visualize: StageDiagnostics,
    /// Total wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// One stage's duration and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub metrics: StageMetrics,
}

/// Stage-specific counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    Decode {
        /// Encoded sizes of the two inputs.
        input_bytes: [usize; 2],
        width: u32,
        height: u32,
        /// Whether the second image was resized to the first's dimensions.
        resized: bool,
    },
    Align {
        success: bool,
        features: [usize; 2],
        matches: usize,
        good_matches: usize,
        inliers: usize,
    },
    Difference {
        sigma: Option<f32>,
        changed_pixels: u64,
        total_pixels: u64,
    },
    Regions {
        region_count: usize,
        largest_area: u64,
    },
    Visualize {
        region_count: usize,
    },
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Comparison Diagnostics Report\n{}", "=".repeat(60)));
        if let StageMetrics::Decode { width, height, .. } = self.decode.metrics {
            lines.push(format!("Image: {width}x{height}"));
        }
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in [
            ("Decode", &self.decode),
            ("Align", &self.align),
            ("Difference", &self.difference),
            ("Regions", &self.regions),
            ("Visualize", &self.visualize),
        ] {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes: [a, b],
            width,
            height,
            resized,
        } => {
            let note = if *resized { " (second resized)" } else { "" };
            format!("{a}+{b} bytes -> {width}x{height}{note}")
        }
        StageMetrics::Align {
            success,
            features: [fa, fb],
            matches,
            good_matches,
            inliers,
        } => {
            let status = if *success { "ok" } else { "FAILED" };
            format!(
                "{status} features={fa}/{fb} matches={matches} good={good_matches} inliers={inliers}"
            )
        }
        StageMetrics::Difference {
            sigma,
            changed_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixels > 0 {
                *changed_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            let sigma = sigma.map_or_else(|| "none".to_owned(), |s| format!("{s:.2}"));
            format!("sigma={sigma} changed={changed_pixels} ({density:.2}%)")
        }
        StageMetrics::Regions {
            region_count,
            largest_area,
        } => format!("{region_count} regions, largest={largest_area}px"),
        StageMetrics::Visualize { region_count } => format!("{region_count} boxes"),
    }
}

/// Count mask pixels set to 255.
pub(crate) fn count_changed(mask: &image::GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] == 255)).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample() -> PipelineDiagnostics {
        PipelineDiagnostics {
            decode: stage(
                4,
                StageMetrics::Decode {
                    input_bytes: [1000, 1200],
                    width: 800,
                    height: 600,
                    resized: true,
                },
            ),
            align: stage(
                40,
                StageMetrics::Align {
                    success: false,
                    features: [0, 12],
                    matches: 0,
                    good_matches: 0,
                    inliers: 0,
                },
            ),
            difference: stage(
                10,
                StageMetrics::Difference {
                    sigma: Some(1.1),
                    changed_pixels: 4800,
                    total_pixels: 480_000,
                },
            ),
            regions: stage(
                2,
                StageMetrics::Regions {
                    region_count: 1,
                    largest_area: 9000,
                },
            ),
            visualize: stage(3, StageMetrics::Visualize { region_count: 1 }),
            total_duration: Duration::from_millis(59),
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn count_changed_counts_full_pixels_only() {
        let mut img = image::GrayImage::new(10, 10);
        for i in 0..5 {
            img.put_pixel(i, 0, image::Luma([255]));
        }
        img.put_pixel(9, 9, image::Luma([128]));
        assert_eq!(count_changed(&img), 5);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        assert!(report.contains("Comparison Diagnostics Report"));
        assert!(report.contains("Image: 800x600"));
        for stage in ["Decode", "Align", "Difference", "Regions", "Visualize"] {
            assert!(report.contains(stage), "missing {stage}");
        }
        assert!(report.contains("FAILED"));
        assert!(report.contains("second resized"));
        assert!(report.contains("changed=4800 (1.00%)"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let diag = sample();
        let json = serde_json::to_value(&diag).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.059).abs() < 1e-12);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        let drift = back.total_duration.abs_diff(diag.total_duration);
        assert!(drift <= Duration::from_nanos(1));
        assert_eq!(back.align.metrics, diag.align.metrics);
    }

    #[test]
    fn std_clock_measures_forward() {
        let clock = StdClock;
        let start = clock.now();
        let first = clock.elapsed(&start);
        assert!(clock.elapsed(&start) >= first);
    }
}
