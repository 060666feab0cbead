//! Comparison configuration: typed defaults plus request-scoped overrides.
//!
//! [`CompareConfig::DEFAULT`] is an immutable constant. A request supplies
//! a partial [`ConfigOverrides`] mapping, which [`CompareConfig::merge`]
//! folds onto the defaults into a fresh value (override wins per key).
//! Keys the pipeline does not know are accepted and ignored.

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Tunable parameters for one comparison.
///
/// # Valid ranges
///
/// | field | range |
/// |-------|-------|
/// | `max_features` | `>= 1` |
/// | `good_match_percent` | `(0, 1]` |
/// | `diff_threshold` | `0..=255` (by type) |
/// | `min_contour_area` | finite, `>= 0` |
/// | `blur_kernel` | odd, `>= 1` (1 disables blurring) |
/// | `dilate_iterations`, `erode_iterations` | `0..=255` (by type) |
///
/// [`validate`](Self::validate) enforces the ranges the types cannot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompareConfig {
    /// Maximum keypoints detected per image for alignment.
    pub max_features: u32,

    /// Fraction of cross-checked matches (best first) kept for
    /// homography estimation. At least 4 are always kept.
    pub good_match_percent: f64,

    /// Intensity difference at or above which a pixel counts as changed.
    pub diff_threshold: u8,

    /// Regions with a smaller enclosed area (pixels) are discarded.
    pub min_contour_area: f64,

    /// Side of the square Gaussian kernel applied before differencing.
    pub blur_kernel: u32,

    /// 3×3 dilation passes applied to the thresholded mask.
    pub dilate_iterations: u8,

    /// 3×3 erosion passes applied after dilation.
    pub erode_iterations: u8,
}

impl CompareConfig {
    /// Default keypoint cap.
    pub const DEFAULT_MAX_FEATURES: u32 = 500;
    /// Default match-retention fraction.
    pub const DEFAULT_GOOD_MATCH_PERCENT: f64 = 0.15;
    /// Default binarization threshold.
    pub const DEFAULT_DIFF_THRESHOLD: u8 = 30;
    /// Default minimum region area in pixels.
    pub const DEFAULT_MIN_CONTOUR_AREA: f64 = 500.0;
    /// Default blur kernel side.
    pub const DEFAULT_BLUR_KERNEL: u32 = 5;
    /// Default dilation passes.
    pub const DEFAULT_DILATE_ITERATIONS: u8 = 3;
    /// Default erosion passes.
    pub const DEFAULT_ERODE_ITERATIONS: u8 = 1;

    /// The process-wide defaults. Never mutated; merge overrides into a copy.
    pub const DEFAULT: Self = Self {
        max_features: Self::DEFAULT_MAX_FEATURES,
        good_match_percent: Self::DEFAULT_GOOD_MATCH_PERCENT,
        diff_threshold: Self::DEFAULT_DIFF_THRESHOLD,
        min_contour_area: Self::DEFAULT_MIN_CONTOUR_AREA,
        blur_kernel: Self::DEFAULT_BLUR_KERNEL,
        dilate_iterations: Self::DEFAULT_DILATE_ITERATIONS,
        erode_iterations: Self::DEFAULT_ERODE_ITERATIONS,
    };

    /// Shallow-merge `overrides` onto `self`, returning a fresh config.
    #[must_use]
    pub fn merge(self, overrides: &ConfigOverrides) -> Self {
        Self {
            max_features: overrides.max_features.unwrap_or(self.max_features),
            good_match_percent: overrides
                .good_match_percent
                .unwrap_or(self.good_match_percent),
            diff_threshold: overrides.diff_threshold.unwrap_or(self.diff_threshold),
            min_contour_area: overrides.min_contour_area.unwrap_or(self.min_contour_area),
            blur_kernel: overrides.blur_kernel.unwrap_or(self.blur_kernel),
            dilate_iterations: overrides
                .dilate_iterations
                .unwrap_or(self.dilate_iterations),
            erode_iterations: overrides.erode_iterations.unwrap_or(self.erode_iterations),
        }
    }

    /// Check the ranges documented on the struct.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_features == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_features must be at least 1".into(),
            ));
        }
        if !(self.good_match_percent > 0.0 && self.good_match_percent <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "good_match_percent must be in (0, 1], got {}",
                self.good_match_percent
            )));
        }
        if !self.min_contour_area.is_finite() || self.min_contour_area < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "min_contour_area must be finite and non-negative, got {}",
                self.min_contour_area
            )));
        }
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "blur_kernel must be a positive odd number, got {}",
                self.blur_kernel
            )));
        }
        Ok(())
    }
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A partial, request-scoped configuration mapping.
///
/// Absent keys fall back to [`CompareConfig::DEFAULT`]. Unknown keys are
/// ignored during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_features: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub good_match_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_contour_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_kernel: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dilate_iterations: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erode_iterations: Option<u8>,
}

impl ConfigOverrides {
    /// Parse overrides from an arbitrary JSON value.
    ///
    /// `null` means "no overrides".
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the value is not an
    /// object or a known key has the wrong type or range.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PipelineError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Resolve these overrides against the defaults and validate the result.
    ///
    /// # Errors
    ///
    /// See [`CompareConfig::validate`].
    pub fn resolve(&self) -> Result<CompareConfig, PipelineError> {
        let config = CompareConfig::DEFAULT.merge(self);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = CompareConfig::default();
        assert_eq!(c.max_features, 500);
        assert!((c.good_match_percent - 0.15).abs() < f64::EPSILON);
        assert_eq!(c.diff_threshold, 30);
        assert!((c.min_contour_area - 500.0).abs() < f64::EPSILON);
        assert_eq!(c.blur_kernel, 5);
        assert_eq!(c.dilate_iterations, 3);
        assert_eq!(c.erode_iterations, 1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn override_wins_per_key() {
        let overrides = ConfigOverrides {
            diff_threshold: Some(50),
            erode_iterations: Some(0),
            ..ConfigOverrides::default()
        };
        let merged = CompareConfig::DEFAULT.merge(&overrides);
        assert_eq!(merged.diff_threshold, 50);
        assert_eq!(merged.erode_iterations, 0);
        assert_eq!(merged.max_features, CompareConfig::DEFAULT_MAX_FEATURES);
        assert_eq!(merged.blur_kernel, CompareConfig::DEFAULT_BLUR_KERNEL);
    }

    #[test]
    fn merge_does_not_touch_defaults() {
        let overrides = ConfigOverrides {
            max_features: Some(10),
            ..ConfigOverrides::default()
        };
        let _ = CompareConfig::DEFAULT.merge(&overrides);
        assert_eq!(CompareConfig::DEFAULT.max_features, 500);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let overrides =
            ConfigOverrides::from_json(json!({"min_contour_area": 100, "color": "blue"})).unwrap();
        assert_eq!(overrides.min_contour_area, Some(100.0));
        assert_eq!(overrides.max_features, None);
    }

    #[test]
    fn null_means_no_overrides() {
        let overrides = ConfigOverrides::from_json(serde_json::Value::Null).unwrap();
        assert_eq!(overrides, ConfigOverrides::default());
    }

    #[test]
    fn wrong_type_is_invalid_config() {
        let result = ConfigOverrides::from_json(json!({"diff_threshold": "high"}));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn out_of_range_threshold_is_invalid_config() {
        let result = ConfigOverrides::from_json(json!({"diff_threshold": 300}));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn even_blur_kernel_is_rejected() {
        let overrides = ConfigOverrides {
            blur_kernel: Some(4),
            ..ConfigOverrides::default()
        };
        assert!(matches!(
            overrides.resolve(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_blur_kernel_is_rejected() {
        let overrides = ConfigOverrides {
            blur_kernel: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(overrides.resolve().is_err());
    }

    #[test]
    fn match_percent_out_of_range_is_rejected() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let overrides = ConfigOverrides {
                good_match_percent: Some(bad),
                ..ConfigOverrides::default()
            };
            assert!(overrides.resolve().is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn negative_min_area_is_rejected() {
        let overrides = ConfigOverrides {
            min_contour_area: Some(-1.0),
            ..ConfigOverrides::default()
        };
        assert!(overrides.resolve().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = serde_json::to_value(CompareConfig::DEFAULT).unwrap();
        assert_eq!(json["blur_kernel"], 5);
        let back: CompareConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, CompareConfig::DEFAULT);
    }
}
