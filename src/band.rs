use glam::*;

use crate::{DepthImage, DepthRangeBuffer, ImageScale};

/// The depth space a band is computed and tested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandSpace {
    /// The renderer's normalized depth of the nearest splat at each pixel.
    #[default]
    Native,

    /// The normalized external depth.
    External,
}

/// The band statistics configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandConfig {
    /// The depth space.
    pub space: BandSpace,
    /// The half width as a multiple of the interquartile range.
    pub k: f32,
    /// The allowed half width range.
    pub half_width_range: (f32, f32),
    /// The maximum number of samples sorted for the statistics.
    pub max_samples: usize,
    /// The minimum number of samples for a data driven band.
    pub min_samples: usize,
    /// The focus neighborhood radius in mask pixels.
    pub focus_radius: f32,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            space: BandSpace::Native,
            k: 1.5,
            half_width_range: (0.01, 0.25),
            max_samples: 32768,
            min_samples: 8,
            focus_radius: 24.0,
        }
    }
}

impl BandConfig {
    /// Set the depth space.
    pub fn with_space(mut self, space: BandSpace) -> Self {
        self.space = space;
        self
    }

    /// Set the interquartile range factor.
    pub fn with_k(mut self, k: f32) -> Self {
        self.k = k;
        self
    }

    /// Set the focus radius.
    pub fn with_focus_radius(mut self, radius: f32) -> Self {
        self.focus_radius = radius;
        self
    }
}

/// A depth acceptance interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    /// The center depth.
    pub center: f32,
    /// The half width, the band spans `center ± half_width`.
    pub half_width: f32,
}

impl Band {
    /// The band accepting the whole normalized depth range.
    pub const WIDE: Self = Self {
        center: 0.5,
        half_width: 0.5,
    };

    /// Create a new band.
    pub const fn new(center: f32, half_width: f32) -> Self {
        Self { center, half_width }
    }

    /// Get the lower bound.
    pub fn lower(&self) -> f32 {
        self.center - self.half_width
    }

    /// Get the upper bound.
    pub fn upper(&self) -> f32 {
        self.center + self.half_width
    }

    /// Check if a depth is inside the band.
    pub fn contains(&self, depth: f32) -> bool {
        (self.lower()..=self.upper()).contains(&depth)
    }
}

/// Robust location and spread of a depth distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStats {
    /// The median.
    pub median: f32,
    /// The first quartile.
    pub q1: f32,
    /// The third quartile.
    pub q3: f32,
    /// The number of samples after sub-sampling.
    pub count: usize,
}

impl BandStats {
    /// Compute the statistics, the samples are filtered, sub-sampled and sorted in place.
    ///
    /// Returns [`None`] if no finite sample is left.
    pub fn compute(samples: &mut Vec<f32>, max_samples: usize) -> Option<Self> {
        samples.retain(|v| v.is_finite());
        if samples.is_empty() {
            return None;
        }

        if samples.len() > max_samples.max(1) {
            let stride = samples.len().div_ceil(max_samples.max(1));
            *samples = samples.iter().step_by(stride).copied().collect();
        }

        samples.sort_by(f32::total_cmp);

        Some(Self {
            median: percentile(samples, 0.5),
            q1: percentile(samples, 0.25),
            q3: percentile(samples, 0.75),
            count: samples.len(),
        })
    }

    /// Get the interquartile range.
    pub fn iqr(&self) -> f32 {
        self.q3 - self.q1
    }

    /// Get the band `median ± k * IQR` with the half width clamped.
    pub fn band(&self, k: f32, half_width_range: (f32, f32)) -> Band {
        Band::new(
            self.median,
            (k * self.iqr()).clamp(half_width_range.0, half_width_range.1),
        )
    }
}

/// Get a percentile of sorted values by linear interpolation between order statistics.
pub fn percentile(sorted: &[f32], p: f32) -> f32 {
    match sorted.len() {
        0 => f32::NAN,
        1 => sorted[0],
        len => {
            let rank = p.clamp(0.0, 1.0) * (len - 1) as f32;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(len - 1);
            let t = rank - lo as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * t
        }
    }
}

/// Collect band samples over the observed pixels of the range buffer.
///
/// With focus points, only pixels within `radius` mask pixels of any focus point are used.
pub fn collect_band_samples(
    range: &DepthRangeBuffer,
    depth: Option<&DepthImage>,
    space: BandSpace,
    focus: &[Vec2],
    radius: f32,
) -> Vec<f32> {
    let depth_scale = depth.map(|d| ImageScale::new(range.size(), d.size()));
    let radius_squared = radius * radius;

    range
        .iter_valid()
        .filter(|(pixel, ..)| {
            let center = pixel.as_vec2() + Vec2::splat(0.5);
            focus.is_empty()
                || focus
                    .iter()
                    .any(|f| f.distance_squared(center) <= radius_squared)
        })
        .filter_map(|(pixel, min, _)| match (space, depth, depth_scale) {
            (BandSpace::Native, ..) => Some(min),
            (BandSpace::External, Some(depth), Some(scale)) => {
                depth.sample(scale.to_image(pixel.as_vec2() + Vec2::splat(0.5)))
            }
            (BandSpace::External, ..) => None,
        })
        .collect()
}

/// Compute the acceptance band of the samples.
///
/// Falls back to [`Band::WIDE`] when there are fewer than the minimum samples.
pub fn compute_band(mut samples: Vec<f32>, config: &BandConfig) -> Band {
    let stats = match BandStats::compute(&mut samples, config.max_samples) {
        Some(stats) if stats.count >= config.min_samples => stats,
        stats => {
            log::debug!(
                "Using wide band with {} of {} required samples",
                stats.map_or(0, |s| s.count),
                config.min_samples
            );
            return Band::WIDE;
        }
    };

    let band = stats.band(config.k, config.half_width_range);

    log::debug!(
        "Band median {:.4} IQR {:.4} half width {:.4} over {} samples",
        stats.median,
        stats.iqr(),
        band.half_width,
        stats.count
    );

    band
}
