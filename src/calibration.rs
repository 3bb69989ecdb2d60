use glam::*;
use rand::{Rng, SeedableRng, rngs::SmallRng};

use crate::{DepthImage, DepthRangeBuffer, ImageScale};

/// The affine mapping from external depth onto native depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthCalibration {
    /// The scale.
    pub scale: f32,
    /// The bias.
    pub bias: f32,
    /// Whether the external depth is used as `1 - e`.
    pub inverted: bool,
    /// The root mean square error of the fit in native depth.
    pub residual: f32,
    /// The number of samples the fit was evaluated on, zero if never fitted.
    pub sample_count: usize,
}

impl DepthCalibration {
    /// The identity calibration, treated as not fitted.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        bias: 0.0,
        inverted: false,
        residual: 0.0,
        sample_count: 0,
    };

    /// Create a calibration from a known mapping.
    pub const fn new(scale: f32, bias: f32, inverted: bool) -> Self {
        Self {
            scale,
            bias,
            inverted,
            residual: 0.0,
            sample_count: 1,
        }
    }

    /// Whether the calibration comes from a fit or was set explicitly.
    pub fn is_fitted(&self) -> bool {
        self.sample_count > 0
    }

    /// Map a normalized external depth onto the native depth scale.
    pub fn map(&self, external: f32) -> f32 {
        let e = if self.inverted {
            1.0 - external
        } else {
            external
        };
        self.scale * e + self.bias
    }

    fn is_finite(&self) -> bool {
        self.scale.is_finite() && self.bias.is_finite() && self.residual.is_finite()
    }
}

impl Default for DepthCalibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// The depth calibration configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    /// Whether calibration runs at all.
    pub enabled: bool,
    /// Whether the current calibration is kept as is.
    pub locked: bool,
    /// The number of samples the regression is fitted on.
    pub sample_budget: usize,
    /// The minimum number of valid samples for a fit.
    pub min_samples: usize,
    /// The allowed scale range.
    pub scale_range: (f32, f32),
    /// The allowed bias range.
    pub bias_range: (f32, f32),
    /// The relative error reduction required to flip the polarity.
    pub hysteresis: f32,
    /// The exponential smoothing factor of an accepted fit.
    pub smoothing: f32,
    /// The seed of the reservoir sampler.
    pub seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            locked: false,
            sample_budget: 2048,
            min_samples: 12,
            scale_range: (0.3, 2.0),
            bias_range: (-0.3, 0.3),
            hysteresis: 0.1,
            smoothing: 0.35,
            seed: 0x5eed,
        }
    }
}

impl CalibrationConfig {
    /// Set whether calibration is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set whether the calibration is locked.
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Set the sample budget.
    pub fn with_sample_budget(mut self, budget: usize) -> Self {
        self.sample_budget = budget;
        self
    }

    /// Set the polarity hysteresis.
    pub fn with_hysteresis(mut self, hysteresis: f32) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    /// Set the smoothing factor.
    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing;
        self
    }
}

/// A paired external and native depth sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSample {
    /// The normalized external depth.
    pub external: f32,
    /// The nearest native depth at the same pixel.
    pub native: f32,
}

impl DepthSample {
    /// Create a new sample.
    pub const fn new(external: f32, native: f32) -> Self {
        Self { external, native }
    }
}

/// Pair every observed pixel of the range buffer with the external depth under it.
///
/// The native depth of a pixel is the middle of its range, `depth` should be normalized.
pub fn collect_depth_samples(range: &DepthRangeBuffer, depth: &DepthImage) -> Vec<DepthSample> {
    let scale = ImageScale::new(range.size(), depth.size());

    range
        .iter_valid()
        .filter_map(|(pixel, min, max)| {
            let external = depth.sample(scale.to_image(pixel.as_vec2() + Vec2::splat(0.5)))?;
            Some(DepthSample::new(external, (min + max) * 0.5))
        })
        .collect()
}

/// Uniformly pick at most `budget` items with a seeded reservoir sampler.
pub fn reservoir_sample<T: Copy>(items: &[T], budget: usize, seed: u64) -> Vec<T> {
    if items.len() <= budget {
        return items.to_vec();
    }

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut reservoir = items[..budget].to_vec();
    for (i, item) in items.iter().enumerate().skip(budget) {
        let j = rng.gen_range(0..=i);
        if j < budget {
            reservoir[j] = *item;
        }
    }
    reservoir
}

/// First and second moments of paired samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    count: usize,
    sum_e: f64,
    sum_n: f64,
    sum_ee: f64,
    sum_en: f64,
}

impl Moments {
    /// Accumulate the moments of samples, with the external depth flipped if `inverted`.
    pub fn from_samples(samples: &[DepthSample], inverted: bool) -> Self {
        samples.iter().fold(Self::default(), |mut moments, s| {
            let e = if inverted {
                1.0 - s.external
            } else {
                s.external
            };
            moments.push(e, s.native);
            moments
        })
    }

    /// Add a sample.
    pub fn push(&mut self, e: f32, n: f32) {
        let (e, n) = (e as f64, n as f64);
        self.count += 1;
        self.sum_e += e;
        self.sum_n += n;
        self.sum_ee += e * e;
        self.sum_en += e * n;
    }

    /// Get the sample count.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Fit `n = scale * e + bias` by least squares with clamped parameters.
    ///
    /// Returns [`None`] for too few samples or zero variance of `e`.
    pub fn fit(&self, scale_range: (f32, f32), bias_range: (f32, f32)) -> Option<(f32, f32)> {
        if self.count < 2 {
            return None;
        }

        let count = self.count as f64;
        let mean_e = self.sum_e / count;
        let mean_n = self.sum_n / count;
        let var_e = self.sum_ee / count - mean_e * mean_e;
        let cov_en = self.sum_en / count - mean_e * mean_n;

        if !(var_e > 1e-12) {
            return None;
        }

        let scale = ((cov_en / var_e) as f32).clamp(scale_range.0, scale_range.1);
        let bias = ((mean_n - scale as f64 * mean_e) as f32).clamp(bias_range.0, bias_range.1);

        (scale.is_finite() && bias.is_finite()).then_some((scale, bias))
    }
}

/// Root mean square error of a calibration over samples.
pub fn calibration_rmse(calibration: &DepthCalibration, samples: &[DepthSample]) -> f32 {
    if samples.is_empty() {
        return f32::INFINITY;
    }

    let sum = samples
        .iter()
        .map(|s| {
            let diff = (calibration.map(s.external) - s.native) as f64;
            diff * diff
        })
        .sum::<f64>();

    (sum / samples.len() as f64).sqrt() as f32
}

/// Why a calibration run kept the previous calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSkip {
    /// Calibration is turned off.
    Disabled,
    /// The calibration is locked to its current value.
    Locked,
    /// Fewer valid samples than required.
    InsufficientSamples { found: usize, required: usize },
    /// The fit has zero variance or non-finite parameters.
    Degenerate,
}

/// The outcome of a calibration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// A new fit was accepted.
    Fitted {
        calibration: DepthCalibration,
        polarity_switched: bool,
    },

    /// The previous calibration was kept.
    Retained {
        calibration: DepthCalibration,
        reason: CalibrationSkip,
    },
}

impl CalibrationOutcome {
    /// Get the calibration in effect after the run.
    pub fn calibration(&self) -> &DepthCalibration {
        match self {
            Self::Fitted { calibration, .. } | Self::Retained { calibration, .. } => calibration,
        }
    }
}

/// Fits and persists the depth calibration across selection runs.
#[derive(Debug, Clone, Default)]
pub struct DepthCalibrator {
    config: CalibrationConfig,
    current: DepthCalibration,
}

impl DepthCalibrator {
    /// Create a new calibrator starting from the identity.
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            current: DepthCalibration::IDENTITY,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Get the configuration mutably.
    pub fn config_mut(&mut self) -> &mut CalibrationConfig {
        &mut self.config
    }

    /// Get the current calibration.
    pub fn current(&self) -> &DepthCalibration {
        &self.current
    }

    /// Override the current calibration.
    pub fn set_current(&mut self, calibration: DepthCalibration) {
        self.current = calibration;
    }

    /// Reset to the identity calibration.
    pub fn reset(&mut self) {
        self.current = DepthCalibration::IDENTITY;
    }

    /// Fit the calibration to the samples and merge it into the current one.
    pub fn calibrate(&mut self, samples: &[DepthSample]) -> CalibrationOutcome {
        if !self.config.enabled {
            return self.retain(CalibrationSkip::Disabled);
        }

        if self.config.locked {
            return self.retain(CalibrationSkip::Locked);
        }

        let valid = samples
            .iter()
            .filter(|s| s.external.is_finite() && s.native.is_finite())
            .copied()
            .collect::<Vec<_>>();

        if valid.len() < self.config.min_samples.max(2) {
            log::debug!(
                "Skipping depth calibration with {} of {} required samples",
                valid.len(),
                self.config.min_samples
            );
            return self.retain(CalibrationSkip::InsufficientSamples {
                found: valid.len(),
                required: self.config.min_samples,
            });
        }

        let fit_samples = reservoir_sample(&valid, self.config.sample_budget, self.config.seed);

        let candidates = [false, true].map(|inverted| {
            Moments::from_samples(&fit_samples, inverted)
                .fit(self.config.scale_range, self.config.bias_range)
                .map(|(scale, bias)| {
                    let mut calibration = DepthCalibration {
                        scale,
                        bias,
                        inverted,
                        residual: 0.0,
                        sample_count: valid.len(),
                    };
                    calibration.residual = calibration_rmse(&calibration, &valid);
                    calibration
                })
                .filter(DepthCalibration::is_finite)
        });

        let Some(best) = candidates
            .iter()
            .flatten()
            .min_by(|a, b| a.residual.total_cmp(&b.residual))
            .copied()
        else {
            log::warn!("Depth calibration is degenerate, keeping the previous calibration");
            return self.retain(CalibrationSkip::Degenerate);
        };

        let chosen = match self.current.is_fitted() {
            false => best,
            true => {
                let active = candidates[self.current.inverted as usize];
                match active {
                    Some(active)
                        if best.inverted != active.inverted
                            && best.residual >= active.residual * (1.0 - self.config.hysteresis) =>
                    {
                        active
                    }
                    _ => best,
                }
            }
        };

        let polarity_switched = self.current.is_fitted() && chosen.inverted != self.current.inverted;

        let mut next = match self.current.is_fitted() && !polarity_switched {
            true => {
                let alpha = self.config.smoothing.clamp(0.0, 1.0);
                DepthCalibration {
                    scale: self.current.scale + alpha * (chosen.scale - self.current.scale),
                    bias: self.current.bias + alpha * (chosen.bias - self.current.bias),
                    ..chosen
                }
            }
            false => chosen,
        };
        next.residual = calibration_rmse(&next, &valid);

        if !next.is_finite() {
            log::warn!("Depth calibration produced non-finite parameters, discarding");
            return self.retain(CalibrationSkip::Degenerate);
        }

        log::debug!(
            "Depth calibration scale {:.4} bias {:.4} inverted {} rmse {:.5} over {} samples",
            next.scale,
            next.bias,
            next.inverted,
            next.residual,
            next.sample_count
        );

        self.current = next;

        CalibrationOutcome::Fitted {
            calibration: next,
            polarity_switched,
        }
    }

    fn retain(&self, reason: CalibrationSkip) -> CalibrationOutcome {
        CalibrationOutcome::Retained {
            calibration: self.current,
            reason,
        }
    }
}
