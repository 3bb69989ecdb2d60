use glam::*;
use rayon::prelude::*;

use crate::{
    Band, BandSpace, BinaryMask, DepthCalibration, DepthImage, DepthRangeBuffer, FootprintProbe,
    ImageScale, ProbeClip, ProjectedSplatPod, SelectionBitset, SplatFootprint,
};

bitflags::bitflags! {
    /// The gates enabled on top of the mask test.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
    pub struct GateFlags: u32 {
        /// Reject splats farther than the calibrated external surface.
        const FRONT = 1 << 0;
        /// Reject splats outside of the depth band.
        const BAND = 1 << 1;
        /// Reject splats behind the nearest aggregated depth at their pixel.
        const OCCLUSION = 1 << 2;
        /// Reject splats behind the probe clip depth.
        const PROBE_CLIP = 1 << 3;
        /// Splats passing the mask and shape tests skip every depth gate.
        const ALWAYS_INCLUDE = 1 << 4;
    }
}

impl Default for GateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Limits on the projected shape of a splat, zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeLimits {
    /// The maximum ratio of the longer over the shorter screen axis.
    pub max_eccentricity: f32,
    /// The maximum projected area in square pixels.
    pub max_area: f32,
}

impl ShapeLimits {
    /// Check if a splat is within the limits.
    pub fn accepts(&self, splat: &ProjectedSplatPod) -> bool {
        (self.max_eccentricity <= 0.0 || splat.eccentricity() <= self.max_eccentricity)
            && (self.max_area <= 0.0 || splat.area() <= self.max_area)
    }
}

/// The selection decision configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// The minimum mask value of a selected pixel.
    pub mask_threshold: f32,
    /// Grow (positive) or shrink (negative) the mask footprint in mask pixels.
    pub selection_size: i32,
    /// The mask probe.
    pub probe: FootprintProbe,
    /// The number of samples on the ellipse for [`FootprintProbe::Ellipse`].
    pub ellipse_samples: u32,
    /// The fraction of ellipse samples that must hit the mask.
    pub min_hit_fraction: f32,
    /// The enabled gates.
    pub flags: GateFlags,
    /// The front gate tolerance in native depth.
    pub front_tolerance: f32,
    /// The occlusion gate bias in native depth.
    pub occlusion_bias: f32,
    /// The shape limits.
    pub shape: ShapeLimits,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 0.5,
            selection_size: 0,
            probe: FootprintProbe::Center,
            ellipse_samples: 8,
            min_hit_fraction: 0.5,
            flags: GateFlags::empty(),
            front_tolerance: 0.02,
            occlusion_bias: 0.01,
            shape: ShapeLimits::default(),
        }
    }
}

impl GateConfig {
    /// Set the mask threshold.
    pub fn with_mask_threshold(mut self, threshold: f32) -> Self {
        self.mask_threshold = threshold;
        self
    }

    /// Set the grow/shrink size.
    pub fn with_selection_size(mut self, size: i32) -> Self {
        self.selection_size = size;
        self
    }

    /// Set the mask probe.
    pub fn with_probe(mut self, probe: FootprintProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Set the enabled gates.
    pub fn with_flags(mut self, flags: GateFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the front gate tolerance.
    pub fn with_front_tolerance(mut self, tolerance: f32) -> Self {
        self.front_tolerance = tolerance;
        self
    }

    /// Set the occlusion gate bias.
    pub fn with_occlusion_bias(mut self, bias: f32) -> Self {
        self.occlusion_bias = bias;
        self
    }

    /// Set the shape limits.
    pub fn with_shape(mut self, shape: ShapeLimits) -> Self {
        self.shape = shape;
        self
    }
}

/// The depth data available to a decision.
///
/// A missing input turns the gates depending on it into no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateInputs<'a> {
    /// The aggregated native depth range over the mask.
    pub range: Option<&'a DepthRangeBuffer>,
    /// The normalized external depth.
    pub depth: Option<&'a DepthImage>,
    /// The calibration for the front gate.
    pub calibration: Option<&'a DepthCalibration>,
    /// The band and the space it is tested in.
    pub band: Option<(Band, BandSpace)>,
    /// The probe clip.
    pub clip: Option<ProbeClip>,
}

/// The per splat selection predicate.
#[derive(Debug)]
pub struct DecisionKernel<'a> {
    config: GateConfig,
    mask: &'a BinaryMask,
    inputs: GateInputs<'a>,
    viewport: UVec2,
    mask_scale: ImageScale,
    depth_scale: Option<ImageScale>,
}

impl<'a> DecisionKernel<'a> {
    /// Create a new kernel.
    ///
    /// `mask` is the effective footprint, already thresholded and grown or shrunk.
    pub fn new(
        config: GateConfig,
        mask: &'a BinaryMask,
        inputs: GateInputs<'a>,
        viewport: UVec2,
    ) -> Self {
        Self {
            config,
            mask,
            inputs,
            viewport,
            mask_scale: ImageScale::new(viewport, mask.size()),
            depth_scale: inputs.depth.map(|d| ImageScale::new(viewport, d.size())),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Decide whether a splat is selected.
    pub fn decide(&self, splat: &ProjectedSplatPod) -> bool {
        if !splat.is_visible() || !self.mask_hit(splat) {
            return false;
        }

        if !self.config.shape.accepts(splat) {
            return false;
        }

        if self.config.flags.contains(GateFlags::ALWAYS_INCLUDE) {
            return true;
        }

        self.front_gate(splat)
            && self.band_gate(splat)
            && self.occlusion_gate(splat)
            && self.clip_gate(splat)
    }

    /// Decide every splat in parallel.
    ///
    /// The decision is sized by the splat count of this call.
    pub fn decide_all(&self, splats: &[ProjectedSplatPod]) -> SelectionBitset {
        let words = splats
            .par_chunks(32)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .filter(|(_, splat)| self.decide(splat))
                    .fold(0u32, |word, (i, _)| word | (1 << i))
            })
            .collect::<Vec<_>>();

        SelectionBitset::from_words(words, splats.len())
    }

    fn mask_hit(&self, splat: &ProjectedSplatPod) -> bool {
        let footprint = SplatFootprint::new(splat, self.viewport, &self.mask_scale);

        match self.config.probe {
            FootprintProbe::Center => {
                let pixel = footprint.center_pixel();
                self.mask.get(pixel.x, pixel.y)
            }
            FootprintProbe::Ellipse => {
                let points = footprint.probe_points(self.config.ellipse_samples);
                let hits = points
                    .iter()
                    .map(|p| p.floor().as_ivec2())
                    .filter(|p| self.mask.get(p.x, p.y))
                    .count();
                hits as f32 >= self.config.min_hit_fraction * points.len() as f32 && hits > 0
            }
        }
    }

    fn external_depth_at(&self, splat: &ProjectedSplatPod) -> Option<f32> {
        let depth = self.inputs.depth?;
        let scale = self.depth_scale?;
        depth.sample(scale.to_image(splat.screen_pos(self.viewport)))
    }

    fn front_gate(&self, splat: &ProjectedSplatPod) -> bool {
        if !self.config.flags.contains(GateFlags::FRONT) {
            return true;
        }

        let Some(calibration) = self.inputs.calibration else {
            return true;
        };

        match self.external_depth_at(splat) {
            Some(external) => {
                splat.native_depth() <= calibration.map(external) + self.config.front_tolerance
            }
            None => true,
        }
    }

    fn band_gate(&self, splat: &ProjectedSplatPod) -> bool {
        if !self.config.flags.contains(GateFlags::BAND) {
            return true;
        }

        match self.inputs.band {
            Some((band, BandSpace::Native)) => band.contains(splat.native_depth()),
            Some((band, BandSpace::External)) => self
                .external_depth_at(splat)
                .is_none_or(|external| band.contains(external)),
            None => true,
        }
    }

    fn occlusion_gate(&self, splat: &ProjectedSplatPod) -> bool {
        if !self.config.flags.contains(GateFlags::OCCLUSION) {
            return true;
        }

        let Some(range) = self.inputs.range else {
            return true;
        };

        let pixel = SplatFootprint::new(splat, self.viewport, &self.mask_scale).center_pixel();
        range
            .nearest_at(pixel.x, pixel.y)
            .is_none_or(|nearest| splat.native_depth() <= nearest + self.config.occlusion_bias)
    }

    fn clip_gate(&self, splat: &ProjectedSplatPod) -> bool {
        if !self.config.flags.contains(GateFlags::PROBE_CLIP) {
            return true;
        }

        self.inputs
            .clip
            .is_none_or(|clip| !clip.rejects(splat.native_depth()))
    }
}
