use std::sync::atomic::{AtomicU32, Ordering};

use glam::*;
use rayon::prelude::*;

use crate::{BinaryMask, ImageScale, ProjectedSplatPod, SplatFootprint};

/// How a splat footprint is tested against the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FootprintProbe {
    /// Only the pixel under the splat center.
    Center,

    /// Every pixel covered by the projected ellipse.
    #[default]
    Ellipse,
}

/// The per-pixel depth aggregation configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateConfig {
    /// The footprint probe.
    pub probe: FootprintProbe,
    /// The maximum footprint radius in mask pixels.
    pub max_footprint_radius: f32,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            probe: FootprintProbe::Ellipse,
            max_footprint_radius: 32.0,
        }
    }
}

impl AggregateConfig {
    /// Set the probe.
    pub fn with_probe(mut self, probe: FootprintProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Set the maximum footprint radius.
    pub fn with_max_footprint_radius(mut self, radius: f32) -> Self {
        self.max_footprint_radius = radius;
        self
    }
}

/// The per-pixel native depth range under the mask.
///
/// Each slot packs the quantized minimum depth in the low 16 bits and the maximum in the high 16
/// bits. [`DepthRangeBuffer::SENTINEL`] marks a pixel where no splat was observed.
#[derive(Debug)]
pub struct DepthRangeBuffer {
    size: UVec2,
    slots: Vec<AtomicU32>,
}

impl DepthRangeBuffer {
    /// The slot value of a pixel without any observed splat.
    pub const SENTINEL: u32 = u32::MAX;

    /// The largest quantized depth, `u16::MAX` is reserved for the sentinel.
    pub const QUANTIZED_MAX: u16 = u16::MAX - 1;

    /// Create a new buffer with every slot set to the sentinel.
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            slots: (0..size.x as usize * size.y as usize)
                .map(|_| AtomicU32::new(Self::SENTINEL))
                .collect(),
        }
    }

    /// Aggregate the depth of every visible splat over the set pixels of the mask.
    ///
    /// Splats are processed in parallel.
    pub fn aggregate(
        mask: &BinaryMask,
        splats: &[ProjectedSplatPod],
        viewport: UVec2,
        config: &AggregateConfig,
    ) -> Self {
        let buffer = Self::new(mask.size());
        let scale = ImageScale::new(viewport, mask.size());

        splats
            .par_iter()
            .filter(|splat| splat.is_visible())
            .for_each(|splat| {
                let footprint = SplatFootprint::new(splat, viewport, &scale);
                let depth = splat.native_depth();

                match config.probe {
                    FootprintProbe::Center => {
                        let pixel = footprint.center_pixel();
                        if mask.get(pixel.x, pixel.y) {
                            buffer.record(pixel, depth);
                        }
                    }
                    FootprintProbe::Ellipse => {
                        footprint
                            .pixels(config.max_footprint_radius)
                            .into_iter()
                            .filter(|pixel| mask.get(pixel.x, pixel.y))
                            .for_each(|pixel| buffer.record(pixel, depth));
                    }
                }
            });

        log::debug!(
            "Aggregated depth range over {} of {} mask pixels",
            buffer.valid_count(),
            mask.count()
        );

        buffer
    }

    /// Quantize a normalized depth.
    pub fn quantize(depth: f32) -> u16 {
        (depth.clamp(0.0, 1.0) * Self::QUANTIZED_MAX as f32).round() as u16
    }

    /// Dequantize a normalized depth.
    pub fn dequantize(value: u16) -> f32 {
        value as f32 / Self::QUANTIZED_MAX as f32
    }

    /// Get the size.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Record a depth at a pixel as an atomic min/max update.
    ///
    /// Pixels outside of the buffer are ignored.
    pub fn record(&self, pixel: IVec2, depth: f32) {
        let Some(slot) = self.slot(pixel.x, pixel.y) else {
            return;
        };

        let q = Self::quantize(depth) as u32;
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let next = match current {
                Self::SENTINEL => q | (q << 16),
                packed => (packed & 0xFFFF).min(q) | ((packed >> 16).max(q) << 16),
            };

            if next == current {
                return;
            }

            match slot.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Get the `(min, max)` native depth at a pixel.
    pub fn range_at(&self, x: i32, y: i32) -> Option<(f32, f32)> {
        self.slot(x, y)
            .map(|slot| slot.load(Ordering::Relaxed))
            .and_then(Self::unpack)
    }

    /// Get the nearest native depth at a pixel.
    pub fn nearest_at(&self, x: i32, y: i32) -> Option<f32> {
        self.range_at(x, y).map(|(min, _)| min)
    }

    /// Count the pixels with an observed depth.
    pub fn valid_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != Self::SENTINEL)
            .count()
    }

    /// Check if no pixel has an observed depth.
    pub fn is_empty(&self) -> bool {
        self.valid_count() == 0
    }

    /// Iterate over the pixels with an observed depth as `(pixel, min, max)`.
    pub fn iter_valid(&self) -> impl Iterator<Item = (UVec2, f32, f32)> + '_ {
        let width = self.size.x.max(1) as usize;
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            Self::unpack(slot.load(Ordering::Relaxed)).map(|(min, max)| {
                (uvec2((i % width) as u32, (i / width) as u32), min, max)
            })
        })
    }

    fn slot(&self, x: i32, y: i32) -> Option<&AtomicU32> {
        (x >= 0 && y >= 0 && (x as u32) < self.size.x && (y as u32) < self.size.y)
            .then(|| &self.slots[y as usize * self.size.x as usize + x as usize])
    }

    fn unpack(packed: u32) -> Option<(f32, f32)> {
        (packed != Self::SENTINEL).then(|| {
            (
                Self::dequantize((packed & 0xFFFF) as u16),
                Self::dequantize((packed >> 16) as u16),
            )
        })
    }
}
