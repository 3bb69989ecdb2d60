use glam::*;

use crate::MaskImage;

/// A thresholded mask footprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    size: UVec2,
    bits: Vec<bool>,
}

impl BinaryMask {
    /// The bound of the grow/shrink radius in pixels.
    pub const MAX_RADIUS: i32 = 16;

    /// Threshold a mask, a pixel is set when its value is at least `threshold`.
    pub fn from_threshold(mask: &MaskImage, threshold: f32) -> Self {
        Self {
            size: mask.size(),
            bits: mask.values().iter().map(|&v| v >= threshold).collect(),
        }
    }

    /// Get the size.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Check if a pixel is set, pixels outside of the mask are never set.
    pub fn get(&self, x: i32, y: i32) -> bool {
        x >= 0
            && y >= 0
            && (x as u32) < self.size.x
            && (y as u32) < self.size.y
            && self.bits[y as usize * self.size.x as usize + x as usize]
    }

    /// Count the set pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Check if no pixel is set.
    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// Iterate over the coordinates of the set pixels.
    pub fn iter_set(&self) -> impl Iterator<Item = UVec2> + '_ {
        let width = self.size.x as usize;
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(move |(i, _)| uvec2((i % width) as u32, (i / width) as u32))
    }

    /// Grow (positive) or shrink (negative) the footprint by a square radius in pixels.
    ///
    /// The radius is clamped to [`BinaryMask::MAX_RADIUS`].
    pub fn morph(&self, radius: i32) -> Self {
        let radius = radius.clamp(-Self::MAX_RADIUS, Self::MAX_RADIUS);
        if radius == 0 {
            return self.clone();
        }

        let dilate = radius > 0;
        let r = radius.unsigned_abs() as usize;
        let width = self.size.x as usize;
        let height = self.size.y as usize;

        let rows = (0..height)
            .flat_map(|y| window_pass(&self.bits[y * width..(y + 1) * width], r, dilate))
            .collect::<Vec<_>>();

        let mut bits = vec![false; rows.len()];
        let mut column = vec![false; height];
        for x in 0..width {
            for (y, value) in column.iter_mut().enumerate() {
                *value = rows[y * width + x];
            }
            for (y, value) in window_pass(&column, r, dilate).into_iter().enumerate() {
                bits[y * width + x] = value;
            }
        }

        Self {
            size: self.size,
            bits,
        }
    }
}

/// Run a 1D max (dilate) or min (erode) filter of half width `r` with prefix sums.
///
/// Samples outside of the line count as unset.
fn window_pass(line: &[bool], r: usize, dilate: bool) -> Vec<bool> {
    let mut prefix = Vec::with_capacity(line.len() + 1);
    prefix.push(0usize);
    for &b in line {
        prefix.push(prefix[prefix.len() - 1] + b as usize);
    }

    (0..line.len())
        .map(|i| {
            let lo = i.saturating_sub(r);
            let hi = (i + r + 1).min(line.len());
            let set = prefix[hi] - prefix[lo];
            match dilate {
                true => set > 0,
                false => set == 2 * r + 1,
            }
        })
        .collect()
}
