use std::str::FromStr;

use glam::*;

use crate::Error;

/// A single channel segmentation mask with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskImage {
    size: UVec2,
    values: Vec<f32>,
}

impl MaskImage {
    /// Create a new mask from row-major values.
    pub fn new(size: UVec2, values: Vec<f32>) -> Result<Self, Error> {
        verify_size(size, values.len())?;

        Ok(Self {
            size,
            values: values
                .into_iter()
                .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
                .collect(),
        })
    }

    /// Create a mask from 8 bit luma values.
    pub fn from_luma8(size: UVec2, luma: &[u8]) -> Result<Self, Error> {
        Self::new(size, luma.iter().map(|&v| v as f32 / 255.0).collect())
    }

    /// Create a mask from booleans.
    pub fn from_bool(size: UVec2, mask: &[bool]) -> Result<Self, Error> {
        Self::new(size, mask.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect())
    }

    /// Create a mask filled with a single value.
    pub fn filled(size: UVec2, value: f32) -> Self {
        Self {
            size,
            values: vec![value.clamp(0.0, 1.0); (size.x * size.y) as usize],
        }
    }

    /// Get the size.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Get the values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Get the value at a pixel, zero outside of the image.
    pub fn get(&self, x: i32, y: i32) -> f32 {
        match index(self.size, x, y) {
            Some(i) => self.values[i],
            None => 0.0,
        }
    }

    /// Count the pixels at or above the threshold.
    pub fn count_at_least(&self, threshold: f32) -> usize {
        self.values.iter().filter(|&&v| v >= threshold).count()
    }
}

/// An external depth estimate.
///
/// The encoding is monotonic in scene depth with unknown scale, offset and polarity.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    size: UVec2,
    values: Vec<f32>,
}

impl DepthImage {
    /// Create a new depth image from interleaved `channels`, only the first channel is kept.
    pub fn from_f32(size: UVec2, channels: usize, data: &[f32]) -> Result<Self, Error> {
        let channels = channels.max(1);
        if data.len() % channels != 0 {
            return Err(Error::ImageSizeMismatch {
                size,
                len: data.len(),
            });
        }
        verify_size(size, data.len() / channels)?;

        Ok(Self {
            size,
            values: data.iter().step_by(channels).copied().collect(),
        })
    }

    /// Create a new depth image from interleaved half precision `channels`.
    pub fn from_f16(size: UVec2, channels: usize, data: &[half::f16]) -> Result<Self, Error> {
        let values = data.iter().map(|v| v.to_f32()).collect::<Vec<_>>();
        Self::from_f32(size, channels, &values)
    }

    /// Create a new depth image from 16 bit values.
    ///
    /// With metadata the values are mapped back to `min + v / 65535 * range`, otherwise they are
    /// normalized to `[0, 1]`.
    pub fn from_u16(
        size: UVec2,
        data: &[u16],
        metadata: Option<&DepthMetadata>,
    ) -> Result<Self, Error> {
        let (min, range) = metadata.map_or((0.0, 1.0), |m| (m.min, m.range));
        let values = data
            .iter()
            .map(|&v| min + v as f32 / u16::MAX as f32 * range)
            .collect::<Vec<_>>();
        Self::from_f32(size, 1, &values)
    }

    /// Get the size.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Get the values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Get the value at a pixel.
    ///
    /// Returns [`None`] outside of the image or for non-finite values.
    pub fn get(&self, x: i32, y: i32) -> Option<f32> {
        index(self.size, x, y)
            .map(|i| self.values[i])
            .filter(|v| v.is_finite())
    }

    /// Sample the nearest pixel at a position in image pixel coordinates.
    pub fn sample(&self, pos: Vec2) -> Option<f32> {
        let pos = pos.floor().as_ivec2();
        self.get(pos.x, pos.y)
    }

    /// Sample the nearest pixel at normalized coordinates with the origin at the bottom left.
    pub fn sample_normalized(&self, uv: Vec2) -> Option<f32> {
        if self.size.x == 0 || self.size.y == 0 {
            return None;
        }

        let max = (self.size - UVec2::ONE).as_vec2();
        let x = (uv.x * max.x).clamp(0.0, max.x) as i32;
        let y = ((1.0 - uv.y) * max.y).clamp(0.0, max.y) as i32;
        self.get(x, y)
    }

    /// Get the finite value range.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Bring the finite values into `[0, 1]`.
    ///
    /// Values already in range are kept. Non-negative values are divided by the maximum as the
    /// depth helper quantizes them, anything else is rescaled from its min-max range. A constant
    /// image out of range maps to `0.5`.
    pub fn normalized(&self) -> Self {
        let Some((lo, hi)) = self.value_range() else {
            return self.clone();
        };

        if lo >= 0.0 && hi <= 1.0 {
            return self.clone();
        }

        let constant = hi - lo <= f32::EPSILON;
        let (offset, span) = match lo >= 0.0 {
            true => (0.0, hi),
            false => (lo, hi - lo),
        };

        let values = self
            .values
            .iter()
            .map(|&v| match (v.is_finite(), !constant) {
                (false, _) => f32::NAN,
                (true, true) => (v - offset) / span,
                (true, false) => 0.5,
            })
            .collect();

        Self {
            size: self.size,
            values,
        }
    }
}

/// Range metadata sent alongside a quantized depth image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthMetadata {
    /// The depth of the quantized value zero.
    pub min: f32,
    /// The depth span of the full quantized range.
    pub range: f32,
}

impl FromStr for DepthMetadata {
    type Err = Error;

    /// Parse `key=value` pairs separated by `;`, `,` or new lines.
    ///
    /// Accepts `min` with either `max` or `range`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut min = None;
        let mut max = None;
        let mut range = None;

        for pair in s
            .split([';', ',', '\n'])
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let (key, value) = pair
                .split_once(['=', ':'])
                .ok_or_else(|| Error::InvalidDepthMetadata(pair.to_string()))?;
            let value = value
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| Error::InvalidDepthMetadata(pair.to_string()))?;

            match key.trim().to_ascii_lowercase().as_str() {
                "min" => min = Some(value),
                "max" => max = Some(value),
                "range" => range = Some(value),
                other => log::debug!("Ignoring depth metadata key {other:?}"),
            }
        }

        let min = min.ok_or_else(|| Error::InvalidDepthMetadata(format!("missing min in {s:?}")))?;
        let range = match (range, max) {
            (Some(range), _) => range,
            (None, Some(max)) => max - min,
            (None, None) => {
                return Err(Error::InvalidDepthMetadata(format!(
                    "missing max or range in {s:?}"
                )));
            }
        };

        Ok(Self { min, range })
    }
}

/// Scaling between screen pixels and image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageScale {
    factor: Vec2,
}

impl ImageScale {
    /// Create the scale from screen size to image size.
    pub fn new(screen: UVec2, image: UVec2) -> Self {
        Self {
            factor: image.as_vec2() / screen.max(UVec2::ONE).as_vec2(),
        }
    }

    /// Map a screen position to image pixel coordinates.
    pub fn to_image(&self, screen_pos: Vec2) -> Vec2 {
        screen_pos * self.factor
    }

    /// Map a length along the axes from screen to image pixels.
    pub fn scale_axis(&self, axis: Vec2) -> Vec2 {
        axis * self.factor
    }

    /// Get the scale factor.
    pub fn factor(&self) -> Vec2 {
        self.factor
    }
}

fn index(size: UVec2, x: i32, y: i32) -> Option<usize> {
    (x >= 0 && y >= 0 && (x as u32) < size.x && (y as u32) < size.y)
        .then(|| y as usize * size.x as usize + x as usize)
}

fn verify_size(size: UVec2, len: usize) -> Result<(), Error> {
    if size.x == 0 || size.y == 0 {
        return Err(Error::EmptyImage);
    }

    if (size.x as usize) * (size.y as usize) != len {
        return Err(Error::ImageSizeMismatch { size, len });
    }

    Ok(())
}
