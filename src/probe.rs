use glam::*;

use crate::{
    CameraTrait, DepthCalibration, DepthImage, ImageScale, ProjectedSplatPod, SelectionBitset,
    screen_to_world, world_to_depth,
};

/// The depth probe configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeConfig {
    /// The focus point in screen pixels with the origin at the top left.
    pub focus: Vec2,
    /// The half thickness of the clip plane in world units.
    pub tolerance_meters: f32,
}

impl ProbeConfig {
    /// Create a new probe configuration at a focus point.
    pub fn new(focus: Vec2) -> Self {
        Self {
            focus,
            tolerance_meters: 0.05,
        }
    }

    /// Set the tolerance in world units.
    pub fn with_tolerance_meters(mut self, tolerance: f32) -> Self {
        self.tolerance_meters = tolerance;
        self
    }
}

/// A clip plane derived from a single calibrated depth sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeClip {
    /// The clip depth in native depth.
    pub clip_depth: f32,
    /// The tolerance in native depth.
    pub tolerance: f32,
    /// The world space point under the focus at the clip depth.
    pub anchor: Vec3,
    /// The unit direction of the camera ray through the anchor.
    pub normal: Vec3,
    /// The distance from the camera to the anchor in world units.
    pub distance: f32,
}

impl ProbeClip {
    /// Create a clip from a native depth and tolerance without a world space anchor.
    pub const fn new(clip_depth: f32, tolerance: f32) -> Self {
        Self {
            clip_depth,
            tolerance,
            anchor: Vec3::ZERO,
            normal: Vec3::NEG_Z,
            distance: 0.0,
        }
    }

    /// Get the farthest native depth kept by the clip.
    pub fn threshold(&self) -> f32 {
        self.clip_depth + self.tolerance
    }

    /// Check if a native depth is behind the clip.
    pub fn rejects(&self, depth: f32) -> bool {
        depth > self.threshold()
    }
}

/// Derive the clip plane from the external depth under the focus point.
///
/// `depth` must be normalized the same way the calibration was fitted. Returns [`None`] if the
/// focus is outside of the depth image or the result is not finite.
pub fn derive_clip(
    depth: &DepthImage,
    calibration: &DepthCalibration,
    camera: &impl CameraTrait,
    viewport: UVec2,
    config: &ProbeConfig,
) -> Option<ProbeClip> {
    let scale = ImageScale::new(viewport, depth.size());
    let Some(external) = depth.sample(scale.to_image(config.focus)) else {
        log::warn!("No external depth under probe focus {}", config.focus);
        return None;
    };

    let clip_depth = calibration.map(external).clamp(0.0, 1.0);
    let origin = camera.position();
    let anchor = screen_to_world(camera, config.focus, clip_depth, viewport);
    let ray = anchor - origin;
    let distance = ray.length();
    let normal = ray.normalize_or_zero();

    if !distance.is_finite() || normal == Vec3::ZERO {
        log::warn!("Probe ray is degenerate at depth {clip_depth}");
        return None;
    }

    let tolerance_meters = config.tolerance_meters.abs();
    let near = world_to_depth(
        camera,
        origin + normal * (distance - tolerance_meters).max(0.0),
        viewport,
    )
    .unwrap_or(0.0);
    let far = world_to_depth(camera, origin + normal * (distance + tolerance_meters), viewport)
        .unwrap_or(1.0);

    let tolerance = ((far - near) * 0.5).abs();
    if !tolerance.is_finite() {
        log::warn!("Probe tolerance is not finite at depth {clip_depth}");
        return None;
    }

    log::debug!(
        "Probe clip depth {clip_depth:.4} tolerance {tolerance:.5} at distance {distance:.3}"
    );

    Some(ProbeClip {
        clip_depth,
        tolerance,
        anchor,
        normal,
        distance,
    })
}

/// Deselect every selected splat behind the clip, returns the number deselected.
///
/// Only indices within both the selection and the splats are visited. Splats past the far plane
/// are deselected as well.
pub fn prune_selection(
    selection: &mut SelectionBitset,
    splats: &[ProjectedSplatPod],
    clip: &ProbeClip,
) -> usize {
    let behind = selection
        .iter_selected()
        .take_while(|&i| i < splats.len())
        .filter(|&i| {
            let clip_pos = splats[i].clip_pos;
            clip_pos.w > 0.0 && clip.rejects(clip_pos.z / clip_pos.w)
        })
        .collect::<Vec<_>>();

    behind.iter().for_each(|&i| selection.set(i, false));
    behind.len()
}

/// Deselect every selected splat whose world position projects behind the clip.
///
/// Returns the number deselected.
pub fn prune_selection_world(
    selection: &mut SelectionBitset,
    positions: &[Vec3],
    camera: &impl CameraTrait,
    viewport: UVec2,
    clip: &ProbeClip,
) -> usize {
    let behind = selection
        .iter_selected()
        .take_while(|&i| i < positions.len())
        .filter(|&i| {
            world_to_depth(camera, positions[i], viewport)
                .is_some_and(|depth| clip.rejects(depth))
        })
        .collect::<Vec<_>>();

    behind.iter().for_each(|&i| selection.set(i, false));
    behind.len()
}
