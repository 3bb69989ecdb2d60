use glam::*;

use crate::{ImageScale, SelectionBitset};

/// The POD representation of a projected splat.
///
/// This is what the rendering layer produces for the current frame after preprocessing, the
/// selection engine only ever reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ProjectedSplatPod {
    /// The clip space position.
    pub clip_pos: Vec4,
    /// The major screen space axis in pixels, its length is the radius along the axis.
    pub axis_major: Vec2,
    /// The minor screen space axis in pixels, its length is the radius along the axis.
    pub axis_minor: Vec2,
    /// The packed RGBA8 color.
    pub color: u32,
    pub _padding: [u32; 3],
}

impl ProjectedSplatPod {
    /// Create a new projected splat.
    pub const fn new(clip_pos: Vec4, axis_major: Vec2, axis_minor: Vec2, color: U8Vec4) -> Self {
        Self {
            clip_pos,
            axis_major,
            axis_minor,
            color: u32::from_le_bytes([color.x, color.y, color.z, color.w]),
            _padding: [0; 3],
        }
    }

    /// Create a projected splat from its screen position and normalized depth.
    ///
    /// `pos` is in pixels with the origin at the top left of the viewport.
    pub fn from_screen(
        pos: Vec2,
        depth: f32,
        viewport: UVec2,
        axis_major: Vec2,
        axis_minor: Vec2,
        color: U8Vec4,
    ) -> Self {
        let viewport = viewport.as_vec2();
        let ndc = vec2(pos.x / viewport.x, 1.0 - pos.y / viewport.y) * 2.0 - Vec2::ONE;

        Self::new(ndc.extend(depth).extend(1.0), axis_major, axis_minor, color)
    }

    /// Get the normalized device coordinates.
    pub fn ndc(&self) -> Vec3 {
        self.clip_pos.xyz() / self.clip_pos.w
    }

    /// Whether the splat is in front of the camera and within the depth range.
    pub fn is_visible(&self) -> bool {
        if !(self.clip_pos.w > 0.0) {
            return false;
        }

        let depth = self.clip_pos.z / self.clip_pos.w;
        depth.is_finite() && (0.0..=1.0).contains(&depth)
    }

    /// Get the native normalized depth in `[0, 1]`.
    pub fn native_depth(&self) -> f32 {
        (self.clip_pos.z / self.clip_pos.w).clamp(0.0, 1.0)
    }

    /// Get the screen position in pixels with the origin at the top left.
    pub fn screen_pos(&self, viewport: UVec2) -> Vec2 {
        let ndc = self.ndc().xy();
        vec2(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5) * viewport.as_vec2()
    }

    /// Get the radii along the major and minor axes, major first.
    pub fn radii(&self) -> Vec2 {
        let a = self.axis_major.length();
        let b = self.axis_minor.length();
        vec2(a.max(b), a.min(b))
    }

    /// Get the ratio of the longer over the shorter axis.
    pub fn eccentricity(&self) -> f32 {
        let radii = self.radii();
        radii.x / radii.y.max(1e-6)
    }

    /// Get the projected ellipse area in square pixels.
    pub fn area(&self) -> f32 {
        let radii = self.radii();
        std::f32::consts::PI * radii.x * radii.y
    }

    /// Get the color.
    pub fn color(&self) -> U8Vec4 {
        let [r, g, b, a] = self.color.to_le_bytes();
        U8Vec4::new(r, g, b, a)
    }
}

/// The elliptical footprint of a splat in some image space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatFootprint {
    /// The center in image pixel coordinates.
    pub center: Vec2,
    pub axis_major: Vec2,
    pub axis_minor: Vec2,
}

impl SplatFootprint {
    /// Get the footprint of a splat mapped into an image.
    pub fn new(splat: &ProjectedSplatPod, viewport: UVec2, scale: &ImageScale) -> Self {
        Self {
            center: scale.to_image(splat.screen_pos(viewport)),
            axis_major: scale.scale_axis(splat.axis_major),
            axis_minor: scale.scale_axis(splat.axis_minor),
        }
    }

    /// Get the pixel containing the center.
    pub fn center_pixel(&self) -> IVec2 {
        self.center.floor().as_ivec2()
    }

    /// Check whether a point lies inside the ellipse.
    pub fn contains(&self, point: Vec2) -> bool {
        let offset = point - self.center;
        let a2 = self.axis_major.length_squared();
        let b2 = self.axis_minor.length_squared();
        if a2 <= 0.0 || b2 <= 0.0 {
            return offset.length_squared() <= 0.25;
        }

        let u = offset.dot(self.axis_major);
        let v = offset.dot(self.axis_minor);
        u * u / (a2 * a2) + v * v / (b2 * b2) <= 1.0
    }

    /// Get the pixels whose centers the ellipse covers.
    ///
    /// The search is bounded to `max_radius` pixels around the center, and the center pixel is
    /// always included.
    pub fn pixels(&self, max_radius: f32) -> Vec<IVec2> {
        let center = self.center_pixel();
        let radius = self
            .axis_major
            .length()
            .max(self.axis_minor.length())
            .min(max_radius)
            .ceil() as i32;

        let mut pixels = vec![center];
        for y in -radius..=radius {
            for x in -radius..=radius {
                let pixel = center + ivec2(x, y);
                if pixel != center && self.contains(pixel.as_vec2() + Vec2::splat(0.5)) {
                    pixels.push(pixel);
                }
            }
        }
        pixels
    }

    /// Get sample points on the ellipse at half of its radii plus the center.
    pub fn probe_points(&self, count: u32) -> Vec<Vec2> {
        let count = count.max(1);
        std::iter::once(self.center)
            .chain((0..count).map(|i| {
                let angle = i as f32 / count as f32 * std::f32::consts::TAU;
                self.center
                    + (self.axis_major * angle.cos() + self.axis_minor * angle.sin()) * 0.5
            }))
            .collect()
    }
}

/// A read-only view of the splats projected for the current frame.
///
/// The rendering layer exposes this instead of its internal buffers.
pub trait SplatSource {
    /// Get the projected splats.
    fn projected_splats(&self) -> &[ProjectedSplatPod];

    /// Get the viewport size in pixels the splats were projected into.
    fn viewport_size(&self) -> UVec2;

    /// Get the world space positions, if the renderer keeps them on the CPU.
    fn positions(&self) -> Option<&[Vec3]> {
        None
    }

    /// Get the number of splats.
    fn splat_count(&self) -> usize {
        self.projected_splats().len()
    }
}

/// A [`SplatSource`] that allows removing splats.
pub trait EditableSplatSource: SplatSource {
    /// Remove every selected splat, returns the number removed.
    ///
    /// This changes the splat count, any buffer sized by the old count is invalid afterwards.
    fn remove_selected(&mut self, selection: &SelectionBitset) -> usize;
}

/// Projected splats owned on the CPU.
#[derive(Debug, Clone, Default)]
pub struct ProjectedSplats {
    splats: Vec<ProjectedSplatPod>,
    positions: Option<Vec<Vec3>>,
    viewport: UVec2,
}

impl ProjectedSplats {
    /// Create new projected splats.
    pub fn new(splats: Vec<ProjectedSplatPod>, viewport: UVec2) -> Self {
        Self {
            splats,
            positions: None,
            viewport,
        }
    }

    /// Attach world space positions.
    ///
    /// Positions are dropped with a warning if the count does not match.
    pub fn with_positions(mut self, positions: Vec<Vec3>) -> Self {
        if positions.len() != self.splats.len() {
            log::warn!(
                "Splat positions count mismatch, {} splats but {} positions were provided",
                self.splats.len(),
                positions.len()
            );
            return self;
        }

        self.positions = Some(positions);
        self
    }

    /// Project world space splats with a camera.
    ///
    /// Each splat is an isotropic sphere of `radius` world units.
    pub fn project(
        camera: &impl crate::CameraTrait,
        viewport: UVec2,
        positions: &[Vec3],
        radius: f32,
        color: U8Vec4,
    ) -> Self {
        let size = viewport.as_vec2();
        let proj = camera.projection(size.x / size.y);
        let view_proj = proj * camera.view();
        let focal = proj.y_axis.y * size.y * 0.5;

        let splats = positions
            .iter()
            .map(|pos| {
                let clip_pos = view_proj * pos.extend(1.0);
                let pixels = if clip_pos.w > 0.0 {
                    focal * radius / clip_pos.w
                } else {
                    0.0
                };
                ProjectedSplatPod::new(clip_pos, vec2(pixels, 0.0), vec2(0.0, pixels), color)
            })
            .collect();

        Self::new(splats, viewport).with_positions(positions.to_vec())
    }
}

impl SplatSource for ProjectedSplats {
    fn projected_splats(&self) -> &[ProjectedSplatPod] {
        &self.splats
    }

    fn viewport_size(&self) -> UVec2 {
        self.viewport
    }

    fn positions(&self) -> Option<&[Vec3]> {
        self.positions.as_deref()
    }
}

impl EditableSplatSource for ProjectedSplats {
    fn remove_selected(&mut self, selection: &SelectionBitset) -> usize {
        let before = self.splats.len();
        selection.retain_unselected(&mut self.splats);
        if let Some(positions) = self.positions.as_mut() {
            selection.retain_unselected(positions);
        }
        before - self.splats.len()
    }
}
