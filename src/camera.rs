use std::ops::Range;

use glam::*;

/// A camera trait.
pub trait CameraTrait {
    /// Get the view matrix.
    fn view(&self) -> Mat4;

    /// Get the projection matrix.
    fn projection(&self, aspect_ratio: f32) -> Mat4;

    /// Get the camera position in world space.
    fn position(&self) -> Vec3 {
        self.view().inverse().col(3).xyz()
    }
}

/// A camera.
#[derive(Debug, Clone)]
pub struct Camera {
    /// The position of the camera.
    pub pos: Vec3,
    /// The z range of the camera.
    pub z: Range<f32>,
    /// The vertical FOV.
    pub vertical_fov: f32,
    /// The pitch.
    pub pitch: f32,
    /// The yaw.
    pub yaw: f32,
}

impl Camera {
    /// Up direction.
    pub const UP: Vec3 = Vec3::Y;

    /// Create a new camera.
    pub fn new(z: Range<f32>, vertical_fov: f32) -> Self {
        Self {
            pos: Vec3::ZERO,
            z,
            vertical_fov,
            pitch: 0.0,
            yaw: 0.0,
        }
    }

    /// Get the forward vector.
    pub fn get_forward(&self) -> Vec3 {
        Vec3::new(
            self.pitch.cos() * self.yaw.sin(),
            self.pitch.sin(),
            self.pitch.cos() * self.yaw.cos(),
        )
    }
}

impl CameraTrait for Camera {
    fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.pos, self.get_forward(), Self::UP)
    }

    fn projection(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh(self.vertical_fov, aspect_ratio, self.z.start, self.z.end)
    }

    fn position(&self) -> Vec3 {
        self.pos
    }
}

/// Fixed view and projection matrices handed over by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    /// The view matrix.
    pub view: Mat4,
    /// The projection matrix.
    pub proj: Mat4,
}

impl CameraTrait for ViewProjection {
    fn view(&self) -> Mat4 {
        self.view
    }

    fn projection(&self, _aspect_ratio: f32) -> Mat4 {
        self.proj
    }
}

/// Get the world position from the screen coordinates and the normalized depth.
///
/// `coords` are in pixels with the origin at the top left of the viewport.
pub fn screen_to_world(
    camera: &impl CameraTrait,
    coords: Vec2,
    depth: f32,
    viewport: UVec2,
) -> Vec3 {
    let viewport = viewport.as_vec2();
    let pos_ndc = (vec2(coords.x / viewport.x, 1.0 - coords.y / viewport.y) * 2.0 - Vec2::ONE)
        .extend(depth)
        .extend(1.0);

    let transform_mat = camera.projection(viewport.x / viewport.y) * camera.view();
    let pos_inverted = transform_mat.inverse() * pos_ndc;

    pos_inverted.xyz() / pos_inverted.w
}

/// Get the normalized device depth of a world position.
///
/// Returns [`None`] if the position is behind the camera.
pub fn world_to_depth(camera: &impl CameraTrait, pos: Vec3, viewport: UVec2) -> Option<f32> {
    let viewport = viewport.as_vec2();
    let clip = camera.projection(viewport.x / viewport.y) * camera.view() * pos.extend(1.0);

    (clip.w > 0.0).then(|| clip.z / clip.w)
}
