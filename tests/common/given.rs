#![allow(dead_code)]

use wgpu_3dgs_mask_select::{
    Camera, DepthImage, MaskImage, ProjectedSplatPod, ProjectedSplats, glam::*,
};

pub const VIEWPORT: UVec2 = UVec2::new(128, 128);

/// A tiny splat covering only the pixel under its center.
pub fn splat_at(pos: Vec2, depth: f32) -> ProjectedSplatPod {
    ProjectedSplatPod::from_screen(
        pos,
        depth,
        VIEWPORT,
        vec2(0.4, 0.0),
        vec2(0.0, 0.4),
        U8Vec4::splat(255),
    )
}

/// A tiny splat at the center of a pixel.
pub fn splat_at_pixel(pixel: UVec2, depth: f32) -> ProjectedSplatPod {
    splat_at(pixel.as_vec2() + Vec2::splat(0.5), depth)
}

pub fn splats(pods: Vec<ProjectedSplatPod>) -> ProjectedSplats {
    ProjectedSplats::new(pods, VIEWPORT)
}

pub fn mask(f: impl Fn(UVec2) -> bool) -> MaskImage {
    let bools = (0..VIEWPORT.y)
        .flat_map(|y| (0..VIEWPORT.x).map(move |x| uvec2(x, y)))
        .map(f)
        .collect::<Vec<_>>();
    MaskImage::from_bool(VIEWPORT, &bools).expect("mask")
}

pub fn disk_mask(center: Vec2, radius: f32) -> MaskImage {
    mask(|p| (p.as_vec2() + Vec2::splat(0.5)).distance(center) <= radius)
}

pub fn full_mask() -> MaskImage {
    MaskImage::filled(VIEWPORT, 1.0)
}

pub fn depth(f: impl Fn(UVec2) -> f32) -> DepthImage {
    let values = (0..VIEWPORT.y)
        .flat_map(|y| (0..VIEWPORT.x).map(move |x| uvec2(x, y)))
        .map(f)
        .collect::<Vec<_>>();
    DepthImage::from_f32(VIEWPORT, 1, &values).expect("depth")
}

/// External depth alternating by `±noise` in a checkerboard around `value`.
pub fn checker_depth(value: f32, noise: f32) -> DepthImage {
    depth(|p| match (p.x + p.y) % 2 {
        0 => value + noise,
        _ => value - noise,
    })
}

pub fn camera() -> Camera {
    Camera::new(0.1..100.0, 60f32.to_radians())
}
