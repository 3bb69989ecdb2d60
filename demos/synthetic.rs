use clap::{Parser, ValueEnum};
use colored::Colorize;
use glam::*;

use wgpu_3dgs_mask_select as gs;

/// The command line arguments.
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "\
    Run the depth-gated mask selection on a synthetic scene.\n\
    \n\
    The scene is a sphere of splats in front of a wall of splats. The mask covers the sphere \
    and spills onto the wall behind it, the gates decide which splats are kept.\n\
    "
)]
struct Args {
    /// The number of splats on the sphere.
    #[arg(long, default_value_t = 2000)]
    sphere: usize,

    /// The number of splats on the wall.
    #[arg(long, default_value_t = 4000)]
    wall: usize,

    /// The viewport size in pixels.
    #[arg(long, default_value_t = 256)]
    size: u32,

    /// The enabled gates.
    #[arg(long, value_enum, num_args = 0.., default_values_t = [Gate::Front])]
    gates: Vec<Gate>,

    /// Grow (positive) or shrink (negative) the mask in pixels.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    selection_size: i32,

    /// Invert the synthetic external depth.
    #[arg(long)]
    inverted: bool,

    /// Probe the depth at the viewport center after the run.
    #[arg(long)]
    probe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Gate {
    Front,
    Band,
    Occlusion,
    AlwaysInclude,
}

impl From<Gate> for gs::GateFlags {
    fn from(gate: Gate) -> Self {
        match gate {
            Gate::Front => gs::GateFlags::FRONT,
            Gate::Band => gs::GateFlags::BAND,
            Gate::Occlusion => gs::GateFlags::OCCLUSION,
            Gate::AlwaysInclude => gs::GateFlags::ALWAYS_INCLUDE,
        }
    }
}

/// Deterministic points on a sphere with a Fibonacci lattice.
fn sphere(center: Vec3, radius: f32, count: usize) -> Vec<Vec3> {
    let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    (0..count)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f32;
            center + vec3(r * theta.cos(), y, r * theta.sin()) * radius
        })
        .collect()
}

/// Points on a grid facing the camera.
fn wall(center: Vec3, half_extent: f32, count: usize) -> Vec<Vec3> {
    let side = (count as f32).sqrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let uv = vec2((i % side) as f32, (i / side) as f32) / (side - 1).max(1) as f32;
            center + ((uv * 2.0 - Vec2::ONE) * half_extent).extend(0.0)
        })
        .collect()
}

/// Render the nearest native depth per pixel into an external depth with a distorted affine map.
fn external_depth(
    source: &gs::ProjectedSplats,
    size: UVec2,
    inverted: bool,
) -> Result<gs::DepthImage, gs::Error> {
    let full = gs::BinaryMask::from_threshold(&gs::MaskImage::filled(size, 1.0), 0.5);
    let range = gs::DepthRangeBuffer::aggregate(
        &full,
        gs::SplatSource::projected_splats(source),
        size,
        &gs::AggregateConfig::default().with_probe(gs::FootprintProbe::Ellipse),
    );

    let values = (0..size.y as i32)
        .flat_map(|y| (0..size.x as i32).map(move |x| (x, y)))
        .map(|(x, y)| {
            let native = range.nearest_at(x, y).unwrap_or(1.0);
            let external = 0.8 * native + 0.05;
            if inverted { 1.0 - external } else { external }
        })
        .collect::<Vec<_>>();

    gs::DepthImage::from_f32(size, 1, &values)
}

fn main() -> Result<(), gs::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let size = UVec2::splat(args.size.max(16));

    let camera = gs::Camera::new(0.1..1e2, 60f32.to_radians());
    let sphere_center = vec3(0.0, 0.0, 3.0);
    let positions = [
        sphere(sphere_center, 0.6, args.sphere),
        wall(vec3(0.0, 0.0, 5.0), 2.5, args.wall),
    ]
    .concat();
    let source =
        gs::ProjectedSplats::project(&camera, size, &positions, 0.02, U8Vec4::splat(255));

    log::info!("Projected {} splats into {size}", positions.len());

    let center = size.as_vec2() * 0.5;
    let mask_radius = size.x as f32 * 0.2;
    let bools = (0..size.y)
        .flat_map(|y| (0..size.x).map(move |x| uvec2(x, y)))
        .map(|p| (p.as_vec2() + Vec2::splat(0.5)).distance(center) <= mask_radius)
        .collect::<Vec<_>>();
    let mask = gs::MaskImage::from_bool(size, &bools)?;
    let depth = external_depth(&source, size, args.inverted)?;

    let flags = args
        .gates
        .iter()
        .fold(gs::GateFlags::empty(), |flags, &gate| flags | gate.into());
    let config = gs::SessionConfig::default().with_gate(
        gs::GateConfig::default()
            .with_flags(flags)
            .with_selection_size(args.selection_size),
    );
    let mut session = gs::SelectionSession::new(config, positions.len());

    let mut request = gs::SelectionRequest::new("synthetic.png", vec![vec2(0.5, 0.5)])
        .with_depth(true)
        .with_focus_points(vec![center]);
    if args.probe {
        request = request.with_probe(center);
    }

    let report = session.apply_images(mask, Some(depth), &source, &camera, &request)?;

    let selection = session.selection().snapshot();
    let on_sphere = selection
        .iter_selected()
        .filter(|&i| i < args.sphere)
        .count();
    let on_wall = selection.count_selected() - on_sphere;

    println!("{}", "Selection run".bold());
    println!("  gates       {:?}", flags);
    println!("  calibration {:?}", report.calibration.calibration());
    if let Some(band) = report.band {
        println!("  band        {:.4} ± {:.4}", band.center, band.half_width);
    }
    if let Some(clip) = report.probe_clip {
        println!(
            "  probe clip  {:.4} ± {:.5}, pruned {}",
            clip.clip_depth, clip.tolerance, report.pruned
        );
    }
    if !report.degraded.is_empty() {
        println!("  {} {:?}", "no data for".yellow(), report.degraded);
    }
    println!(
        "  selected    {} on the sphere, {} on the wall",
        on_sphere.to_string().green(),
        match on_wall {
            0 => on_wall.to_string().green(),
            _ => on_wall.to_string().red(),
        }
    );

    Ok(())
}
