use wgpu_3dgs_mask_select::{
    CalibrationOutcome, GateConfig, GateFlags, ProbeClip, SelectionRequest, SelectionSession,
    SessionConfig, SetOp, SplatSource, glam::*,
};

use crate::common::given;

fn request() -> SelectionRequest {
    SelectionRequest::new("frame.png", vec![vec2(0.5, 0.5)])
}

/// Horizontal pixel pairs fully inside a disk, the pair shares one depth.
fn disk_pairs(center: Vec2, radius: f32, count: usize) -> Vec<UVec2> {
    let inside = |p: UVec2| (p.as_vec2() + Vec2::splat(0.5)).distance(center) <= radius;
    (0..given::VIEWPORT.y)
        .flat_map(|y| (0..given::VIEWPORT.x).step_by(2).map(move |x| uvec2(x, y)))
        .filter(|&p| inside(p) && inside(p + UVec2::X))
        .take(count)
        .collect()
}

#[test]
fn test_selection_run_should_keep_front_surface_and_reject_decoys_behind_it() {
    let center = vec2(64.0, 64.0);
    let pairs = disk_pairs(center, 16.0, 250);
    assert_eq!(pairs.len(), 250);

    let surface = pairs
        .iter()
        .enumerate()
        .flat_map(|(i, &p)| {
            let depth = 0.40 + 0.05 * (i % 11) as f32 / 10.0;
            [
                given::splat_at_pixel(p, depth),
                given::splat_at_pixel(p + UVec2::X, depth),
            ]
        })
        .collect::<Vec<_>>();
    let decoys = surface
        .iter()
        .map(|s| given::splat_at(s.screen_pos(given::VIEWPORT), 0.9))
        .collect::<Vec<_>>();
    let source = given::splats([surface, decoys].concat());
    assert_eq!(source.splat_count(), 1000);

    let config = SessionConfig::default()
        .with_gate(GateConfig::default().with_flags(GateFlags::FRONT));
    let mut session = SelectionSession::new(config, source.splat_count());

    let report = session
        .apply_images(
            given::disk_mask(center, 16.0),
            Some(given::checker_depth(0.8, 0.01)),
            &source,
            &given::camera(),
            &request().with_depth(true),
        )
        .expect("run");

    let CalibrationOutcome::Fitted { calibration, .. } = report.calibration else {
        panic!("calibration not fitted: {:?}", report.calibration);
    };
    assert!(!calibration.inverted);
    assert!((calibration.map(0.8) - 0.54).abs() < 0.01);
    assert!(report.degraded.is_empty());

    let selected = session.selection().snapshot();
    assert_eq!(selected.count_selected(), 500);
    assert!(selected.iter_selected().all(|i| i < 500));
}

#[test]
fn test_selection_run_should_subtract_masked_half_from_full_selection() {
    let source = given::splats(
        (0..1000u32)
            .map(|i| given::splat_at_pixel(uvec2(44 + i % 40, 50 + i / 40), 0.5))
            .collect(),
    );
    let mut session = SelectionSession::new(SessionConfig::default(), source.splat_count());
    session.select_all(source.splat_count());

    let report = session
        .apply_images(
            given::mask(|p| p.x < 64),
            None,
            &source,
            &given::camera(),
            &request().with_op(SetOp::Subtract),
        )
        .expect("run");

    assert_eq!(report.selected_before, 1000);
    assert_eq!(report.decided, 500);
    assert_eq!(report.selected_after, 500);
    assert!(
        session
            .selection()
            .snapshot()
            .iter_selected()
            .all(|i| i % 40 >= 20)
    );
}

#[test]
fn test_selection_probe_clip_should_deselect_everything_behind_it() {
    let source = given::splats(
        (0..60u32)
            .map(|i| given::splat_at_pixel(uvec2(i, 10), 0.305 + 0.01 * i as f32))
            .collect(),
    );
    let session = SelectionSession::new(SessionConfig::default(), source.splat_count());
    session.select_all(source.splat_count());

    let pruned = session.prune(&ProbeClip::new(0.5, 0.05), &source, &given::camera());

    assert_eq!(pruned, 35);
    assert_eq!(session.count_selected(), 25);
    assert!(
        session
            .selection()
            .snapshot()
            .iter_selected()
            .all(|i| source.projected_splats()[i].native_depth() <= 0.55)
    );
}
