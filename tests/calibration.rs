use wgpu_3dgs_mask_select::{
    CalibrationConfig, CalibrationOutcome, CalibrationSkip, DepthCalibration, DepthCalibrator,
    DepthRangeBuffer, DepthSample, Moments, calibration_rmse, collect_depth_samples,
    reservoir_sample, glam::*,
};

use crate::common::given;

/// Deterministic noise in `[-1, 1]`.
fn noise(i: usize) -> f32 {
    ((i as f32 * 12.9898).sin() * 43758.547).fract().abs() * 2.0 - 1.0
}

fn affine_samples(count: usize, scale: f32, bias: f32, inverted: bool) -> Vec<DepthSample> {
    (0..count)
        .map(|i| {
            let e = 0.1 + 0.8 * i as f32 / (count - 1) as f32;
            let x = if inverted { 1.0 - e } else { e };
            DepthSample::new(e, scale * x + bias + noise(i) * 0.002)
        })
        .collect()
}

fn fitted(outcome: CalibrationOutcome) -> DepthCalibration {
    match outcome {
        CalibrationOutcome::Fitted { calibration, .. } => calibration,
        CalibrationOutcome::Retained { reason, .. } => panic!("calibration retained: {reason:?}"),
    }
}

#[test]
fn test_depth_calibration_identity_should_not_be_fitted() {
    let calibration = DepthCalibration::default();

    assert!(!calibration.is_fitted());
    assert_eq!(calibration.map(0.25), 0.25);
    assert!((DepthCalibration::new(0.5, 0.1, true).map(0.2) - 0.5).abs() < 1e-6);
}

#[test]
fn test_depth_calibrator_calibrate_should_recover_affine_map() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());

    let calibration = fitted(calibrator.calibrate(&affine_samples(200, 0.6, 0.1, false)));

    assert!(!calibration.inverted);
    assert!((calibration.scale - 0.6).abs() <= 0.6 * 0.05);
    assert!((calibration.bias - 0.1).abs() <= 0.01);
    assert!(calibration.residual < 0.01);
    assert_eq!(calibration.sample_count, 200);
    assert_eq!(calibrator.current(), &calibration);
}

#[test]
fn test_depth_calibrator_calibrate_should_select_inverted_polarity() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());

    let calibration = fitted(calibrator.calibrate(&affine_samples(150, 0.5, 0.2, true)));

    assert!(calibration.inverted);
    assert!((calibration.scale - 0.5).abs() <= 0.5 * 0.05);
    assert!((calibration.bias - 0.2).abs() <= 0.01);
}

#[test]
fn test_depth_calibrator_calibrate_should_clamp_parameters() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());

    let calibration = fitted(calibrator.calibrate(&affine_samples(100, 5.0, -2.0, false)));

    assert_eq!(calibration.scale, 2.0);
    assert!(calibration.bias >= -0.3 && calibration.bias <= 0.3);
    assert!(calibration.scale.is_finite() && calibration.bias.is_finite());
}

#[test]
fn test_depth_calibrator_calibrate_should_skip_with_insufficient_samples() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());

    let outcome = calibrator.calibrate(&affine_samples(5, 0.6, 0.1, false));

    assert_eq!(
        outcome,
        CalibrationOutcome::Retained {
            calibration: DepthCalibration::IDENTITY,
            reason: CalibrationSkip::InsufficientSamples {
                found: 5,
                required: 12
            },
        }
    );
    assert!(!calibrator.current().is_fitted());
}

#[test]
fn test_depth_calibrator_calibrate_should_ignore_non_finite_samples() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());
    let mut samples = affine_samples(100, 0.6, 0.1, false);
    samples.push(DepthSample::new(f32::NAN, 0.5));
    samples.push(DepthSample::new(0.5, f32::INFINITY));

    let calibration = fitted(calibrator.calibrate(&samples));

    assert_eq!(calibration.sample_count, 100);
    assert!((calibration.scale - 0.6).abs() <= 0.6 * 0.05);
}

#[test]
fn test_depth_calibrator_calibrate_should_keep_previous_on_zero_variance() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());
    let previous = fitted(calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false)));

    let flat = (0..50)
        .map(|i| DepthSample::new(0.5, 0.3 + i as f32 * 0.001))
        .collect::<Vec<_>>();
    let outcome = calibrator.calibrate(&flat);

    assert_eq!(
        outcome,
        CalibrationOutcome::Retained {
            calibration: previous,
            reason: CalibrationSkip::Degenerate,
        }
    );
    assert_eq!(calibrator.current(), &previous);
}

#[test]
fn test_depth_calibrator_calibrate_should_respect_lock_and_disable() {
    let mut locked = DepthCalibrator::new(CalibrationConfig::default().with_locked(true));
    let mut disabled = DepthCalibrator::new(CalibrationConfig::default().with_enabled(false));
    let samples = affine_samples(100, 0.6, 0.1, false);

    assert!(matches!(
        locked.calibrate(&samples),
        CalibrationOutcome::Retained {
            reason: CalibrationSkip::Locked,
            ..
        }
    ));
    assert!(matches!(
        disabled.calibrate(&samples),
        CalibrationOutcome::Retained {
            reason: CalibrationSkip::Disabled,
            ..
        }
    ));
}

#[test]
fn test_depth_calibrator_set_current_should_survive_lock_until_reset() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default().with_locked(true));
    let manual = DepthCalibration::new(0.5, 0.2, true);

    calibrator.set_current(manual);
    calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false));
    assert_eq!(calibrator.current(), &manual);

    calibrator.reset();
    assert_eq!(calibrator.current(), &DepthCalibration::IDENTITY);
}

#[test]
fn test_depth_calibrator_calibrate_should_smooth_across_runs() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default().with_smoothing(0.35));
    let first = fitted(calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false)));
    let second = fitted(calibrator.calibrate(&affine_samples(100, 1.0, 0.1, false)));

    let expected = first.scale + 0.35 * (1.0 - first.scale);
    assert!((second.scale - expected).abs() < 0.02);
    assert!(second.scale < 0.9);
}

#[test]
fn test_depth_calibrator_calibrate_should_hard_replace_on_polarity_switch() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());
    fitted(calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false)));

    let outcome = calibrator.calibrate(&affine_samples(100, 0.5, 0.2, true));

    match outcome {
        CalibrationOutcome::Fitted {
            calibration,
            polarity_switched,
        } => {
            assert!(polarity_switched);
            assert!(calibration.inverted);
            assert!((calibration.scale - 0.5).abs() <= 0.5 * 0.05);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_depth_calibrator_calibrate_should_hold_polarity_within_hysteresis() {
    let mut calibrator =
        DepthCalibrator::new(CalibrationConfig::default().with_hysteresis(1.0));
    fitted(calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false)));

    let calibration = fitted(calibrator.calibrate(&affine_samples(100, 0.5, 0.2, true)));

    assert!(!calibration.inverted);
}

/// Samples with a weak negative slope, so both polarities clamp to the minimum scale and the
/// inverted fit wins by `(0.3 - slope) / (0.3 + slope)` of the direct RMSE.
fn sloped_samples(slope: f32) -> Vec<DepthSample> {
    (0..100)
        .map(|i| {
            let e = 0.1 + 0.8 * i as f32 / 99.0;
            DepthSample::new(e, 0.4 - slope * (e - 0.5))
        })
        .collect()
}

#[test]
fn test_depth_calibrator_calibrate_should_hold_polarity_below_default_margin() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());
    fitted(calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false)));

    let outcome = calibrator.calibrate(&sloped_samples(0.005));

    assert!(matches!(
        outcome,
        CalibrationOutcome::Fitted {
            calibration: DepthCalibration {
                inverted: false,
                ..
            },
            polarity_switched: false,
        }
    ));
}

#[test]
fn test_depth_calibrator_calibrate_should_flip_polarity_above_default_margin() {
    let mut calibrator = DepthCalibrator::new(CalibrationConfig::default());
    fitted(calibrator.calibrate(&affine_samples(100, 0.6, 0.1, false)));

    let outcome = calibrator.calibrate(&sloped_samples(0.1));

    assert!(matches!(
        outcome,
        CalibrationOutcome::Fitted {
            calibration: DepthCalibration { inverted: true, .. },
            polarity_switched: true,
        }
    ));
}

#[test]
fn test_moments_fit_should_match_closed_form() {
    let samples = [
        DepthSample::new(0.0, 0.1),
        DepthSample::new(0.5, 0.35),
        DepthSample::new(1.0, 0.6),
    ];

    let (scale, bias) = Moments::from_samples(&samples, false)
        .fit((0.3, 2.0), (-0.3, 0.3))
        .expect("fit");

    assert!((scale - 0.5).abs() < 1e-5);
    assert!((bias - 0.1).abs() < 1e-5);
    assert_eq!(Moments::from_samples(&samples[..1], false).fit((0.3, 2.0), (-0.3, 0.3)), None);
}

#[test]
fn test_calibration_rmse_should_be_zero_for_exact_fit() {
    let samples = affine_samples(20, 0.6, 0.1, false)
        .into_iter()
        .map(|s| DepthSample::new(s.external, 0.6 * s.external + 0.1))
        .collect::<Vec<_>>();

    let rmse = calibration_rmse(&DepthCalibration::new(0.6, 0.1, false), &samples);

    assert!(rmse < 1e-6);
    assert_eq!(
        calibration_rmse(&DepthCalibration::IDENTITY, &[]),
        f32::INFINITY
    );
}

#[test]
fn test_reservoir_sample_should_be_bounded_and_deterministic() {
    let items = (0..1000).collect::<Vec<u32>>();

    let a = reservoir_sample(&items, 64, 7);
    let b = reservoir_sample(&items, 64, 7);

    assert_eq!(a.len(), 64);
    assert_eq!(a, b);
    assert_eq!(reservoir_sample(&items[..10], 64, 7), items[..10].to_vec());
}

#[test]
fn test_collect_depth_samples_should_pair_mid_depth_with_external() {
    let buffer = DepthRangeBuffer::new(given::VIEWPORT);
    buffer.record(ivec2(3, 4), 0.2);
    buffer.record(ivec2(3, 4), 0.4);
    let depth = given::depth(|p| p.x as f32 / 100.0);

    let samples = collect_depth_samples(&buffer, &depth);

    assert_eq!(samples.len(), 1);
    assert!((samples[0].native - 0.3).abs() < 1e-4);
    assert!((samples[0].external - 0.03).abs() < 1e-6);
}
