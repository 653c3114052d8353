mod common;

use approx::assert_abs_diff_eq;
use nalgebra::Matrix3;
use ndarray::Array2;

use starstack_core::align::warp::sample;
use starstack_core::align::{
    align_frame, compute_transform, warp_frame, Homography, Interpolation, Wcs,
};
use starstack_core::frame::Frame;

use common::{noisy_frame, test_wcs};

// ---------------------------------------------------------------------------
// WCS
// ---------------------------------------------------------------------------

#[test]
fn test_wcs_reference_pixel_maps_to_crval() {
    let wcs = test_wcs(64, 48);
    let (ra, dec) = wcs
        .pixel_to_world(wcs.crpix.0 - 1.0, wcs.crpix.1 - 1.0)
        .unwrap();
    assert_abs_diff_eq!(ra, 180.0, epsilon = 1e-9);
    assert_abs_diff_eq!(dec, 45.0, epsilon = 1e-9);
}

#[test]
fn test_wcs_pixel_world_pixel() {
    let wcs = Wcs::from_scale_rotation((512.5, 384.5), (83.82, -5.39), 1.2, 27.0);
    let (ra, dec) = wcs.pixel_to_world(10.25, 700.5).unwrap();
    let (x, y) = wcs.world_to_pixel(ra, dec).unwrap();
    assert_abs_diff_eq!(x, 10.25, epsilon = 1e-6);
    assert_abs_diff_eq!(y, 700.5, epsilon = 1e-6);
}

#[test]
fn test_wcs_pixel_scale() {
    let wcs = Wcs::from_scale_rotation((1.0, 1.0), (0.0, 0.0), 2.5, 45.0);
    assert_abs_diff_eq!(wcs.pixel_scale_arcsec(), 2.5, epsilon = 1e-9);
}

#[test]
fn test_wcs_near_pole_wraps_ra() {
    let wcs = Wcs::from_scale_rotation((100.5, 100.5), (0.0, 89.9), 10.0, 0.0);
    let (ra, _) = wcs.pixel_to_world(0.0, 0.0).unwrap();
    assert!((0.0..360.0).contains(&ra));
}

#[test]
fn test_wcs_far_side_is_error() {
    let wcs = test_wcs(64, 48);
    assert!(wcs.world_to_pixel(0.0, -45.0).is_err());
}

#[test]
fn test_wcs_singular_cd_is_rejected() {
    let wcs = Wcs::new((1.0, 1.0), (10.0, 10.0), [[0.0, 0.0], [0.0, 0.0]]);
    assert!(wcs.validate().is_err());
    assert!(test_wcs(64, 48).validate().is_ok());
}

#[test]
fn test_wcs_downscaled_agrees_with_full_resolution() {
    let wcs = test_wcs(64, 48);
    let half = wcs.downscaled(2);
    assert_abs_diff_eq!(half.pixel_scale_arcsec(), 3.0, epsilon = 1e-9);

    let full = wcs.pixel_to_world(20.0, 30.0).unwrap();
    let small = half.pixel_to_world(10.0, 15.0).unwrap();
    assert_abs_diff_eq!(full.0, small.0, epsilon = 1e-9);
    assert_abs_diff_eq!(full.1, small.1, epsilon = 1e-9);
}

// ---------------------------------------------------------------------------
// Homography
// ---------------------------------------------------------------------------

#[test]
fn test_homography_recovers_translation() {
    let src = [(0.0, 0.0), (100.0, 0.0), (0.0, 80.0), (100.0, 80.0), (50.0, 40.0)];
    let dst: Vec<(f64, f64)> = src.iter().map(|&(x, y)| (x + 5.5, y - 3.0)).collect();
    let h = Homography::estimate(&src, &dst).unwrap();
    let (x, y) = h.apply(30.0, 30.0).unwrap();
    assert_abs_diff_eq!(x, 35.5, epsilon = 1e-6);
    assert_abs_diff_eq!(y, 27.0, epsilon = 1e-6);
}

#[test]
fn test_homography_recovers_rotation() {
    let angle = 10f64.to_radians();
    let (s, c) = angle.sin_cos();
    let src = [(0.0, 0.0), (200.0, 0.0), (0.0, 150.0), (200.0, 150.0), (100.0, 75.0)];
    let dst: Vec<(f64, f64)> = src
        .iter()
        .map(|&(x, y)| (c * x - s * y + 4.0, s * x + c * y - 2.0))
        .collect();
    let h = Homography::estimate(&src, &dst).unwrap();
    let d = h.decompose(200, 150);
    assert_abs_diff_eq!(d.rotation_deg, 10.0, epsilon = 1e-6);
}

#[test]
fn test_homography_needs_four_points() {
    let pts = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)];
    assert!(Homography::estimate(&pts, &pts).is_err());
}

#[test]
fn test_homography_degenerate_points() {
    let pts = [(5.0, 5.0); 5];
    assert!(Homography::estimate(&pts, &pts).is_err());
}

#[test]
fn test_homography_rescaled_translation() {
    let h = Homography::from_matrix(Matrix3::new(1.0, 0.0, 8.0, 0.0, 1.0, -4.0, 0.0, 0.0, 1.0));
    let half = h.rescaled(2);
    let (x, y) = half.apply(10.0, 10.0).unwrap();
    assert_abs_diff_eq!(x, 14.0, epsilon = 1e-12);
    assert_abs_diff_eq!(y, 8.0, epsilon = 1e-12);
    assert_eq!(h.rescaled(1), h);
}

#[test]
fn test_homography_singular_has_no_inverse() {
    let h = Homography::from_matrix(Matrix3::zeros());
    assert!(h.check().is_err());
    assert!(h.inverse().is_err());
}

// ---------------------------------------------------------------------------
// WCS-driven alignment
// ---------------------------------------------------------------------------

#[test]
fn test_transform_identical_solutions_is_identity() {
    let wcs = test_wcs(64, 48);
    let h = compute_transform(&wcs, &wcs, 64, 48).unwrap();
    let identity = Matrix3::<f64>::identity();
    for (a, b) in h.matrix.iter().zip(identity.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn test_align_identical_sub_is_unchanged() {
    let wcs = test_wcs(64, 48);
    let frame = noisy_frame(starstack_core::frame::ImageShape::new(64, 48, 1), 1000.0, 200.0, 7);
    let (aligned, displacement) =
        align_frame(&frame, &wcs, &wcs, 64, 48, 1, Interpolation::Lanczos4).unwrap();

    assert_abs_diff_eq!(displacement.dx, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(displacement.dy, 0.0, epsilon = 1e-6);
    for (a, b) in aligned.data.iter().zip(frame.data.iter()) {
        assert!((a - b).abs() < 1e-2, "{a} vs {b}");
    }
}

#[test]
fn test_align_shifted_sub() {
    let reference = test_wcs(64, 48);
    let mut target = reference.clone();
    target.crpix = (reference.crpix.0 + 3.0, reference.crpix.1 - 2.0);

    let h = compute_transform(&reference, &target, 64, 48).unwrap();
    let (x, y) = h.apply(10.0, 10.0).unwrap();
    assert_abs_diff_eq!(x, 7.0, epsilon = 1e-4);
    assert_abs_diff_eq!(y, 12.0, epsilon = 1e-4);

    let mut plane = Array2::<f32>::zeros((48, 64));
    plane[[20, 20]] = 1000.0;
    let frame = Frame::from_mono(plane);
    let (aligned, displacement) =
        align_frame(&frame, &reference, &target, 64, 48, 1, Interpolation::Bicubic).unwrap();

    assert_abs_diff_eq!(displacement.dx, -3.0, epsilon = 1e-4);
    assert_abs_diff_eq!(displacement.dy, 2.0, epsilon = 1e-4);
    assert!((aligned.data[[0, 22, 17]] - 1000.0).abs() < 1.0);
    assert!(aligned.data[[0, 20, 20]].abs() < 1.0);
}

#[test]
fn test_warp_outside_source_is_zero() {
    let frame = Frame::from_mono(Array2::from_elem((16, 16), 50.0f32));
    let shift = Homography::from_matrix(Matrix3::new(1.0, 0.0, 100.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0));
    let warped = warp_frame(&frame, &shift, Interpolation::Lanczos4).unwrap();
    assert!(warped.data.iter().all(|&v| v == 0.0));
}

#[test]
fn test_sample_integer_position_is_exact() {
    let plane = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f32);
    let view = plane.view();
    assert_abs_diff_eq!(sample(&view, 4.0, 6.0, Interpolation::Lanczos4), 64.0, epsilon = 1e-4);
    assert_abs_diff_eq!(sample(&view, 4.0, 6.0, Interpolation::Bicubic), 64.0, epsilon = 1e-4);
}

#[test]
fn test_sample_preserves_constant() {
    let plane = Array2::from_elem((12, 12), 7.0f32);
    let view = plane.view();
    assert_abs_diff_eq!(sample(&view, 5.3, 6.7, Interpolation::Lanczos4), 7.0, epsilon = 1e-4);
    assert_abs_diff_eq!(sample(&view, 5.3, 6.7, Interpolation::Bicubic), 7.0, epsilon = 1e-4);
}
