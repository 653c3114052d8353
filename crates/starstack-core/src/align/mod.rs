pub mod homography;
pub mod warp;
pub mod wcs;

pub use homography::{Displacement, Homography};
pub use warp::{warp_frame, Interpolation};
pub use wcs::Wcs;

use crate::error::Result;
use crate::frame::Frame;

/// Compute the transform that maps `target` pixels onto `reference` pixels.
///
/// Five canonical reference points (the four corners and the centre of a
/// `width x height` full-resolution image) are sent through the reference
/// solution to the sky and back into the target image; the homography is
/// fitted to those correspondences.
pub fn compute_transform(
    reference: &Wcs,
    target: &Wcs,
    width: usize,
    height: usize,
) -> Result<Homography> {
    let (xm, ym) = (width as f64 - 1.0, height as f64 - 1.0);
    let reference_points = [
        (0.0, 0.0),
        (xm, 0.0),
        (0.0, ym),
        (xm, ym),
        (xm / 2.0, ym / 2.0),
    ];

    let mut target_points = Vec::with_capacity(reference_points.len());
    for &(x, y) in &reference_points {
        let (ra, dec) = reference.pixel_to_world(x, y)?;
        target_points.push(target.world_to_pixel(ra, dec)?);
    }

    Homography::estimate(&target_points, &reference_points)
}

/// Register one sub against the reference solution.
///
/// The transform is fitted at full resolution (`full_width x full_height`)
/// and rescaled when the working frames are downscaled by `downscale`.
pub fn align_frame(
    frame: &Frame,
    reference: &Wcs,
    target: &Wcs,
    full_width: usize,
    full_height: usize,
    downscale: usize,
    kernel: Interpolation,
) -> Result<(Frame, Displacement)> {
    let transform = compute_transform(reference, target, full_width, full_height)?
        .rescaled(downscale);
    let displacement = transform.decompose(frame.width(), frame.height());
    let warped = warp_frame(frame, &transform, kernel)?;
    Ok((warped, displacement))
}
