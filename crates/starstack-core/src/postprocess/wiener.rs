use ndarray::{Array2, ArrayView2, Zip};
use num_complex::Complex;

use crate::compute::fft::{fft2d_forward, ifft2d_inverse};
use crate::consts::{MAD_TO_SIGMA, WIENER_MIN_RATIO};
use crate::error::{Result, StackError};
use crate::frame::Frame;
use crate::stack::median::median_in_place;

/// Wiener-deconvolve every channel and blend with the input.
///
/// `amount` is the mix fraction: 0 keeps the image, 1 returns the fully
/// deconvolved result.
pub fn wiener_deconvolve(frame: &Frame, psf: &Array2<f32>, amount: f32) -> Result<Frame> {
    let amount = amount.clamp(0.0, 1.0);
    let mut planes = Vec::with_capacity(frame.channels());
    for c in 0..frame.channels() {
        let plane = frame.channel(c);
        let restored = wiener_plane(plane, psf.view())?;
        let blended = Zip::from(&plane)
            .and(&restored)
            .map_collect(|&orig, &dec| amount * dec + (1.0 - amount) * orig);
        planes.push(blended);
    }
    Frame::from_channels(planes).ok_or(StackError::EmptySequence)
}

/// Deconvolve a single plane with a noise-to-signal ratio estimated from
/// the plane itself.
pub fn wiener_plane(plane: ArrayView2<'_, f32>, psf: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    let (h, w) = plane.dim();
    let (kh, kw) = psf.dim();
    if kh > h || kw > w || kh == 0 || kw == 0 {
        return Err(StackError::PostProcess(format!(
            "PSF {kh}x{kw} does not fit a {h}x{w} image"
        )));
    }

    let nsr = noise_to_signal(plane);
    let image = plane.mapv(|v| v as f64);
    let kernel = wrap_psf(psf, h, w);

    let g = fft2d_forward(image.view());
    let big_h = fft2d_forward(kernel.view());

    let filtered = Zip::from(&g).and(&big_h).map_collect(|&gv, &hv| {
        let denom = hv.norm_sqr() + nsr;
        hv.conj() * gv / Complex::new(denom, 0.0)
    });
    let restored = ifft2d_inverse(&filtered);

    if restored.iter().any(|v| !v.is_finite()) {
        return Err(StackError::PostProcess(
            "deconvolution produced non-finite samples".into(),
        ));
    }
    Ok(restored.mapv(|v| v.max(0.0) as f32))
}

/// Place a small PSF on an `h x w` canvas with its centre at the origin,
/// wrapping negative offsets around. The restored image is then registered
/// with the input and needs no shift afterwards.
fn wrap_psf(psf: ArrayView2<'_, f32>, h: usize, w: usize) -> Array2<f64> {
    let (kh, kw) = psf.dim();
    let (cy, cx) = (kh / 2, kw / 2);
    let mut out = Array2::<f64>::zeros((h, w));
    for ((r, c), &v) in psf.indexed_iter() {
        let y = (r as isize - cy as isize).rem_euclid(h as isize) as usize;
        let x = (c as isize - cx as isize).rem_euclid(w as isize) as usize;
        out[[y, x]] += v as f64;
    }
    let sum = out.sum();
    if sum.abs() > 0.0 {
        out /= sum;
    }
    out
}

/// Noise from the MAD, signal from the remaining variance.
fn noise_to_signal(plane: ArrayView2<'_, f32>) -> f64 {
    let mut values: Vec<f64> = plane.iter().map(|&v| v as f64).collect();
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let total_var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let median = median_in_place(&mut values).unwrap_or(0.0);
    for v in values.iter_mut() {
        *v = (*v - median).abs();
    }
    let mad = median_in_place(&mut values).unwrap_or(0.0);
    let noise_var = (MAD_TO_SIGMA as f64 * mad).powi(2);

    let signal_var = (total_var - noise_var).max(WIENER_MIN_RATIO);
    (noise_var / signal_var).max(WIENER_MIN_RATIO)
}
