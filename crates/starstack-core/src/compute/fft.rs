//! 2-D FFT helpers built from row and column passes of `rustfft`.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis};
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Forward 2-D FFT of a real array.
pub fn fft2d_forward(data: ArrayView2<'_, f64>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = data.mapv(|v| Complex::new(v, 0.0));
    transform_lanes(&mut result, Axis(0), &fft_row);
    transform_lanes(&mut result, Axis(1), &fft_col);
    result
}

/// Inverse 2-D FFT, returning the real part normalised by `1/(h*w)`.
pub fn ifft2d_inverse(data: &Array2<Complex<f64>>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(w);
    let ifft_col = planner.plan_fft_inverse(h);

    let mut work = data.clone();
    transform_lanes(&mut work, Axis(1), &ifft_col);
    transform_lanes(&mut work, Axis(0), &ifft_row);

    let scale = 1.0 / (h * w) as f64;
    work.mapv(|c| c.re * scale)
}

/// Run `fft` over every 1-D lane of `data`.
///
/// `Axis(0)` visits each row, `Axis(1)` each column.
fn transform_lanes(data: &mut Array2<Complex<f64>>, axis: Axis, fft: &Arc<dyn Fft<f64>>) {
    let (h, w) = data.dim();
    let process = |mut lane: ndarray::ArrayViewMut1<'_, Complex<f64>>| {
        let mut buf: Vec<Complex<f64>> = lane.to_vec();
        fft.process(&mut buf);
        for (dst, src) in lane.iter_mut().zip(buf) {
            *dst = src;
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        data.axis_iter_mut(axis).into_par_iter().for_each(process);
    } else {
        data.axis_iter_mut(axis).for_each(process);
    }
}
