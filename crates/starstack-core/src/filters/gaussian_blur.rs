use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::frame::Frame;

/// Blur every channel with a separable Gaussian of the given size and sigma.
pub fn gaussian_blur(frame: &Frame, kernel_size: usize, sigma: f32) -> Frame {
    let kernel = make_gaussian_kernel(kernel_size, sigma);
    frame.map_channels(|plane| blur_plane(plane, &kernel))
}

fn blur_plane(data: ArrayView2<'_, f32>, kernel: &[f32]) -> Array2<f32> {
    let row_pass = convolve(data, kernel, Axis(1));
    convolve(row_pass.view(), kernel, Axis(0))
}

/// Normalised 1-D Gaussian.
///
/// Even sizes are bumped to the next odd size and sizes below 3 become 3. A
/// non-positive sigma is derived from the size as `0.3 * ((size - 1) / 2 - 1) + 0.8`.
pub fn make_gaussian_kernel(kernel_size: usize, sigma: f32) -> Vec<f32> {
    let size = odd_kernel_size(kernel_size);
    let radius = size / 2;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };

    let s2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / s2).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Force a kernel size to be odd and at least 3.
pub fn odd_kernel_size(size: usize) -> usize {
    let size = size.max(3);
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Convolve along `axis` (1 = within rows, 0 = within columns) with
/// replicated borders.
fn convolve(data: ArrayView2<'_, f32>, kernel: &[f32], axis: Axis) -> Array2<f32> {
    let (h, w) = data.dim();
    let radius = kernel.len() as isize / 2;
    let mut result = Array2::<f32>::zeros((h, w));

    let fill_row = |(row, mut out): (usize, ArrayViewMut1<'_, f32>)| {
        for col in 0..w {
            let mut sum = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let offset = ki as isize - radius;
                let v = if axis == Axis(1) {
                    let c = (col as isize + offset).clamp(0, w as isize - 1) as usize;
                    data[[row, c]]
                } else {
                    let r = (row as isize + offset).clamp(0, h as isize - 1) as usize;
                    data[[r, col]]
                };
                sum += v * kv;
            }
            out[col] = sum;
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(fill_row);
    } else {
        result.axis_iter_mut(Axis(0)).enumerate().for_each(fill_row);
    }
    result
}
