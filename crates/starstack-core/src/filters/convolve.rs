use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Correlate a plane with a full 2-D kernel, replicating border pixels.
///
/// `out[r, c] = sum k[i, j] * data[r + i - kh/2, c + j - kw/2]`. Correlating
/// with [`flipped`] applies the adjoint of the same operator.
pub fn correlate2d(data: ArrayView2<'_, f32>, kernel: ArrayView2<'_, f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    let (kh, kw) = kernel.dim();
    let (ry, rx) = ((kh / 2) as isize, (kw / 2) as isize);
    let mut result = Array2::<f32>::zeros((h, w));
    if h == 0 || w == 0 {
        return result;
    }

    let fill_row = |(row, mut out): (usize, ArrayViewMut1<'_, f32>)| {
        for col in 0..w {
            let mut sum = 0.0f32;
            for ((i, j), &kv) in kernel.indexed_iter() {
                if kv == 0.0 {
                    continue;
                }
                let r = (row as isize + i as isize - ry).clamp(0, h as isize - 1) as usize;
                let c = (col as isize + j as isize - rx).clamp(0, w as isize - 1) as usize;
                sum += data[[r, c]] * kv;
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

/// Kernel rotated by 180 degrees.
pub fn flipped(kernel: ArrayView2<'_, f32>) -> Array2<f32> {
    let (kh, kw) = kernel.dim();
    Array2::from_shape_fn((kh, kw), |(i, j)| kernel[[kh - 1 - i, kw - 1 - j]])
}
