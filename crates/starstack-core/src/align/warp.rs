use std::f64::consts::PI;

use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::align::homography::Homography;
use crate::consts::{LANCZOS_A, PARALLEL_PIXEL_THRESHOLD};
use crate::error::Result;
use crate::frame::Frame;

/// Resampling kernel used when warping a sub into the reference frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Windowed sinc over an 8x8 neighbourhood.
    #[default]
    Lanczos4,
    /// Catmull-Rom cubic over a 4x4 neighbourhood.
    Bicubic,
}

impl std::fmt::Display for Interpolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lanczos4 => write!(f, "Lanczos-4"),
            Self::Bicubic => write!(f, "Bicubic"),
        }
    }
}

impl Interpolation {
    fn radius(self) -> usize {
        match self {
            Self::Lanczos4 => LANCZOS_A,
            Self::Bicubic => 2,
        }
    }

    #[inline]
    fn weight(self, x: f64) -> f64 {
        match self {
            Self::Lanczos4 => lanczos(x, LANCZOS_A as f64),
            Self::Bicubic => catmull_rom(x),
        }
    }
}

#[inline]
fn lanczos(x: f64, a: f64) -> f64 {
    let ax = x.abs();
    if ax < 1e-9 {
        return 1.0;
    }
    if ax >= a {
        return 0.0;
    }
    let pi_x = PI * x;
    let pi_x_a = pi_x / a;
    (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
}

#[inline]
fn catmull_rom(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        1.5 * ax * ax * ax - 2.5 * ax * ax + 1.0
    } else if ax < 2.0 {
        -0.5 * ax * ax * ax + 2.5 * ax * ax - 4.0 * ax + 2.0
    } else {
        0.0
    }
}

/// Resample `frame` so that it lines up with the reference grid.
///
/// `transform` maps source pixels onto reference pixels; every output pixel
/// is pulled from the source through its inverse. Samples falling outside the
/// source read as zero.
pub fn warp_frame(frame: &Frame, transform: &Homography, kernel: Interpolation) -> Result<Frame> {
    let inverse = transform.inverse()?;
    Ok(frame.map_channels(|plane| warp_plane(plane, &inverse, kernel)))
}

fn warp_plane(src: ArrayView2<'_, f32>, inverse: &Homography, kernel: Interpolation) -> Array2<f32> {
    let (h, w) = src.dim();
    let mut out = Array2::<f32>::zeros((h, w));

    let fill_row = |(row, mut line): (usize, ArrayViewMut1<'_, f32>)| {
        for col in 0..w {
            line[col] = match inverse.apply(col as f64, row as f64) {
                Some((sx, sy)) => sample(&src, sx, sy, kernel),
                None => 0.0,
            };
        }
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(fill_row);
    } else {
        out.axis_iter_mut(Axis(0)).enumerate().for_each(fill_row);
    }
    out
}

/// Interpolate `data` at a fractional position with a separable kernel.
pub fn sample(data: &ArrayView2<'_, f32>, x: f64, y: f64, kernel: Interpolation) -> f32 {
    let (h, w) = data.dim();
    let r = kernel.radius() as isize;
    if !x.is_finite()
        || !y.is_finite()
        || x < -(r as f64)
        || y < -(r as f64)
        || x > (w as f64 + r as f64)
        || y > (h as f64 + r as f64)
    {
        return 0.0;
    }

    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let taps = (2 * r) as usize;

    let mut wx = [0.0f64; 2 * LANCZOS_A];
    let mut wy = [0.0f64; 2 * LANCZOS_A];
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    for i in 0..taps {
        let offset = i as isize - r + 1;
        wx[i] = kernel.weight(x - (x0 + offset) as f64);
        wy[i] = kernel.weight(y - (y0 + offset) as f64);
        sum_x += wx[i];
        sum_y += wy[i];
    }
    if sum_x.abs() < 1e-12 || sum_y.abs() < 1e-12 {
        return 0.0;
    }

    let mut acc = 0.0f64;
    for j in 0..taps {
        let py = y0 + j as isize - r + 1;
        if py < 0 || py >= h as isize || wy[j] == 0.0 {
            continue;
        }
        let mut row_acc = 0.0f64;
        for i in 0..taps {
            let px = x0 + i as isize - r + 1;
            if px < 0 || px >= w as isize {
                continue;
            }
            row_acc += wx[i] * data[[py as usize, px as usize]] as f64;
        }
        acc += wy[j] * row_acc;
    }

    (acc / (sum_x * sum_y)) as f32
}
