//! Point spread function estimates for deconvolution.

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::consts::{HFR_TO_SIGMA, MAX_PSF_STARS};
use crate::filters::gaussian_blur::{make_gaussian_kernel, odd_kernel_size};

/// How the deconvolution PSF is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsfMethod {
    /// Ideal Gaussian of configured sigma and size.
    #[default]
    Gaussian,
    /// Average of isolated star patches from the detector's star list.
    Stars,
    /// Gaussian whose width follows the session's mean half-flux radius.
    Hfr,
}

impl std::fmt::Display for PsfMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gaussian => write!(f, "Gaussian"),
            Self::Stars => write!(f, "Star patches"),
            Self::Hfr => write!(f, "From HFR"),
        }
    }
}

/// A star centre reported by the star detector, in composite pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StarCenter {
    pub x: f64,
    pub y: f64,
}

/// Normalised 2-D Gaussian of odd size `patch_size` (sum = 1).
pub fn gaussian_psf(patch_size: usize, sigma: f32) -> Array2<f32> {
    let k = make_gaussian_kernel(patch_size, sigma);
    let n = k.len();
    let mut psf = Array2::from_shape_fn((n, n), |(r, c)| k[r] * k[c]);
    let sum = psf.sum();
    if sum > 0.0 {
        psf /= sum;
    }
    psf
}

/// Average of energy-normalised patches around isolated stars.
///
/// Stars whose patch would leave the image, or whose patch contains another
/// star, are skipped; at most 20 patches are used. Returns `None` when no
/// star qualifies.
pub fn star_psf(image: ArrayView2<'_, f32>, stars: &[StarCenter], patch_size: usize) -> Option<Array2<f32>> {
    let size = odd_kernel_size(patch_size);
    let half = (size / 2) as f64;
    let (h, w) = image.dim();

    let mut psf = Array2::<f32>::zeros((size, size));
    let mut used = 0usize;

    for (i, star) in stars.iter().enumerate() {
        let (minx, maxx) = (star.x - half, star.x + half);
        let (miny, maxy) = (star.y - half, star.y + half);
        if minx < 0.0 || miny < 0.0 || maxx >= w as f64 || maxy >= h as f64 {
            continue;
        }

        let crowded = stars.iter().enumerate().any(|(j, other)| {
            j != i && other.x >= minx && other.x <= maxx && other.y >= miny && other.y <= maxy
        });
        if crowded {
            continue;
        }

        let (x0, y0) = (minx.round() as usize, miny.round() as usize);
        if x0 + size > w || y0 + size > h {
            continue;
        }
        let patch = image.slice(s![y0..y0 + size, x0..x0 + size]);
        let floor = patch.iter().copied().fold(f32::INFINITY, f32::min);
        let patch = patch.mapv(|v| v - floor);
        let energy = patch.sum();
        if energy <= 0.0 || !energy.is_finite() {
            continue;
        }
        psf.scaled_add(1.0 / energy, &patch);
        used += 1;

        if used >= MAX_PSF_STARS {
            break;
        }
    }

    if used == 0 {
        return None;
    }
    let sum = psf.sum();
    psf /= sum;
    Some(psf)
}

/// Gaussian PSF matched to a half-flux radius.
///
/// Sigma is `hfr / 1.177` clamped to [0.5, 5]; the size is about six sigma,
/// odd and at least 7. Returns `None` for implausible radii.
pub fn hfr_psf(hfr: f64) -> Option<Array2<f32>> {
    if !hfr.is_finite() || hfr <= 0.1 || hfr > 20.0 {
        return None;
    }
    let sigma = (hfr as f32 / HFR_TO_SIGMA).clamp(0.5, 5.0);
    let size = ((6.0 * sigma) as usize | 1).max(7);
    Some(gaussian_psf(size, sigma))
}
