//! Majorise-minimise stacking with a per-sub PSF forward model.
//!
//! Each sub is modelled as the latent image blurred by that sub's PSF plus
//! heavy-tailed noise. Every iteration weights residuals with the Cauchy
//! weight `1 / (1 + r^2 / sigma^2)` and applies a multiplicative update whose
//! per-step factor is bounded by `kappa`, so satellite trails and hot pixels
//! lose their influence instead of being cut at a threshold. Running mode
//! carries the noise scale and a short history of subs; the prior composite
//! seeds the latent image.

use std::sync::Arc;

use ndarray::{s, Array2, Array3, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{
    EPSILON, MAD_TO_SIGMA, MM_DEFAULT_PSF_SIGMA, MM_DEFAULT_PSF_SIZE, MM_MIN_RATIO, MM_MIN_SIGMA,
    MM_PSF_STEP, MM_SAMPLE_STEP, MM_SIGMA_CARRY, MM_SIGMA_FRAMES, MM_TOLERANCE,
};
use crate::error::{Result, StackError};
use crate::filters::convolve::{correlate2d, flipped};
use crate::frame::{Frame, ImageShape};
use crate::postprocess::psf::{gaussian_psf, hfr_psf};
use crate::stack::median::median_in_place;
use crate::stack::CancelToken;

/// Tuning of the ImageMM solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmParams {
    /// Upper bound on solver iterations per pass.
    pub iterations: usize,
    /// Largest factor a pixel may change by in one iteration (> 1).
    pub kappa: f32,
    /// Relaxation toward the previous iterate; 1 disables it.
    pub alpha: f32,
    /// Multiplier on the estimated noise scale.
    pub sigma_scale: f32,
    /// Refine PSFs every this many iterations; 0 keeps them fixed.
    pub psf_update: usize,
    /// Subs kept in memory for later running passes.
    pub history: usize,
}

impl Default for MmParams {
    fn default() -> Self {
        Self {
            iterations: 20,
            kappa: 1.5,
            alpha: 1.0,
            sigma_scale: 1.0,
            psf_update: 0,
            history: 5,
        }
    }
}

/// One sub as seen by the solver.
#[derive(Clone, Debug)]
pub struct MmSub {
    pub frame: Arc<Frame>,
    pub psf: Array2<f32>,
    pub weight: f32,
}

impl MmSub {
    /// Wrap a sub, deriving its PSF from the half-flux radius on the working
    /// grid. Unknown or implausible radii get a fixed Gaussian.
    pub fn new(frame: Arc<Frame>, weight: f32, hfr: f64) -> Self {
        Self {
            frame,
            psf: sub_psf(hfr),
            weight,
        }
    }
}

/// Gaussian PSF for a sub with the given half-flux radius.
pub fn sub_psf(hfr: f64) -> Array2<f32> {
    hfr_psf(hfr).unwrap_or_else(|| gaussian_psf(MM_DEFAULT_PSF_SIZE, MM_DEFAULT_PSF_SIGMA))
}

/// State carried between running passes.
#[derive(Clone, Debug, Default)]
pub struct MmState {
    /// Noise scale of the last iteration.
    pub sigma: f32,
    /// Most recent subs, oldest first, with their refined PSFs.
    pub history: Vec<MmSub>,
}

#[derive(Clone, Debug)]
pub struct MmOutput {
    pub frame: Frame,
    pub state: MmState,
}

/// Stack a batch from scratch, seeding the latent image with the weighted mean.
pub fn image_mm(subs: Vec<MmSub>, params: &MmParams, cancel: &CancelToken) -> Result<MmOutput> {
    let first = subs.first().ok_or(StackError::EmptySequence)?;
    let dim = first.frame.data.dim();
    check_shapes(&subs, dim)?;

    let weights = normalised_weights(&subs);
    let mut latent = Array3::<f32>::zeros(dim);
    for (sub, &w) in subs.iter().zip(&weights) {
        latent.scaled_add(w, &sub.frame.data);
    }

    solve(subs, latent, 0.0, params, cancel)
}

/// Continue from a prior composite, re-using the carried history.
pub fn image_mm_incremental(
    prior: &Frame,
    state: &MmState,
    new: Vec<MmSub>,
    params: &MmParams,
    cancel: &CancelToken,
) -> Result<MmOutput> {
    if new.is_empty() {
        return Err(StackError::EmptySequence);
    }
    let dim = prior.data.dim();
    let mut subs = state.history.clone();
    subs.extend(new);
    check_shapes(&subs, dim)?;

    solve(subs, prior.data.clone(), state.sigma, params, cancel)
}

fn check_shapes(subs: &[MmSub], dim: (usize, usize, usize)) -> Result<()> {
    for sub in subs {
        let actual = sub.frame.data.dim();
        if actual != dim {
            return Err(StackError::ShapeMismatch {
                expected: ImageShape::new(dim.2, dim.1, dim.0),
                actual: ImageShape::new(actual.2, actual.1, actual.0),
            });
        }
    }
    Ok(())
}

/// Weights scaled to sum to one; equal weights when they sum to nothing.
fn normalised_weights(subs: &[MmSub]) -> Vec<f32> {
    let total: f32 = subs.iter().map(|s| s.weight.max(0.0)).sum();
    if total > 0.0 {
        subs.iter().map(|s| s.weight.max(0.0) / total).collect()
    } else {
        vec![1.0 / subs.len() as f32; subs.len()]
    }
}

fn solve(
    mut subs: Vec<MmSub>,
    mut latent: Array3<f32>,
    mut sigma: f32,
    params: &MmParams,
    cancel: &CancelToken,
) -> Result<MmOutput> {
    let weights = normalised_weights(&subs);
    let channels = latent.dim().0;
    let log_kappa = params.kappa.max(1.0).ln();
    let alpha = params.alpha.clamp(0.0, 1.0);
    let mut prev = latent.clone();

    for iter in 0..params.iterations {
        if cancel.is_cancelled() {
            return Err(StackError::Cancelled);
        }
        sigma = estimate_sigma(&subs, &latent, sigma, params.sigma_scale);
        let inv_var = 1.0 / (sigma * sigma);

        for c in 0..channels {
            let plane = latent.index_axis(Axis(0), c);
            let dim = plane.dim();
            let zero = || (Array2::<f32>::zeros(dim), Array2::<f32>::zeros(dim));
            let (num, den) = subs
                .par_iter()
                .zip(&weights)
                .map(|(sub, &weight)| {
                    let observed = sub.frame.channel(c);
                    let blurred = correlate2d(plane, sub.psf.view());
                    let mut wy = Array2::<f32>::zeros(dim);
                    let mut wfx = Array2::<f32>::zeros(dim);
                    Zip::from(&mut wy)
                        .and(&mut wfx)
                        .and(&observed)
                        .and(&blurred)
                        .for_each(|wy, wfx, &y, &fx| {
                            let r = y - fx;
                            let w = weight / (1.0 + r * r * inv_var);
                            *wy = w * y;
                            *wfx = w * fx;
                        });
                    let adjoint = flipped(sub.psf.view());
                    (
                        correlate2d(wy.view(), adjoint.view()),
                        correlate2d(wfx.view(), adjoint.view()),
                    )
                })
                .reduce(zero, |a, b| (a.0 + b.0, a.1 + b.1));

            Zip::from(latent.index_axis_mut(Axis(0), c))
                .and(&num)
                .and(&den)
                .for_each(|x, &n, &d| {
                    let ratio = (n / d.max(MM_MIN_RATIO)).max(MM_MIN_RATIO);
                    *x *= ratio.ln().clamp(-log_kappa, log_kappa).exp();
                });
        }

        if params.psf_update > 0 && (iter + 1) % params.psf_update == 0 {
            subs.par_iter_mut()
                .for_each(|sub| refine_psf(&mut sub.psf, &sub.frame, &latent));
        }

        if alpha < 1.0 {
            Zip::from(&mut latent)
                .and(&prev)
                .for_each(|x, &p| *x = (1.0 - alpha) * p + alpha * *x);
        }
        latent.mapv_inplace(|v| v.max(0.0));

        let change = relative_change(&latent, &prev);
        prev.assign(&latent);
        if change < MM_TOLERANCE {
            debug!(iterations = iter + 1, sigma, "ImageMM converged");
            break;
        }
    }

    let keep = subs.len().saturating_sub(params.history);
    subs.drain(..keep);
    Ok(MmOutput {
        frame: Frame::new(latent),
        state: MmState {
            sigma,
            history: subs,
        },
    })
}

/// Robust noise scale from residuals of the first few subs against the latent.
fn estimate_sigma(subs: &[MmSub], latent: &Array3<f32>, prev: f32, scale: f32) -> f32 {
    let step = MM_SAMPLE_STEP as isize;
    let mut residuals = Vec::new();
    for sub in subs.iter().take(MM_SIGMA_FRAMES) {
        Zip::from(sub.frame.data.slice(s![.., ..;step, ..;step]))
            .and(latent.slice(s![.., ..;step, ..;step]))
            .for_each(|&y, &x| residuals.push((y - x).abs()));
    }

    let Some(centre) = median_in_place(&mut residuals) else {
        return prev.max(MM_MIN_SIGMA);
    };
    for r in residuals.iter_mut() {
        *r = (*r - centre).abs();
    }
    let mad = median_in_place(&mut residuals).unwrap_or(0.0);
    let fresh = (MAD_TO_SIGMA * mad * scale).max(MM_MIN_SIGMA);
    if prev > 0.0 {
        MM_SIGMA_CARRY * prev + (1.0 - MM_SIGMA_CARRY) * fresh
    } else {
        fresh
    }
}

/// One projected gradient step on a sub's PSF against its residuals.
///
/// The PSF stays non-negative and sums to one; a step that would zero it is
/// discarded.
fn refine_psf(psf: &mut Array2<f32>, sub: &Frame, latent: &Array3<f32>) {
    let (kh, kw) = psf.dim();
    let (ry, rx) = (kh / 2, kw / 2);
    let (channels, h, w) = latent.dim();
    if h <= 2 * ry || w <= 2 * rx {
        return;
    }

    let mut grad = Array2::<f32>::zeros((kh, kw));
    for c in 0..channels {
        let plane = latent.index_axis(Axis(0), c);
        let blurred = correlate2d(plane, psf.view());
        let observed = sub.channel(c);
        for row in (ry..h - ry).step_by(MM_SAMPLE_STEP) {
            for col in (rx..w - rx).step_by(MM_SAMPLE_STEP) {
                let r = blurred[[row, col]] - observed[[row, col]];
                for ((i, j), g) in grad.indexed_iter_mut() {
                    *g += r * plane[[row + i - ry, col + j - rx]];
                }
            }
        }
    }

    let norm = grad.iter().fold(0.0f32, |m, &g| m.max(g.abs()));
    if norm <= EPSILON {
        return;
    }
    let peak = psf.iter().fold(0.0f32, |m, &v| m.max(v));
    let mut next = psf.clone();
    Zip::from(&mut next)
        .and(&grad)
        .for_each(|p, &g| *p = (*p - MM_PSF_STEP * peak * g / norm).max(0.0));
    let sum = next.sum();
    if sum > EPSILON {
        *psf = next / sum;
    }
}

fn relative_change(next: &Array3<f32>, prev: &Array3<f32>) -> f64 {
    let mut diff = 0.0f64;
    let mut base = 0.0f64;
    Zip::from(next).and(prev).for_each(|&a, &b| {
        let d = (a - b) as f64;
        diff += d * d;
        base += (b as f64) * (b as f64);
    });
    diff.sqrt() / (base.sqrt() + MM_MIN_RATIO as f64)
}
