//! Per-pixel sigma clipping with persisted bounds.
//!
//! Every pixel of every channel is reduced independently: robust median and
//! sigma, optional winsorisation, then a weighted mean of the samples inside
//! `[median - low*sigma, median + high*sigma]`. The bounds and running sums are
//! kept so that later subs can be folded in without revisiting old ones.

use ndarray::{Array3, ArrayView3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{CANCEL_CHECK_INTERVAL, CLIP_MIN_SIGMA, MIN_CLIP_SAMPLES};
use crate::error::{Result, StackError};
use crate::frame::{Frame, ImageShape};
use crate::stack::median::{median_and_sigma, std_dev};
use crate::stack::CancelToken;

/// Sigma multipliers for one session, resolved from the rejection mode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClipParams {
    /// Lower rejection threshold in sigmas.
    pub low: f32,
    /// Upper rejection threshold in sigmas.
    pub high: f32,
    /// Winsorisation cutoff in sigmas; `None` disables clamping.
    pub winsor: Option<f32>,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            low: 2.0,
            high: 2.0,
            winsor: None,
        }
    }
}

/// Persisted clipping state of one pixel in one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClipBounds {
    pub lower: f32,
    pub upper: f32,
    pub sum: f32,
    pub weight_sum: f32,
}

impl ClipBounds {
    /// Marker for pixels first seen with too few samples to clip.
    pub const UNBOUNDED: f32 = -1.0;

    /// Pixels without bounds accept every later sample.
    pub fn is_unbounded(&self) -> bool {
        self.lower < 0.0
    }

    #[inline]
    pub fn accepts(&self, value: f32) -> bool {
        self.is_unbounded() || (value >= self.lower && value <= self.upper)
    }
}

/// Clip state for a whole image, shape = (channels, height, width).
pub type ClipState = Array3<ClipBounds>;

/// Result of a clipping pass: the combined image and the state to carry.
#[derive(Clone, Debug)]
pub struct ClipOutput {
    pub frame: Frame,
    pub state: ClipState,
}

/// Reduce the samples of one pixel.
///
/// `samples` is modified when winsorising. `scratch` is reused workspace.
pub fn clip_pixel(
    samples: &mut [f32],
    weights: &[f32],
    params: &ClipParams,
    scratch: &mut Vec<f32>,
) -> (f32, ClipBounds) {
    let Some((mut median, mut sigma)) = clip_spread(samples, scratch) else {
        return (0.0, ClipBounds::default());
    };

    if let Some(cutoff) = params.winsor.filter(|_| sigma >= CLIP_MIN_SIGMA) {
        let lo = (median - cutoff * sigma).max(0.0);
        let hi = median + cutoff * sigma;
        for v in samples.iter_mut() {
            if *v < lo {
                *v = lo;
            } else if *v > hi {
                *v = hi;
            }
        }
        if let Some((m, s)) = clip_spread(samples, scratch) {
            median = m;
            sigma = s;
        }
    }

    // Too few samples, or samples that all agree: nothing to reject against,
    // so the pixel stays open to every later sub.
    if samples.len() <= MIN_CLIP_SAMPLES || sigma < CLIP_MIN_SIGMA {
        let bounds = ClipBounds {
            lower: ClipBounds::UNBOUNDED,
            upper: f32::MAX,
            sum: samples.iter().zip(weights).map(|(v, w)| v * w).sum(),
            weight_sum: weights.iter().sum(),
        };
        return (median, bounds);
    }

    let mut bounds = ClipBounds {
        lower: (median - params.low * sigma).max(0.0),
        upper: median + params.high * sigma,
        sum: 0.0,
        weight_sum: 0.0,
    };
    for (&v, &w) in samples.iter().zip(weights) {
        if v >= bounds.lower && v <= bounds.upper {
            bounds.sum += v * w;
            bounds.weight_sum += w;
        }
    }

    let value = if bounds.weight_sum > 0.0 {
        bounds.sum / bounds.weight_sum
    } else {
        median
    };
    (value, bounds)
}

/// Median and sigma used for clipping.
///
/// The MAD estimate is zero whenever more than half the samples tie, which
/// is common with integer ADU or dark-clamped zeros. The population standard
/// deviation stands in then; it is zero only when every sample is equal.
fn clip_spread(samples: &[f32], scratch: &mut Vec<f32>) -> Option<(f32, f32)> {
    let (median, sigma) = median_and_sigma(samples, scratch)?;
    if sigma >= CLIP_MIN_SIGMA {
        return Some((median, sigma));
    }
    Some((median, std_dev(samples).unwrap_or(0.0)))
}

/// Fold new samples into a pixel's carried state.
///
/// Samples are tested against the stored bounds only; the bounds themselves
/// never move.
pub fn fold_pixel(prior: f32, bounds: ClipBounds, samples: &[f32], weights: &[f32]) -> (f32, ClipBounds) {
    let mut next = bounds;
    for (&v, &w) in samples.iter().zip(weights) {
        if next.accepts(v) {
            next.sum += v * w;
            next.weight_sum += w;
        }
    }
    let value = if next.weight_sum > 0.0 {
        next.sum / next.weight_sum
    } else {
        prior
    };
    (value, next)
}

/// Sigma-clip a batch of aligned subs from scratch.
pub fn sigma_clip(
    subs: &[ArrayView3<'_, f32>],
    weights: &[f32],
    params: &ClipParams,
    cancel: &CancelToken,
) -> Result<ClipOutput> {
    let dim = check_inputs(subs, weights)?;
    let params = *params;
    combine(subs, dim, cancel, move |samples, _idx, scratch| {
        clip_pixel(samples, weights, &params, scratch)
    })
}

/// Fold a batch of aligned subs into an existing clipped composite.
pub fn sigma_clip_incremental(
    prior: &Frame,
    state: &ClipState,
    subs: &[ArrayView3<'_, f32>],
    weights: &[f32],
    cancel: &CancelToken,
) -> Result<ClipOutput> {
    let dim = check_inputs(subs, weights)?;
    if prior.data.dim() != dim || state.dim() != dim {
        return Err(StackError::ShapeMismatch {
            expected: prior.shape(),
            actual: ImageShape::new(dim.2, dim.1, dim.0),
        });
    }
    let prior = prior.data.as_standard_layout();
    let state = state.as_standard_layout();
    let (Some(prior), Some(state)) = (prior.as_slice(), state.as_slice()) else {
        return Err(StackError::Stacking("clip state is not contiguous".into()));
    };
    combine(subs, dim, cancel, move |samples, idx, _scratch| {
        fold_pixel(prior[idx], state[idx], samples, weights)
    })
}

fn check_inputs(
    subs: &[ArrayView3<'_, f32>],
    weights: &[f32],
) -> Result<(usize, usize, usize)> {
    let first = subs.first().ok_or(StackError::EmptySequence)?;
    if weights.len() != subs.len() {
        return Err(StackError::BufferSize {
            expected: subs.len(),
            actual: weights.len(),
        });
    }
    let dim = first.dim();
    for sub in subs.iter().skip(1) {
        if sub.dim() != dim {
            return Err(StackError::ShapeMismatch {
                expected: ImageShape::new(dim.2, dim.1, dim.0),
                actual: ImageShape::new(sub.dim().2, sub.dim().1, sub.dim().0),
            });
        }
    }
    Ok(dim)
}

/// Run `kernel` over every sample position, choosing the chunked parallel
/// path when all inputs are contiguous and the indexed sequential path
/// otherwise. `kernel` receives the gathered samples and the flat
/// (channel, row, column) index in standard layout.
fn combine<K>(
    subs: &[ArrayView3<'_, f32>],
    dim: (usize, usize, usize),
    cancel: &CancelToken,
    kernel: K,
) -> Result<ClipOutput>
where
    K: Fn(&mut [f32], usize, &mut Vec<f32>) -> (f32, ClipBounds) + Sync,
{
    let slices: Option<Vec<&[f32]>> = subs.iter().map(|s| s.as_slice()).collect();
    let (values, bounds) = match slices {
        Some(slices) => combine_chunked(&slices, dim, cancel, &kernel)?,
        None => combine_sequential(subs, dim, cancel, &kernel)?,
    };

    let frame = Array3::from_shape_vec(dim, values)
        .map_err(|e| StackError::Stacking(e.to_string()))?;
    let state = Array3::from_shape_vec(dim, bounds)
        .map_err(|e| StackError::Stacking(e.to_string()))?;
    Ok(ClipOutput {
        frame: Frame::new(frame),
        state,
    })
}

/// Flatten to 1-D and hand out contiguous chunks to the worker pool.
pub(crate) fn combine_chunked<K>(
    slices: &[&[f32]],
    dim: (usize, usize, usize),
    cancel: &CancelToken,
    kernel: &K,
) -> Result<(Vec<f32>, Vec<ClipBounds>)>
where
    K: Fn(&mut [f32], usize, &mut Vec<f32>) -> (f32, ClipBounds) + Sync,
{
    let total = dim.0 * dim.1 * dim.2;
    let workers = rayon::current_num_threads().max(1);
    let chunk = (total / (workers * 2)).max(1);

    let mut values = vec![0.0f32; total];
    let mut bounds = vec![ClipBounds::default(); total];

    values
        .par_chunks_mut(chunk)
        .zip(bounds.par_chunks_mut(chunk))
        .enumerate()
        .try_for_each(|(ci, (out, state))| -> Result<()> {
            let start = ci * chunk;
            let mut samples = vec![0.0f32; slices.len()];
            let mut scratch = Vec::with_capacity(slices.len());
            for (k, (value, bound)) in out.iter_mut().zip(state.iter_mut()).enumerate() {
                if k % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    return Err(StackError::Cancelled);
                }
                let idx = start + k;
                for (s, slice) in samples.iter_mut().zip(slices) {
                    *s = slice[idx];
                }
                (*value, *bound) = kernel(&mut samples, idx, &mut scratch);
            }
            Ok(())
        })?;

    Ok((values, bounds))
}

/// Single-threaded path for strided or otherwise non-contiguous inputs.
pub(crate) fn combine_sequential<K>(
    subs: &[ArrayView3<'_, f32>],
    dim: (usize, usize, usize),
    cancel: &CancelToken,
    kernel: &K,
) -> Result<(Vec<f32>, Vec<ClipBounds>)>
where
    K: Fn(&mut [f32], usize, &mut Vec<f32>) -> (f32, ClipBounds),
{
    let (channels, height, width) = dim;
    let total = channels * height * width;
    let mut values = Vec::with_capacity(total);
    let mut bounds = Vec::with_capacity(total);
    let mut samples = vec![0.0f32; subs.len()];
    let mut scratch = Vec::with_capacity(subs.len());

    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                let idx = values.len();
                if idx % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                    return Err(StackError::Cancelled);
                }
                for (s, sub) in samples.iter_mut().zip(subs) {
                    *s = sub[[c, y, x]];
                }
                let (v, b) = kernel(&mut samples, idx, &mut scratch);
                values.push(v);
                bounds.push(b);
            }
        }
    }

    Ok((values, bounds))
}
