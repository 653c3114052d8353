use crate::consts::EPSILON;
use crate::error::{Result, StackError};
use crate::frame::Frame;

/// Weighted mean of `subs`. Returns the combined frame and the total weight.
pub fn weighted_mean(subs: &[&Frame], weights: &[f32]) -> Result<(Frame, f64)> {
    let first = check_inputs(subs, weights)?;

    let mut sum = Frame::zeros(first.shape());
    let total = accumulate(&mut sum, subs, weights);
    if total <= EPSILON as f64 {
        return Err(StackError::EmptySequence);
    }

    sum.data.mapv_inplace(|v| (v as f64 / total) as f32);
    Ok((sum, total))
}

/// Fold `subs` into a composite that already represents `prior_weight`.
///
/// `(prior * prior_weight + sum(sub_i * w_i)) / (prior_weight + sum(w_i))`,
/// which equals a one-shot [`weighted_mean`] over all subs ever absorbed.
pub fn weighted_mean_incremental(
    prior: &Frame,
    prior_weight: f64,
    subs: &[&Frame],
    weights: &[f32],
) -> Result<(Frame, f64)> {
    let first = check_inputs(subs, weights)?;
    if first.shape() != prior.shape() {
        return Err(StackError::ShapeMismatch {
            expected: prior.shape(),
            actual: first.shape(),
        });
    }

    let mut sum = prior.clone();
    sum.data.mapv_inplace(|v| (v as f64 * prior_weight) as f32);
    let total = prior_weight + accumulate(&mut sum, subs, weights);
    if total <= EPSILON as f64 {
        return Err(StackError::EmptySequence);
    }

    sum.data.mapv_inplace(|v| (v as f64 / total) as f32);
    Ok((sum, total))
}

fn check_inputs<'a>(subs: &[&'a Frame], weights: &[f32]) -> Result<&'a Frame> {
    let first = *subs.first().ok_or(StackError::EmptySequence)?;
    if weights.len() != subs.len() {
        return Err(StackError::BufferSize {
            expected: subs.len(),
            actual: weights.len(),
        });
    }
    for sub in subs.iter().skip(1) {
        if sub.shape() != first.shape() {
            return Err(StackError::ShapeMismatch {
                expected: first.shape(),
                actual: sub.shape(),
            });
        }
    }
    Ok(first)
}

fn accumulate(sum: &mut Frame, subs: &[&Frame], weights: &[f32]) -> f64 {
    let mut total = 0.0f64;
    for (sub, &w) in subs.iter().zip(weights) {
        sum.data.scaled_add(w, &sub.data);
        total += w as f64;
    }
    total
}
