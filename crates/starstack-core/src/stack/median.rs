use std::cmp::Ordering;

use num_traits::Float;

use crate::consts::MAD_TO_SIGMA;

/// Median of `values`, reordering the slice in place. `None` when empty.
pub fn median_in_place<T: Float>(values: &mut [T]) -> Option<T> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let cmp = |a: &T, b: &T| a.partial_cmp(b).unwrap_or(Ordering::Equal);
    if n == 1 {
        Some(values[0])
    } else if n % 2 == 1 {
        let mid = n / 2;
        Some(*values.select_nth_unstable_by(mid, cmp).1)
    } else {
        let mid = n / 2;
        let (lower, upper, _) = values.select_nth_unstable_by(mid, cmp);
        let hi = *upper;
        let lo = lower.iter().copied().fold(T::neg_infinity(), T::max);
        Some((lo + hi) / (T::one() + T::one()))
    }
}

/// Median and MAD-based sigma of `values`, using `scratch` as workspace.
///
/// `values` is left untouched. Sigma is `1.4826 * median(|x - median|)`,
/// which matches the standard deviation for Gaussian data but ignores
/// outliers.
pub fn median_and_sigma<T: Float>(values: &[T], scratch: &mut Vec<T>) -> Option<(T, T)> {
    scratch.clear();
    scratch.extend_from_slice(values);
    let med = median_in_place(scratch)?;

    for v in scratch.iter_mut() {
        *v = (*v - med).abs();
    }
    let mad = median_in_place(scratch)?;
    let k = T::from(MAD_TO_SIGMA).unwrap_or_else(T::one);
    Some((med, mad * k))
}

/// Population standard deviation of `values`. `None` when empty.
pub fn std_dev<T: Float>(values: &[T]) -> Option<T> {
    let n = T::from(values.len())?;
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().fold(T::zero(), |acc, &v| acc + v) / n;
    let var = values
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean))
        / n;
    Some(var.sqrt())
}
