use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::error::{Result, StackError};

/// A 3x3 planar projective transform acting on 0-based pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub matrix: Matrix3<f64>,
}

/// Translation and rotation read off a transform, used for progress events.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Displacement {
    pub dx: f64,
    pub dy: f64,
    /// Rotation in degrees, counter-clockwise positive.
    pub rotation_deg: f64,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Fit the transform mapping `src[i]` onto `dst[i]` in the least-squares
    /// sense, using the normalised direct linear transform.
    pub fn estimate(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Result<Self> {
        if src.len() < 4 || src.len() != dst.len() {
            return Err(StackError::DegenerateTransform(format!(
                "need at least 4 matched points, got {} and {}",
                src.len(),
                dst.len()
            )));
        }

        let (Some((src_norm, src_t)), Some((dst_norm, dst_t))) =
            (normalize_points(src), normalize_points(dst))
        else {
            return Err(StackError::DegenerateTransform(
                "matched points are coincident".into(),
            ));
        };

        let n = src_norm.len();
        let mut a = DMatrix::<f64>::zeros(2 * n, 9);
        for (i, (&(x, y), &(u, v))) in src_norm.iter().zip(dst_norm.iter()).enumerate() {
            let r0 = [-x, -y, -1.0, 0.0, 0.0, 0.0, x * u, y * u, u];
            let r1 = [0.0, 0.0, 0.0, -x, -y, -1.0, x * v, y * v, v];
            for k in 0..9 {
                a[(2 * i, k)] = r0[k];
                a[(2 * i + 1, k)] = r1[k];
            }
        }

        let h = solve_homogeneous(a)?;
        let h_norm = Matrix3::from_row_slice(&h);

        let dst_t_inv = dst_t.try_inverse().ok_or_else(|| {
            StackError::DegenerateTransform("point normalisation is singular".into())
        })?;
        let mut m = dst_t_inv * h_norm * src_t;

        let scale = m[(2, 2)];
        if scale.abs() < 1e-12 {
            return Err(StackError::DegenerateTransform(
                "transform sends the origin to infinity".into(),
            ));
        }
        m /= scale;

        let result = Self::from_matrix(m);
        result.check()?;
        Ok(result)
    }

    /// Reject non-finite or non-invertible transforms.
    pub fn check(&self) -> Result<()> {
        if self.matrix.iter().any(|v| !v.is_finite()) {
            return Err(StackError::DegenerateTransform("non-finite entries".into()));
        }
        let det = self.matrix.determinant();
        if det.abs() < 1e-12 {
            return Err(StackError::DegenerateTransform(format!(
                "determinant {det:e} is too small"
            )));
        }
        Ok(())
    }

    pub fn inverse(&self) -> Result<Self> {
        self.matrix
            .try_inverse()
            .map(Self::from_matrix)
            .ok_or_else(|| StackError::DegenerateTransform("transform is not invertible".into()))
    }

    /// Map a point through the transform. Returns `None` at the horizon.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }

    /// Express a full-resolution transform on images shrunk by `factor`:
    /// `S * H * S^-1` with `S = diag(1/f, 1/f, 1)`.
    pub fn rescaled(&self, factor: usize) -> Self {
        if factor <= 1 {
            return *self;
        }
        let f = factor as f64;
        let s = Matrix3::new(1.0 / f, 0.0, 0.0, 0.0, 1.0 / f, 0.0, 0.0, 0.0, 1.0);
        let s_inv = Matrix3::new(f, 0.0, 0.0, 0.0, f, 0.0, 0.0, 0.0, 1.0);
        Self::from_matrix(s * self.matrix * s_inv)
    }

    /// Shift of the image centre and rotation of the linear part.
    pub fn decompose(&self, width: usize, height: usize) -> Displacement {
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let (mx, my) = self.apply(cx, cy).unwrap_or((cx, cy));
        let m = &self.matrix;
        Displacement {
            dx: mx - cx,
            dy: my - cy,
            rotation_deg: m[(1, 0)].atan2(m[(0, 0)]).to_degrees(),
        }
    }
}

/// Null vector of `a` via SVD: the right singular vector of the smallest
/// singular value.
fn solve_homogeneous(a: DMatrix<f64>) -> Result<[f64; 9]> {
    // Pad to at least 9 rows so V^T is complete.
    let a = if a.nrows() < 9 {
        let mut padded = DMatrix::<f64>::zeros(9, 9);
        padded.rows_mut(0, a.nrows()).copy_from(&a);
        padded
    } else {
        a
    };

    let svd = nalgebra::SVD::new(a, false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| StackError::DegenerateTransform("SVD did not converge".into()))?;

    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| StackError::DegenerateTransform("empty SVD".into()))?;

    let mut h = [0.0f64; 9];
    for (k, v) in h.iter_mut().enumerate() {
        *v = v_t[(min_idx, k)];
    }
    Ok(h)
}

/// Translate points to their centroid and scale to mean distance sqrt(2).
/// `None` when the points have no spread.
fn normalize_points(points: &[(f64, f64)]) -> Option<(Vec<(f64, f64)>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist.is_nan() || mean_dist < 1e-10 {
        return None;
    }

    let scale = std::f64::consts::SQRT_2 / mean_dist;
    let normalized = points
        .iter()
        .map(|p| ((p.0 - cx) * scale, (p.1 - cy) * scale))
        .collect();
    let t = Matrix3::new(
        scale,
        0.0,
        -cx * scale,
        0.0,
        scale,
        -cy * scale,
        0.0,
        0.0,
        1.0,
    );
    Some((normalized, t))
}
