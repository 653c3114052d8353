//! Gnomonic (TAN) world coordinate system as returned by a plate solver.
//!
//! `crpix` follows the FITS convention (1-based); the conversion methods take
//! and return 0-based pixel coordinates, so pixel (0, 0) is the centre of the
//! first pixel.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};

/// A solved plate: reference pixel, reference sky position and CD matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wcs {
    /// Reference pixel (CRPIX1, CRPIX2), 1-based.
    pub crpix: (f64, f64),
    /// Reference sky position in degrees (CRVAL1 = RA, CRVAL2 = Dec).
    pub crval: (f64, f64),
    /// Pixel offset to intermediate world coordinates, degrees per pixel.
    /// [[CD1_1, CD1_2], [CD2_1, CD2_2]]
    pub cd: [[f64; 2]; 2],
}

impl Wcs {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Self {
        Self { crpix, crval, cd }
    }

    /// Build a WCS from a pixel scale (arcsec/px) and a rotation in degrees.
    pub fn from_scale_rotation(
        crpix: (f64, f64),
        crval: (f64, f64),
        pixel_scale_arcsec: f64,
        rotation_deg: f64,
    ) -> Self {
        let scale = pixel_scale_arcsec / 3600.0;
        let (sin_r, cos_r) = rotation_deg.to_radians().sin_cos();
        Self::new(
            crpix,
            crval,
            [
                [-scale * cos_r, scale * sin_r],
                [scale * sin_r, scale * cos_r],
            ],
        )
    }

    fn determinant(&self) -> f64 {
        self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0]
    }

    /// Pixel scale in arcseconds per pixel, averaged over both axes.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let scale_x = (self.cd[0][0].powi(2) + self.cd[1][0].powi(2)).sqrt();
        let scale_y = (self.cd[0][1].powi(2) + self.cd[1][1].powi(2)).sqrt();
        ((scale_x + scale_y) / 2.0) * 3600.0
    }

    /// Check that the transform can be inverted and maps its own reference pixel.
    pub fn validate(&self) -> Result<()> {
        if !self.determinant().is_finite() || self.determinant().abs() < 1e-15 {
            return Err(StackError::Wcs(format!(
                "singular CD matrix (det = {:e})",
                self.determinant()
            )));
        }
        let (x, y) = (self.crpix.0 - 1.0, self.crpix.1 - 1.0);
        let (ra, dec) = self.pixel_to_world(x, y)?;
        self.world_to_pixel(ra, dec)?;
        Ok(())
    }

    /// Convert a 0-based pixel position to (RA, Dec) in degrees.
    pub fn pixel_to_world(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let dx = x + 1.0 - self.crpix.0;
        let dy = y + 1.0 - self.crpix.1;

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval.0.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        let ra_deg = ra.to_degrees().rem_euclid(360.0);
        let dec_deg = dec.to_degrees();
        if !ra_deg.is_finite() || !dec_deg.is_finite() {
            return Err(StackError::Wcs(format!(
                "pixel ({x:.2}, {y:.2}) has no world position"
            )));
        }
        Ok((ra_deg, dec_deg))
    }

    /// Convert (RA, Dec) in degrees to a 0-based pixel position.
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> Result<(f64, f64)> {
        let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = self.crval.1.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (ra - self.crval.0).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 0.0 {
            return Err(StackError::Wcs(format!(
                "({ra:.4}, {dec:.4}) lies behind the tangent plane"
            )));
        }

        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        let det = self.determinant();
        if det.abs() < 1e-15 {
            return Err(StackError::Wcs("singular CD matrix".into()));
        }
        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;

        let x = self.crpix.0 + dx - 1.0;
        let y = self.crpix.1 + dy - 1.0;
        if !x.is_finite() || !y.is_finite() {
            return Err(StackError::Wcs(format!(
                "({ra:.4}, {dec:.4}) has no pixel position"
            )));
        }
        Ok((x, y))
    }

    /// The same sky mapping expressed on an image shrunk by `factor`.
    ///
    /// Pixel coordinates scale as `p' = p / factor`, matching the scale
    /// applied to alignment transforms.
    pub fn downscaled(&self, factor: usize) -> Self {
        if factor <= 1 {
            return self.clone();
        }
        let f = factor as f64;
        let mut cd = self.cd;
        for row in cd.iter_mut() {
            for v in row.iter_mut() {
                *v *= f;
            }
        }
        Self {
            crpix: ((self.crpix.0 - 1.0) / f + 1.0, (self.crpix.1 - 1.0) / f + 1.0),
            crval: self.crval,
            cd,
        }
    }
}
