//! Master dark/flat handling and per-sub calibration.

use std::sync::Arc;

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::consts::{FLAT_FLOOR, FLAT_MIN_NORMALISED};
use crate::error::{Result, StackError};
use crate::frame::Frame;
use crate::io::raw::PixelType;
use crate::stack::median::median_in_place;

/// Which master a buffer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasterKind {
    Dark,
    Flat,
}

impl std::fmt::Display for MasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dark => write!(f, "Dark"),
            Self::Flat => write!(f, "Flat"),
        }
    }
}

/// The session's masters. Read-only once installed and shared by every
/// calibration call.
#[derive(Clone, Debug, Default)]
pub struct MasterFrames {
    dark: Option<Arc<Frame>>,
    flat_inverse: Option<Arc<Frame>>,
}

/// Which masters were applied to a sub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationApplied {
    pub dark: bool,
    pub flat: bool,
}

impl MasterFrames {
    pub fn dark(&self) -> Option<&Arc<Frame>> {
        self.dark.as_ref()
    }

    /// Reciprocal of the median-normalised flat.
    pub fn flat_inverse(&self) -> Option<&Arc<Frame>> {
        self.flat_inverse.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.dark.is_none() && self.flat_inverse.is_none()
    }

    /// Install or replace a master. `sub_type` is the pixel type of the
    /// session's subs, when known.
    pub fn install(&mut self, kind: MasterKind, frame: Frame, sub_type: Option<PixelType>) -> Result<()> {
        match kind {
            MasterKind::Dark => self.dark = Some(Arc::new(prepare_dark(frame, sub_type))),
            MasterKind::Flat => self.flat_inverse = Some(Arc::new(prepare_flat(frame)?)),
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.dark = None;
        self.flat_inverse = None;
    }
}

/// Bring a dark onto the scale of the subs.
///
/// A dark whose maximum is at most 1.0 has been normalised; it is lifted to the
/// full scale of integer subs so the subtraction is meaningful.
pub fn prepare_dark(mut dark: Frame, sub_type: Option<PixelType>) -> Frame {
    if dark.max_value() <= 1.0 {
        if let Some(scale) = sub_type.and_then(PixelType::full_scale) {
            dark.data.mapv_inplace(|v| v * scale);
        }
    }
    dark
}

/// Normalise a flat per channel by its median and return the reciprocal.
pub fn prepare_flat(mut flat: Frame) -> Result<Frame> {
    for c in 0..flat.channels() {
        let mut plane = flat.channel_mut(c);
        plane.mapv_inplace(|v| v.max(FLAT_FLOOR));

        let mut values: Vec<f32> = plane.iter().copied().collect();
        let median = median_in_place(&mut values).unwrap_or(0.0);
        if median <= 0.0 || !median.is_finite() {
            return Err(StackError::InvalidMaster(format!(
                "flat channel {c} has no usable median"
            )));
        }

        plane.mapv_inplace(|v| 1.0 / (v / median).max(FLAT_MIN_NORMALISED));
    }
    Ok(flat)
}

/// Subtract the dark (clamping at zero) and divide by the flat, in place.
///
/// Masters that are absent are skipped. A master whose shape differs from the
/// frame, or output that is not finite, is an error; the frame may then be
/// partially modified and should be discarded.
pub fn calibrate(frame: &mut Frame, masters: &MasterFrames) -> Result<CalibrationApplied> {
    let mut applied = CalibrationApplied::default();

    if let Some(dark) = masters.dark() {
        check_shape(frame, dark)?;
        Zip::from(&mut frame.data)
            .and(&dark.data)
            .for_each(|v, &d| *v = (*v - d).max(0.0));
        applied.dark = true;
    }

    if let Some(flat_inv) = masters.flat_inverse() {
        check_shape(frame, flat_inv)?;
        frame.data *= &flat_inv.data;
        applied.flat = true;
    }

    if frame.data.iter().any(|v| !v.is_finite()) {
        return Err(StackError::Stacking("calibration produced non-finite samples".into()));
    }
    Ok(applied)
}

fn check_shape(frame: &Frame, master: &Frame) -> Result<()> {
    if frame.shape() != master.shape() {
        return Err(StackError::ShapeMismatch {
            expected: master.shape(),
            actual: frame.shape(),
        });
    }
    Ok(())
}
