use std::sync::Arc;

use crate::align::Wcs;
use crate::frame::{Frame, ImageShape};
use crate::io::raw::PixelType;
use crate::quality::SubQuality;

/// Identity of a sub within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubId(pub u64);

impl std::fmt::Display for SubId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a sub so far. Any value other than `Solving` and `Ok` is final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubStatus {
    #[default]
    Solving,
    SolveFailed,
    CalibrationFailed,
    AlignmentFailed,
    Ok,
}

impl SubStatus {
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            Self::SolveFailed | Self::CalibrationFailed | Self::AlignmentFailed
        )
    }
}

impl std::fmt::Display for SubStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solving => write!(f, "Solving"),
            Self::SolveFailed => write!(f, "Solve failed"),
            Self::CalibrationFailed => write!(f, "Calibration failed"),
            Self::AlignmentFailed => write!(f, "Alignment failed"),
            Self::Ok => write!(f, "OK"),
        }
    }
}

/// How far a sub's pixels have been processed. Each step is applied once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubProgress {
    #[default]
    Raw,
    Calibrated,
    Aligned,
}

/// One captured frame waiting to be integrated.
#[derive(Clone, Debug)]
pub struct Sub {
    pub id: SubId,
    pub frame: Frame,
    pub status: SubStatus,
    pub progress: SubProgress,
    pub wcs: Option<Arc<Wcs>>,
    pub quality: SubQuality,
    pub snr: f64,
}

impl Sub {
    pub fn is_calibrated(&self) -> bool {
        self.progress >= SubProgress::Calibrated
    }

    pub fn is_aligned(&self) -> bool {
        self.progress >= SubProgress::Aligned
    }

    pub fn fail(&mut self, status: SubStatus) {
        self.status = status;
    }
}

/// Subs held in memory, in arrival order.
#[derive(Debug, Default)]
pub struct SubStore {
    subs: Vec<Sub>,
    next_id: u64,
    shape: Option<ImageShape>,
    pixel_type: Option<PixelType>,
}

impl SubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Shape shared by every sub and master of the session, once known.
    pub fn shape(&self) -> Option<ImageShape> {
        self.shape
    }

    /// Pixel type of the session's subs, once known.
    pub fn pixel_type(&self) -> Option<PixelType> {
        self.pixel_type
    }

    /// Fix the session shape and, for subs, the pixel type.
    pub fn establish(&mut self, shape: ImageShape, pixel_type: Option<PixelType>) {
        self.shape.get_or_insert(shape);
        if let Some(pt) = pixel_type {
            self.pixel_type.get_or_insert(pt);
        }
    }

    /// Admit a frame that already passed the shape checks.
    pub fn push(&mut self, frame: Frame, snr: f64) -> SubId {
        let id = SubId(self.next_id);
        self.next_id += 1;
        self.subs.push(Sub {
            id,
            frame,
            status: SubStatus::Solving,
            progress: SubProgress::Raw,
            wcs: None,
            quality: SubQuality::default(),
            snr,
        });
        id
    }

    /// The most recently added sub still waiting for its solver result.
    pub fn latest_pending_mut(&mut self) -> Option<&mut Sub> {
        self.subs.last_mut().filter(|s| s.status == SubStatus::Solving)
    }

    pub fn get(&self, id: SubId) -> Option<&Sub> {
        self.subs.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sub> {
        self.subs.iter()
    }

    /// Mutable access for parallel processing.
    pub fn as_mut_slice(&mut self) -> &mut [Sub] {
        &mut self.subs
    }

    /// Drop every failed sub, returning how many were removed.
    pub fn remove_failed(&mut self) -> usize {
        let before = self.subs.len();
        self.subs.retain(|s| !s.status.is_failed());
        before - self.subs.len()
    }

    /// Remove and return the subs that are ready to combine, leaving subs
    /// that are still waiting for the solver.
    pub fn take_ready(&mut self) -> Vec<Sub> {
        let (ready, pending): (Vec<Sub>, Vec<Sub>) = std::mem::take(&mut self.subs)
            .into_iter()
            .partition(|s| s.status == SubStatus::Ok);
        self.subs = pending;
        ready
    }

    /// Release everything, including the session shape.
    pub fn reset(&mut self) {
        *self = Self {
            next_id: self.next_id,
            ..Self::default()
        };
    }
}
