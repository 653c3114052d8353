pub mod image_mm;
pub mod mean;
pub mod median;
pub mod running;
pub mod sigma_clip;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::ArrayView3;

use crate::error::{Result, StackError};
use crate::frame::Frame;
use crate::stack::image_mm::{MmParams, MmState, MmSub};
use crate::stack::sigma_clip::{ClipParams, ClipState};

pub use running::{ReferenceWcs, RunningStackState};
pub use sigma_clip::ClipBounds;

/// Shared flag used to interrupt a combine pass from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Subs handed to one combine pass.
#[derive(Clone, Copy, Debug)]
pub struct Batch<'a> {
    pub frames: &'a [&'a Frame],
    pub weights: &'a [f32],
    /// Half-flux radius of each sub on the working grid, non-positive when
    /// unknown. Only ImageMM reads it; an empty slice means all unknown.
    pub hfrs: &'a [f64],
}

impl<'a> Batch<'a> {
    pub fn new(frames: &'a [&'a Frame], weights: &'a [f32]) -> Self {
        Self {
            frames,
            weights,
            hfrs: &[],
        }
    }

    pub fn with_hfrs(self, hfrs: &'a [f64]) -> Self {
        Self { hfrs, ..self }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn mm_subs(&self) -> Result<Vec<MmSub>> {
        if self.weights.len() != self.frames.len() {
            return Err(StackError::BufferSize {
                expected: self.frames.len(),
                actual: self.weights.len(),
            });
        }
        Ok(self
            .frames
            .iter()
            .zip(self.weights)
            .enumerate()
            .map(|(i, (&frame, &weight))| {
                let hfr = self.hfrs.get(i).copied().unwrap_or(-1.0);
                MmSub::new(Arc::new(frame.clone()), weight, hfr)
            })
            .collect())
    }
}

/// Combination strategy, resolved once per session from the rejection mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Combiner {
    WeightedMean,
    SigmaClip(ClipParams),
    ImageMm(MmParams),
}

/// State a strategy carries from one pass into the next incremental one.
#[derive(Clone, Debug, Default)]
pub enum Carry {
    #[default]
    None,
    Clip(ClipState),
    ImageMm(MmState),
}

impl Carry {
    pub fn clip(&self) -> Option<&ClipState> {
        match self {
            Self::Clip(state) => Some(state),
            _ => None,
        }
    }

    pub fn image_mm(&self) -> Option<&MmState> {
        match self {
            Self::ImageMm(state) => Some(state),
            _ => None,
        }
    }
}

/// Output of a combine pass.
#[derive(Clone, Debug)]
pub struct Combined {
    pub frame: Frame,
    pub total_weight: f64,
    pub carry: Carry,
}

impl Combiner {
    /// Combine subs from scratch.
    pub fn combine(&self, batch: &Batch<'_>, cancel: &CancelToken) -> Result<Combined> {
        match self {
            Self::WeightedMean => {
                if cancel.is_cancelled() {
                    return Err(StackError::Cancelled);
                }
                let (frame, total_weight) = mean::weighted_mean(batch.frames, batch.weights)?;
                Ok(Combined {
                    frame,
                    total_weight,
                    carry: Carry::None,
                })
            }
            Self::SigmaClip(params) => {
                let views: Vec<ArrayView3<'_, f32>> =
                    batch.frames.iter().map(|s| s.data.view()).collect();
                let out = sigma_clip::sigma_clip(&views, batch.weights, params, cancel)?;
                Ok(Combined {
                    frame: out.frame,
                    total_weight: weight_total(batch.weights),
                    carry: Carry::Clip(out.state),
                })
            }
            Self::ImageMm(params) => {
                let out = image_mm::image_mm(batch.mm_subs()?, params, cancel)?;
                Ok(Combined {
                    frame: out.frame,
                    total_weight: weight_total(batch.weights),
                    carry: Carry::ImageMm(out.state),
                })
            }
        }
    }

    /// Fold subs into a composite that already represents `prior_weight`.
    pub fn combine_incremental(
        &self,
        prior: &Frame,
        prior_weight: f64,
        carry: &Carry,
        batch: &Batch<'_>,
        cancel: &CancelToken,
    ) -> Result<Combined> {
        match self {
            Self::WeightedMean => {
                if cancel.is_cancelled() {
                    return Err(StackError::Cancelled);
                }
                let (frame, total_weight) = mean::weighted_mean_incremental(
                    prior,
                    prior_weight,
                    batch.frames,
                    batch.weights,
                )?;
                Ok(Combined {
                    frame,
                    total_weight,
                    carry: Carry::None,
                })
            }
            Self::SigmaClip(_) => {
                let state = carry.clip().ok_or_else(|| {
                    StackError::Stacking("running stack has no clip state".into())
                })?;
                let views: Vec<ArrayView3<'_, f32>> =
                    batch.frames.iter().map(|s| s.data.view()).collect();
                let out = sigma_clip::sigma_clip_incremental(
                    prior,
                    state,
                    &views,
                    batch.weights,
                    cancel,
                )?;
                Ok(Combined {
                    frame: out.frame,
                    total_weight: prior_weight + weight_total(batch.weights),
                    carry: Carry::Clip(out.state),
                })
            }
            Self::ImageMm(params) => {
                let state = carry.image_mm().ok_or_else(|| {
                    StackError::Stacking("running stack has no ImageMM state".into())
                })?;
                let out =
                    image_mm::image_mm_incremental(prior, state, batch.mm_subs()?, params, cancel)?;
                Ok(Combined {
                    frame: out.frame,
                    total_weight: prior_weight + weight_total(batch.weights),
                    carry: Carry::ImageMm(out.state),
                })
            }
        }
    }
}

fn weight_total(weights: &[f32]) -> f64 {
    weights.iter().map(|&w| w as f64).sum()
}
