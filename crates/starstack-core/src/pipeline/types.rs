use std::time::Duration;

use crate::align::Displacement;
use crate::calibration::CalibrationApplied;
use crate::pipeline::sub_store::{SubId, SubStatus};
use crate::quality::SnrStats;

pub use crate::stack::CancelToken;

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No sub has been stacked yet.
    #[default]
    Empty,
    /// Subs are held in memory and re-combined on every stack.
    Accumulating,
    /// Old subs are summarised; new subs are folded in incrementally.
    Running,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Accumulating => write!(f, "Accumulating"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Per-sub progress notifications.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SubEvent {
    Calibrated(CalibrationApplied),
    Aligned(Displacement),
    Stacked { weight: f32 },
    Failed(SubStatus),
}

/// Observer for session progress. All methods have default no-op
/// implementations.
pub trait StackObserver: Send + Sync {
    /// A sub moved through a stage of the pipeline.
    fn sub_event(&self, _sub: SubId, _event: SubEvent) {}

    /// A stack pass finished and produced a new composite.
    fn stack_complete(&self, _report: &StackReport) {}
}

/// Observer that ignores everything.
pub(crate) struct NoOpObserver;
impl StackObserver for NoOpObserver {}

/// Summary of one stack pass.
#[derive(Clone, Debug, PartialEq)]
pub struct StackReport {
    /// State after the pass.
    pub state: SessionState,
    /// Subs folded into the composite by this pass.
    pub subs_stacked: usize,
    /// Subs rejected during this pass.
    pub subs_failed: usize,
    /// Subs represented by the composite in total.
    pub total_subs: usize,
    pub total_weight: f64,
    pub snr: f64,
    pub post_processed: bool,
    pub elapsed: Duration,
}

/// Scalar metrics of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SessionMetrics {
    /// SNR of the current composite.
    pub stack_snr: f64,
    /// SNR of the individual subs as they were added.
    pub sub_snr: SnrStats,
    pub subs_added: usize,
    pub subs_stacked: usize,
    pub subs_failed: usize,
}
