//! The live-stacking session: sub ingestion, solver results, masters and
//! the two-phase (accumulating, then running) stacking state machine.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::align::{self, Displacement, Wcs};
use crate::calibration::{self, MasterFrames, MasterKind};
use crate::consts::PARALLEL_FRAME_THRESHOLD;
use crate::error::{Result, StackError};
use crate::frame::{Frame, ImageShape};
use crate::io::raw::{self, RawImage};
use crate::pipeline::config::{AlignmentConfig, AlignmentMethod, LiveStackConfig, PostProcessConfig};
use crate::pipeline::output::{BayerInfo, ChannelLayout, OutputImage};
use crate::pipeline::sub_store::{Sub, SubId, SubProgress, SubStatus, SubStore};
use crate::pipeline::types::{
    CancelToken, NoOpObserver, SessionMetrics, SessionState, StackObserver, StackReport, SubEvent,
};
use crate::postprocess::{post_process, PsfInputs, StarCenter};
use crate::quality::{snr, SubQuality, Weigher};
use crate::stack::{Batch, Combined, Combiner, ReferenceWcs, RunningStackState};

/// What the plate solver reported for the most recent sub.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
    Solved { wcs: Wcs, hfr: f64, num_stars: i32 },
    Failed,
    TimedOut,
}

impl SolveOutcome {
    /// Build an outcome from the solver's raw callback arguments, copying the
    /// solution so the solver may reuse its own buffer.
    pub fn from_solver(
        wcs: Option<&Wcs>,
        timed_out: bool,
        success: bool,
        hfr: f64,
        num_stars: i32,
    ) -> Self {
        match (timed_out, success, wcs) {
            (true, _, _) => Self::TimedOut,
            (false, true, Some(wcs)) => Self::Solved {
                wcs: wcs.clone(),
                hfr,
                num_stars,
            },
            _ => Self::Failed,
        }
    }
}

/// The current best integrated image.
#[derive(Clone, Debug)]
pub struct Composite {
    pub image: Arc<Frame>,
    pub snr: f64,
    /// Subs represented by this image.
    pub num_subs: usize,
    pub post_processed: bool,
}

/// A live-stacking session.
///
/// Calls take `&mut self`, so at most one stack pass is ever in flight. Use
/// [`LiveStacker::cancel_token`] to interrupt a pass from another thread; an
/// interrupted pass leaves the previous composite in place.
pub struct LiveStacker {
    config: LiveStackConfig,
    combiner: Combiner,
    weigher: Weigher,
    state: SessionState,
    subs: SubStore,
    masters: MasterFrames,
    /// Size of the subs before downscaling; alignment is fitted at this size.
    full_size: Option<(usize, usize)>,
    reference: Option<ReferenceWcs>,
    running: Option<RunningStackState>,
    /// Combined image before post-processing, with the weight it carries.
    stacked: Option<Arc<Frame>>,
    composite: Option<Composite>,
    stars: Vec<StarCenter>,
    hfr_sum: f64,
    hfr_count: usize,
    bayer: Option<BayerInfo>,
    metrics: SessionMetrics,
    cancel: CancelToken,
    observer: Arc<dyn StackObserver>,
}

impl LiveStacker {
    pub fn new(config: LiveStackConfig) -> Self {
        let combiner = config.rejection.combiner();
        let weigher = Weigher::new(config.weighting);
        Self {
            config,
            combiner,
            weigher,
            state: SessionState::Empty,
            subs: SubStore::new(),
            masters: MasterFrames::default(),
            full_size: None,
            reference: None,
            running: None,
            stacked: None,
            composite: None,
            stars: Vec::new(),
            hfr_sum: 0.0,
            hfr_count: 0,
            bayer: None,
            metrics: SessionMetrics::default(),
            cancel: CancelToken::new(),
            observer: Arc::new(NoOpObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StackObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &LiveStackConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    pub fn composite(&self) -> Option<&Composite> {
        self.composite.as_ref()
    }

    pub fn running(&self) -> Option<&RunningStackState> {
        self.running.as_ref()
    }

    /// Session shape on the working (possibly downscaled) grid.
    pub fn shape(&self) -> Option<ImageShape> {
        self.subs.shape()
    }

    pub fn sub(&self, id: SubId) -> Option<&Sub> {
        self.subs.get(id)
    }

    /// Subs currently held in memory.
    pub fn pending_subs(&self) -> usize {
        self.subs.len()
    }

    /// Handle that interrupts the combine step of the current or next pass.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Star centres detected on the composite, used by star-based PSFs.
    pub fn set_star_centers(&mut self, stars: Vec<StarCenter>) {
        self.stars = stars;
    }

    /// Colour filter metadata passed through to the output buffer.
    pub fn set_bayer(&mut self, bayer: Option<BayerInfo>) {
        self.bayer = bayer;
    }

    fn downscale(&self) -> usize {
        self.config.downscale.factor()
    }

    /// Decode and downscale a raw buffer, checking it against the session shape.
    fn ingest(&self, raw: &RawImage<'_>) -> Result<Frame> {
        let frame = raw::decode(raw)?;
        let frame = raw::downscale_area(&frame, self.downscale())?;
        if let Some(expected) = self.subs.shape() {
            if frame.shape() != expected {
                return Err(StackError::ShapeMismatch {
                    expected,
                    actual: frame.shape(),
                });
            }
        }
        Ok(frame)
    }

    /// Admit a new sub. It waits in `Solving` until [`Self::solver_done`].
    ///
    /// A buffer whose shape or pixel type differs from the session's is
    /// rejected and leaves the session untouched.
    pub fn add_sub(&mut self, raw: &RawImage<'_>) -> Result<SubId> {
        if let Some(expected) = self.subs.pixel_type() {
            if raw.pixel_type != expected {
                return Err(StackError::PixelTypeMismatch {
                    expected,
                    actual: raw.pixel_type,
                });
            }
        }
        let frame = self.ingest(raw)?;

        let sub_snr = snr(&frame);
        self.metrics.sub_snr.record(sub_snr);
        self.metrics.subs_added += 1;

        self.subs.establish(frame.shape(), Some(raw.pixel_type));
        self.full_size.get_or_insert((raw.width, raw.height));
        let id = self.subs.push(frame, sub_snr);
        debug!(sub = %id, snr = sub_snr, "Sub added");
        Ok(id)
    }

    /// Record the plate solver's result for the most recently added sub.
    pub fn solver_done(&mut self, outcome: SolveOutcome) -> Result<SubId> {
        let observer = Arc::clone(&self.observer);
        let sub = self.subs.latest_pending_mut().ok_or(StackError::NoPendingSub)?;
        let id = sub.id;

        let failure = match outcome {
            SolveOutcome::Solved {
                wcs,
                hfr,
                num_stars,
            } => match wcs.validate() {
                Ok(()) => {
                    sub.wcs = Some(Arc::new(wcs));
                    sub.quality = SubQuality { hfr, num_stars };
                    sub.status = SubStatus::Ok;
                    if hfr > 0.0 && hfr.is_finite() {
                        self.hfr_sum += hfr;
                        self.hfr_count += 1;
                    }
                    debug!(sub = %id, hfr, num_stars, "Sub solved");
                    None
                }
                Err(e) => {
                    warn!(sub = %id, error = %e, "Solver returned an unusable WCS");
                    Some(SubStatus::SolveFailed)
                }
            },
            SolveOutcome::Failed => {
                warn!(sub = %id, "Plate solve failed");
                Some(SubStatus::SolveFailed)
            }
            SolveOutcome::TimedOut => {
                warn!(sub = %id, "Plate solve timed out");
                Some(SubStatus::SolveFailed)
            }
        };

        if let Some(status) = failure {
            sub.fail(status);
            observer.sub_event(id, SubEvent::Failed(status));
        }
        Ok(id)
    }

    /// Install or replace the master dark or flat.
    ///
    /// Masters must match the session shape but may use a different pixel
    /// type from the subs.
    pub fn add_master(&mut self, kind: MasterKind, raw: &RawImage<'_>) -> Result<()> {
        let frame = self.ingest(raw)?;
        let shape = frame.shape();
        self.masters.install(kind, frame, self.subs.pixel_type())?;
        self.subs.establish(shape, None);
        self.full_size.get_or_insert((raw.width, raw.height));
        info!(%kind, %shape, "Master installed");
        Ok(())
    }

    pub fn masters(&self) -> &MasterFrames {
        &self.masters
    }

    /// Run one stack pass.
    ///
    /// Before the transition every good sub in memory is combined from
    /// scratch. Once `chunk_size` good subs have been combined the composite
    /// is post-processed, condensed into a running stack, and the subs are
    /// released; from then on each pass folds only the new subs in.
    ///
    /// Returns `Ok(None)` when there is nothing to combine. A cancelled pass
    /// returns [`StackError::Cancelled`]; the token is cleared afterwards.
    pub fn stack(&mut self) -> Result<Option<StackReport>> {
        let started = Instant::now();
        let failed_before = self.metrics.subs_failed;
        self.prepare_subs();
        let removed = self.subs.remove_failed();
        self.metrics.subs_failed += removed;
        let failed = self.metrics.subs_failed - failed_before;

        let result = match self.state {
            SessionState::Empty | SessionState::Accumulating => self.stack_initial(failed, started),
            SessionState::Running => self.stack_incremental(failed, started),
        };
        self.cancel.reset();
        let report = match result {
            Err(StackError::Cancelled) => {
                warn!("Stack cancelled, keeping the previous composite");
                return Err(StackError::Cancelled);
            }
            other => other?,
        };

        if let Some(ref report) = report {
            info!(
                state = %report.state,
                subs = report.total_subs,
                stacked = report.subs_stacked,
                failed = report.subs_failed,
                snr = report.snr,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Stack complete"
            );
            self.observer.stack_complete(report);
        }
        Ok(report)
    }

    fn stack_initial(&mut self, failed: usize, started: Instant) -> Result<Option<StackReport>> {
        let (frames, weights, hfrs, ids) = self.ready_batch();
        if frames.is_empty() {
            debug!("No good subs to stack");
            return Ok(None);
        }

        let batch = Batch::new(&frames, &weights).with_hfrs(&hfrs);
        let combined = self.combiner.combine(&batch, &self.cancel)?;
        let count = frames.len();
        drop(frames);

        for (&id, &weight) in ids.iter().zip(&weights) {
            self.observer.sub_event(id, SubEvent::Stacked { weight });
        }

        let Combined {
            frame,
            total_weight,
            carry,
        } = combined;
        self.stacked = Some(Arc::new(frame));
        self.state = SessionState::Accumulating;

        let transition = count >= self.config.chunk_size;
        if transition {
            let reference = self
                .reference
                .clone()
                .ok_or_else(|| StackError::Stacking("no alignment reference".into()))?;
            self.running = Some(RunningStackState::new(count, total_weight, reference, carry));
            self.subs.take_ready();
            self.state = SessionState::Running;
            info!(subs = count, "Switched to running stack");
        }
        self.metrics.subs_stacked = count;
        self.refresh_composite(count, transition);

        Ok(Some(self.report(count, failed, count, total_weight, started)))
    }

    fn stack_incremental(&mut self, failed: usize, started: Instant) -> Result<Option<StackReport>> {
        let (frames, weights, hfrs, ids) = self.ready_batch();
        if frames.is_empty() {
            debug!("No new subs for the running stack");
            return Ok(None);
        }
        let prior = self
            .stacked
            .clone()
            .ok_or_else(|| StackError::Stacking("running stack has no composite".into()))?;
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| StackError::Stacking("running stack state missing".into()))?;

        let batch = Batch::new(&frames, &weights).with_hfrs(&hfrs);
        let combined = self.combiner.combine_incremental(
            &prior,
            running.total_weight,
            &running.carry,
            &batch,
            &self.cancel,
        )?;
        let added = frames.len();
        drop(frames);

        for (&id, &weight) in ids.iter().zip(&weights) {
            self.observer.sub_event(id, SubEvent::Stacked { weight });
        }

        self.subs.take_ready();
        let Combined {
            frame,
            total_weight,
            carry,
        } = combined;
        let total_subs = match self.running.as_mut() {
            Some(running) => {
                running.absorb(added, total_weight, carry);
                running.num_subs
            }
            None => added,
        };
        self.stacked = Some(Arc::new(frame));
        self.metrics.subs_stacked = total_subs;
        self.refresh_composite(total_subs, true);

        Ok(Some(self.report(added, failed, total_subs, total_weight, started)))
    }

    /// Frames, weights and working-grid HFRs of every sub that is ready to
    /// combine.
    fn ready_batch(&self) -> (Vec<&Frame>, Vec<f32>, Vec<f64>, Vec<SubId>) {
        let ready: Vec<&Sub> = self
            .subs
            .iter()
            .filter(|s| s.status == SubStatus::Ok && s.is_aligned())
            .collect();
        let frames = ready.iter().map(|s| &s.frame).collect();
        let weights = ready.iter().map(|s| self.weigher.weight(&s.quality)).collect();
        let downscale = self.downscale() as f64;
        let hfrs = ready.iter().map(|s| s.quality.hfr / downscale).collect();
        let ids = ready.iter().map(|s| s.id).collect();
        (frames, weights, hfrs, ids)
    }

    fn report(
        &self,
        stacked: usize,
        failed: usize,
        total_subs: usize,
        total_weight: f64,
        started: Instant,
    ) -> StackReport {
        let (snr, post_processed) = self
            .composite
            .as_ref()
            .map(|c| (c.snr, c.post_processed))
            .unwrap_or((0.0, false));
        StackReport {
            state: self.state,
            subs_stacked: stacked,
            subs_failed: failed,
            total_subs,
            total_weight,
            snr,
            post_processed,
            elapsed: started.elapsed(),
        }
    }

    /// Rebuild the composite from the last combined image.
    fn refresh_composite(&mut self, num_subs: usize, post: bool) {
        let Some(stacked) = self.stacked.clone() else {
            return;
        };
        let pp = &self.config.post_process;
        let (image, post_processed) = if post && !pp.is_noop() {
            let hfr = (self.hfr_count > 0)
                .then(|| self.hfr_sum / self.hfr_count as f64 / self.downscale() as f64);
            let inputs = PsfInputs {
                stars: &self.stars,
                hfr,
            };
            (Arc::new(post_process(&stacked, pp, inputs)), true)
        } else {
            (stacked, false)
        };

        let image_snr = snr(&image);
        self.metrics.stack_snr = image_snr;
        self.composite = Some(Composite {
            image,
            snr: image_snr,
            num_subs,
            post_processed,
        });
    }

    /// Re-run post-processing on the last combined image with new settings.
    pub fn redo_post_process(&mut self, config: PostProcessConfig) -> Result<()> {
        if self.stacked.is_none() {
            return Err(StackError::EmptySequence);
        }
        self.config.post_process = config;
        let num_subs = self.composite.as_ref().map(|c| c.num_subs).unwrap_or(0);
        self.refresh_composite(num_subs, true);
        Ok(())
    }

    /// Solution of the alignment reference on the composite's grid.
    pub fn wcs_ref(&self) -> Option<Arc<Wcs>> {
        self.running
            .as_ref()
            .map(|r| &r.reference)
            .or(self.reference.as_ref())
            .map(|r| Arc::clone(r.stack_frame()))
    }

    /// The composite as a 16-bit buffer for an image encoder.
    pub fn output(&self, layout: ChannelLayout) -> Option<OutputImage> {
        self.composite
            .as_ref()
            .map(|c| OutputImage::from_frame(&c.image, layout, self.bayer.clone()))
    }

    /// Drop every sub, master, reference and composite.
    pub fn reset(&mut self) {
        self.subs.reset();
        self.masters.clear();
        self.full_size = None;
        self.reference = None;
        self.running = None;
        self.stacked = None;
        self.composite = None;
        self.stars.clear();
        self.hfr_sum = 0.0;
        self.hfr_count = 0;
        self.metrics = SessionMetrics::default();
        self.state = SessionState::Empty;
        self.cancel.reset();
        info!("Session reset");
    }

    /// Calibrate and align every solved sub that has not been processed yet,
    /// choosing the alignment reference on the way.
    fn prepare_subs(&mut self) {
        let observer = Arc::clone(&self.observer);
        calibrate_subs(self.subs.as_mut_slice(), &self.masters, observer.as_ref());

        if self.reference.is_none() {
            if let Some(sub) = self
                .subs
                .iter()
                .find(|s| s.status == SubStatus::Ok && s.is_calibrated())
            {
                if let Some(wcs) = &sub.wcs {
                    info!(sub = %sub.id, "Alignment reference chosen");
                    self.reference = Some(ReferenceWcs::new(sub.id, Arc::clone(wcs), self.downscale()));
                }
            }
        }

        let Some(reference) = self.reference.clone() else {
            return;
        };
        let (full_width, full_height) = self.full_size.unwrap_or((0, 0));
        let ctx = AlignContext {
            reference: &reference,
            config: self.config.alignment,
            full_width,
            full_height,
            downscale: self.downscale(),
        };
        align_subs(self.subs.as_mut_slice(), &ctx, observer.as_ref());
    }
}

fn for_each_sub<F>(subs: &mut [Sub], work: F)
where
    F: Fn(&mut Sub) + Sync + Send,
{
    if subs.len() >= PARALLEL_FRAME_THRESHOLD {
        subs.par_iter_mut().for_each(work);
    } else {
        subs.iter_mut().for_each(work);
    }
}

fn calibrate_subs(subs: &mut [Sub], masters: &MasterFrames, observer: &dyn StackObserver) {
    for_each_sub(subs, |sub| {
        if sub.status != SubStatus::Ok || sub.is_calibrated() {
            return;
        }
        match calibration::calibrate(&mut sub.frame, masters) {
            Ok(applied) => {
                sub.progress = SubProgress::Calibrated;
                debug!(sub = %sub.id, dark = applied.dark, flat = applied.flat, "Sub calibrated");
                observer.sub_event(sub.id, SubEvent::Calibrated(applied));
            }
            Err(e) => {
                warn!(sub = %sub.id, error = %e, "Calibration failed");
                sub.fail(SubStatus::CalibrationFailed);
                observer.sub_event(sub.id, SubEvent::Failed(SubStatus::CalibrationFailed));
            }
        }
    });
}

struct AlignContext<'a> {
    reference: &'a ReferenceWcs,
    config: AlignmentConfig,
    full_width: usize,
    full_height: usize,
    downscale: usize,
}

fn align_subs(subs: &mut [Sub], ctx: &AlignContext<'_>, observer: &dyn StackObserver) {
    for_each_sub(subs, |sub| {
        if sub.status != SubStatus::Ok || !sub.is_calibrated() || sub.is_aligned() {
            return;
        }
        if sub.id == ctx.reference.sub || ctx.config.method == AlignmentMethod::None {
            sub.progress = SubProgress::Aligned;
            observer.sub_event(sub.id, SubEvent::Aligned(Displacement::default()));
            return;
        }

        let result = match &sub.wcs {
            Some(wcs) => align::align_frame(
                &sub.frame,
                ctx.reference.solved(),
                wcs,
                ctx.full_width,
                ctx.full_height,
                ctx.downscale,
                ctx.config.interpolation,
            ),
            None => Err(StackError::Wcs("sub has no solution".into())),
        };

        match result {
            Ok((frame, displacement)) => {
                sub.frame = frame;
                sub.progress = SubProgress::Aligned;
                debug!(
                    sub = %sub.id,
                    dx = displacement.dx,
                    dy = displacement.dy,
                    rotation = displacement.rotation_deg,
                    "Sub aligned"
                );
                observer.sub_event(sub.id, SubEvent::Aligned(displacement));
            }
            Err(e) => {
                warn!(sub = %sub.id, error = %e, "Alignment failed");
                sub.fail(SubStatus::AlignmentFailed);
                observer.sub_event(sub.id, SubEvent::Failed(SubStatus::AlignmentFailed));
            }
        }
    });
}
