mod common;

use std::sync::{Arc, Mutex};

use starstack_core::align::Wcs;
use starstack_core::calibration::MasterKind;
use starstack_core::error::StackError;
use starstack_core::frame::{Frame, ImageShape};
use starstack_core::io::raw::{OwnedRawImage, RawImage};
use starstack_core::pipeline::{
    BayerInfo, ChannelLayout, Downscale, LiveStackConfig, LiveStacker, PostProcessConfig, RejectionMode,
    SessionState, SolveOutcome, StackObserver, StackReport, SubEvent, SubId, SubStatus,
    WeightingMode,
};
use starstack_core::stack::image_mm::MmParams;
use starstack_core::stack::mean::weighted_mean;

use common::{assert_all_close, constant_raw, noisy_frame, raw_from_fn, solved, test_wcs};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const W: usize = 8;
const H: usize = 8;

fn config(chunk_size: usize, rejection: RejectionMode) -> LiveStackConfig {
    LiveStackConfig {
        chunk_size,
        rejection,
        ..LiveStackConfig::default()
    }
}

fn add_solved(stacker: &mut LiveStacker, raw: &OwnedRawImage) -> SubId {
    stacker.add_sub(&raw.as_raw()).unwrap();
    stacker.solver_done(solved(test_wcs(W, H))).unwrap()
}

/// Quantise a float frame into a 16-bit raw buffer.
fn raw_from_frame(frame: &Frame) -> OwnedRawImage {
    raw_from_fn(frame.width(), frame.height(), frame.channels(), |c, y, x| {
        frame.data[[c, y, x]].round() as u16
    })
}

fn composite(stacker: &LiveStacker) -> &Frame {
    &stacker.composite().expect("composite").image
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(SubId, SubEvent)>>,
    reports: Mutex<Vec<StackReport>>,
}

impl StackObserver for Recorder {
    fn sub_event(&self, sub: SubId, event: SubEvent) {
        self.events.lock().unwrap().push((sub, event));
    }

    fn stack_complete(&self, report: &StackReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[test]
fn test_three_identical_subs() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::None));
    for _ in 0..3 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }

    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.state, SessionState::Accumulating);
    assert_eq!(report.subs_stacked, 3);
    assert!((report.total_weight - 3.0).abs() < 1e-9);
    assert!(!report.post_processed);
    assert_all_close(composite(&stacker), 100.0, 1e-2);

    let out = stacker.output(ChannelLayout::Planar).unwrap();
    assert_eq!(out.pixels.len(), W * H);
    assert!(out.pixels.iter().all(|&p| p == 100));
}

#[test]
fn test_shape_rejection_leaves_state_untouched() {
    let mut stacker = LiveStacker::new(LiveStackConfig::default());
    let first = add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    let before = stacker.metrics();

    let wider = constant_raw(W + 1, H, 1, 100);
    assert!(matches!(
        stacker.add_sub(&wider.as_raw()),
        Err(StackError::ShapeMismatch { .. })
    ));
    let colour = constant_raw(W, H, 3, 100);
    assert!(matches!(
        stacker.add_sub(&colour.as_raw()),
        Err(StackError::ShapeMismatch { .. })
    ));
    let bytes = vec![7u8; W * H];
    let eight_bit = RawImage::new(&bytes, W, H, 1, 1).unwrap();
    assert!(matches!(
        stacker.add_sub(&eight_bit),
        Err(StackError::PixelTypeMismatch { .. })
    ));

    assert_eq!(stacker.pending_subs(), 1);
    assert_eq!(stacker.metrics(), before);
    assert_eq!(stacker.shape(), Some(ImageShape::new(W, H, 1)));
    assert_eq!(stacker.sub(first).unwrap().status, SubStatus::Ok);
}

#[test]
fn test_solver_done_needs_pending_sub() {
    let mut stacker = LiveStacker::new(LiveStackConfig::default());
    assert!(matches!(
        stacker.solver_done(SolveOutcome::Failed),
        Err(StackError::NoPendingSub)
    ));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    assert!(matches!(
        stacker.solver_done(SolveOutcome::Failed),
        Err(StackError::NoPendingSub)
    ));
}

#[test]
fn test_solve_outcome_from_solver_arguments() {
    let wcs = test_wcs(W, H);
    assert_eq!(
        SolveOutcome::from_solver(Some(&wcs), true, true, 2.0, 10),
        SolveOutcome::TimedOut
    );
    assert_eq!(
        SolveOutcome::from_solver(Some(&wcs), false, false, 2.0, 10),
        SolveOutcome::Failed
    );
    assert_eq!(
        SolveOutcome::from_solver(None, false, true, 2.0, 10),
        SolveOutcome::Failed
    );
    assert_eq!(
        SolveOutcome::from_solver(Some(&wcs), false, true, 2.0, 10),
        SolveOutcome::Solved {
            wcs,
            hfr: 2.0,
            num_stars: 10
        }
    );
}

#[test]
fn test_unsolved_subs_are_dropped() {
    let recorder = Arc::new(Recorder::default());
    let mut stacker = LiveStacker::new(LiveStackConfig::default()).with_observer(recorder.clone());

    stacker.add_sub(&constant_raw(W, H, 1, 100).as_raw()).unwrap();
    stacker.solver_done(SolveOutcome::TimedOut).unwrap();
    stacker.add_sub(&constant_raw(W, H, 1, 100).as_raw()).unwrap();
    let singular = Wcs::new((1.0, 1.0), (0.0, 0.0), [[0.0, 0.0], [0.0, 0.0]]);
    let id = stacker.solver_done(solved(singular)).unwrap();
    assert_eq!(stacker.sub(id).unwrap().status, SubStatus::SolveFailed);

    assert!(stacker.stack().unwrap().is_none());
    assert_eq!(stacker.state(), SessionState::Empty);
    assert!(stacker.composite().is_none());
    assert!(stacker.output(ChannelLayout::Planar).is_none());
    assert_eq!(stacker.pending_subs(), 0);
    assert_eq!(stacker.metrics().subs_failed, 2);

    let failures = recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, e)| matches!(e, SubEvent::Failed(SubStatus::SolveFailed)))
        .count();
    assert_eq!(failures, 2);
}

#[test]
fn test_solving_sub_waits() {
    let mut stacker = LiveStacker::new(LiveStackConfig::default());
    stacker.add_sub(&constant_raw(W, H, 1, 100).as_raw()).unwrap();
    assert!(stacker.stack().unwrap().is_none());
    assert_eq!(stacker.pending_subs(), 1);

    stacker.solver_done(solved(test_wcs(W, H))).unwrap();
    assert!(stacker.stack().unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Calibration and alignment inside the session
// ---------------------------------------------------------------------------

#[test]
fn test_calibration_applied_once() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::None));
    stacker
        .add_master(MasterKind::Dark, &constant_raw(W, H, 1, 10).as_raw())
        .unwrap();
    add_solved(&mut stacker, &constant_raw(W, H, 1, 110));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 110));

    stacker.stack().unwrap();
    assert_all_close(composite(&stacker), 100.0, 1e-2);
    // A second pass re-combines the same subs without calibrating again.
    stacker.stack().unwrap();
    assert_all_close(composite(&stacker), 100.0, 1e-2);
}

#[test]
fn test_master_may_use_other_pixel_type() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::None));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 300));

    let flat: Vec<f32> = vec![0.5; W * H];
    let mut bytes = vec![0u8; flat.len() * 4];
    for (chunk, v) in bytes.chunks_exact_mut(4).zip(&flat) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    let raw = RawImage::new(&bytes, W, H, 1, 4).unwrap();
    stacker.add_master(MasterKind::Flat, &raw).unwrap();
    assert!(stacker.masters().flat_inverse().is_some());

    let wrong = constant_raw(W * 2, H, 1, 10);
    assert!(stacker.add_master(MasterKind::Dark, &wrong.as_raw()).is_err());
    assert!(stacker.masters().dark().is_none());

    stacker.stack().unwrap();
    assert_all_close(composite(&stacker), 300.0, 1e-2);
}

#[test]
fn test_alignment_failure_drops_sub() {
    let recorder = Arc::new(Recorder::default());
    let mut stacker =
        LiveStacker::new(config(5, RejectionMode::None)).with_observer(recorder.clone());
    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));

    // Solution on the opposite side of the sky.
    let mut far = test_wcs(W, H);
    far.crval = (0.0, -45.0);
    stacker.add_sub(&constant_raw(W, H, 1, 500).as_raw()).unwrap();
    stacker.solver_done(solved(far)).unwrap();

    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.subs_stacked, 1);
    assert_eq!(report.subs_failed, 1);
    assert_all_close(composite(&stacker), 100.0, 1e-2);
    assert!(recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|(_, e)| matches!(e, SubEvent::Failed(SubStatus::AlignmentFailed))));
}

#[test]
fn test_shifted_sub_is_registered() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::None));
    let (w, h) = (32, 32);
    let reference = test_wcs(w, h);

    let star = |sx: usize, sy: usize| {
        raw_from_fn(w, h, 1, move |_, y, x| if (x, y) == (sx, sy) { 1000 } else { 0 })
    };
    stacker.add_sub(&star(10, 10).as_raw()).unwrap();
    stacker.solver_done(solved(reference.clone())).unwrap();

    // Same sky, camera moved: the star lands 3 px right and 2 px up.
    let mut moved = reference.clone();
    moved.crpix = (reference.crpix.0 + 3.0, reference.crpix.1 - 2.0);
    stacker.add_sub(&star(13, 8).as_raw()).unwrap();
    stacker.solver_done(solved(moved)).unwrap();

    stacker.stack().unwrap();
    let image = composite(&stacker);
    assert!((image.data[[0, 10, 10]] - 1000.0).abs() < 1.0);
}

// ---------------------------------------------------------------------------
// Running stack
// ---------------------------------------------------------------------------

#[test]
fn test_transition_to_running_stack() {
    let mut stacker = LiveStacker::new(config(3, RejectionMode::default()));
    for _ in 0..2 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }
    stacker.stack().unwrap();
    assert_eq!(stacker.state(), SessionState::Accumulating);
    assert_eq!(stacker.pending_subs(), 2);
    assert!(stacker.running().is_none());
    assert!(stacker.wcs_ref().is_some());

    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.state, SessionState::Running);
    assert_eq!(stacker.pending_subs(), 0);
    let running = stacker.running().unwrap();
    assert_eq!(running.num_subs, 3);
    assert!(running.carry.clip().is_some());

    for _ in 0..2 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }
    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.subs_stacked, 2);
    assert_eq!(report.total_subs, 5);
    assert_eq!(stacker.running().unwrap().num_subs, 5);
    assert!((stacker.running().unwrap().total_weight - 5.0).abs() < 1e-9);
    assert_eq!(stacker.metrics().subs_stacked, 5);
    assert_all_close(composite(&stacker), 100.0, 1e-2);

    // Nothing new to fold in.
    assert!(stacker.stack().unwrap().is_none());
}

#[test]
fn test_sigma_clip_session_rejects_outlier() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::default()));
    for v in [10u16, 12, 11, 1000, 9] {
        add_solved(&mut stacker, &constant_raw(W, H, 1, v));
    }
    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.state, SessionState::Running);
    assert_all_close(composite(&stacker), 10.5, 1e-2);

    // The carried bounds reject a later outlier too.
    add_solved(&mut stacker, &constant_raw(W, H, 1, 4000));
    stacker.stack().unwrap();
    assert_all_close(composite(&stacker), 10.5, 1e-2);
}

#[test]
fn test_running_stack_folds_tied_subs() {
    // Integer ADU makes most samples of a pixel tie exactly.
    let mut stacker = LiveStacker::new(config(5, RejectionMode::default()));
    for v in [100u16, 100, 100, 101, 99] {
        add_solved(&mut stacker, &constant_raw(W, H, 1, v));
    }
    stacker.stack().unwrap();
    assert_eq!(stacker.state(), SessionState::Running);

    for round in 0..10 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 101));
        add_solved(&mut stacker, &constant_raw(W, H, 1, 99));
        let report = stacker.stack().unwrap().unwrap();
        assert_eq!(report.subs_stacked, 2, "round {round}");
    }
    let running = stacker.running().unwrap();
    assert_eq!(running.num_subs, 25);
    let state = running.carry.clip().unwrap();
    assert!(state.iter().all(|b| (b.weight_sum - 25.0).abs() < 1e-4));
    assert_all_close(composite(&stacker), 100.0, 1e-3);
}

#[test]
fn test_dark_clamped_zeros_keep_folding() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::default()));
    stacker
        .add_master(MasterKind::Dark, &constant_raw(W, H, 1, 200).as_raw())
        .unwrap();
    for v in [150u16, 180, 200, 190, 203] {
        add_solved(&mut stacker, &constant_raw(W, H, 1, v));
    }
    stacker.stack().unwrap();
    assert_all_close(composite(&stacker), 0.0, 1e-4);

    add_solved(&mut stacker, &constant_raw(W, H, 1, 201));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 202));
    stacker.stack().unwrap();
    assert_all_close(composite(&stacker), 0.5, 1e-4);
    let state = stacker.running().unwrap().carry.clip().unwrap();
    assert!(state.iter().all(|b| (b.weight_sum - 6.0).abs() < 1e-4));
}

#[test]
fn test_image_mm_session_rejects_outlier() {
    let mut stacker = LiveStacker::new(config(3, RejectionMode::ImageMm(MmParams::default())));
    for _ in 0..3 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }
    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.state, SessionState::Running);
    assert_all_close(composite(&stacker), 100.0, 1e-2);
    let state = stacker.running().unwrap().carry.image_mm().unwrap();
    assert_eq!(state.history.len(), 3);

    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 6000));
    stacker.stack().unwrap();
    let running = stacker.running().unwrap();
    assert_eq!(running.num_subs, 5);
    assert!((running.total_weight - 5.0).abs() < 1e-9);
    assert_eq!(running.carry.image_mm().unwrap().history.len(), 5);
    assert_all_close(composite(&stacker), 100.0, 0.5);
}

#[test]
fn test_incremental_matches_one_shot() {
    let shape = ImageShape::new(W, H, 1);
    let frames: Vec<Frame> = (0..6)
        .map(|i| noisy_frame(shape, 2000.0, 400.0, 100 + i))
        .map(|f| {
            let mut f = f;
            f.data.mapv_inplace(|v| v.round());
            f
        })
        .collect();

    let mut stacker = LiveStacker::new(config(2, RejectionMode::None));
    for (i, frame) in frames.iter().enumerate() {
        add_solved(&mut stacker, &raw_from_frame(frame));
        if i == 1 || i == 3 {
            stacker.stack().unwrap();
        }
    }
    stacker.stack().unwrap();
    assert_eq!(stacker.running().unwrap().num_subs, 6);

    let refs: Vec<&Frame> = frames.iter().collect();
    let (expected, _) = weighted_mean(&refs, &[1.0; 6]).unwrap();
    for (a, b) in composite(&stacker).data.iter().zip(expected.data.iter()) {
        assert!((a - b).abs() < 0.1, "{a} vs {b}");
    }
}

#[test]
fn test_inverse_hfr_weighting() {
    let mut cfg = config(5, RejectionMode::None);
    cfg.weighting = WeightingMode::InverseHfr;
    let mut stacker = LiveStacker::new(cfg);

    for (value, hfr) in [(0u16, 1.0), (400, 3.0)] {
        stacker.add_sub(&constant_raw(W, H, 1, value).as_raw()).unwrap();
        stacker
            .solver_done(SolveOutcome::Solved {
                wcs: test_wcs(W, H),
                hfr,
                num_stars: 50,
            })
            .unwrap();
    }
    let report = stacker.stack().unwrap().unwrap();
    assert!((report.total_weight - 4.0 / 3.0).abs() < 1e-6);
    assert_all_close(composite(&stacker), 100.0, 1e-2);
}

#[test]
fn test_downscaled_session() {
    let mut cfg = config(5, RejectionMode::None);
    cfg.downscale = Downscale::X2;
    let mut stacker = LiveStacker::new(cfg);
    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    assert_eq!(stacker.shape(), Some(ImageShape::new(W / 2, H / 2, 1)));

    stacker.stack().unwrap();
    assert_eq!(composite(&stacker).shape(), ImageShape::new(W / 2, H / 2, 1));

    let wcs_ref = stacker.wcs_ref().unwrap();
    assert!((wcs_ref.pixel_scale_arcsec() - 3.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Post-processing, cancellation, reset
// ---------------------------------------------------------------------------

#[test]
fn test_redo_post_process() {
    let mut stacker = LiveStacker::new(config(2, RejectionMode::None));
    assert!(matches!(
        stacker.redo_post_process(PostProcessConfig::default()),
        Err(StackError::EmptySequence)
    ));

    let shape = ImageShape::new(W, H, 1);
    for i in 0..2 {
        add_solved(&mut stacker, &raw_from_frame(&noisy_frame(shape, 1000.0, 300.0, i)));
    }
    stacker.stack().unwrap();
    let plain = composite(&stacker).clone();

    let mut pp = PostProcessConfig::default();
    pp.sharpen.amount = 1.0;
    stacker.redo_post_process(pp.clone()).unwrap();
    assert!(stacker.composite().unwrap().post_processed);
    assert_ne!(composite(&stacker), &plain);
    assert_eq!(stacker.config().post_process, pp);

    stacker.redo_post_process(PostProcessConfig::default()).unwrap();
    assert!(!stacker.composite().unwrap().post_processed);
    assert_eq!(composite(&stacker), &plain);
}

#[test]
fn test_cancelled_stack_keeps_previous_composite() {
    let mut stacker = LiveStacker::new(config(10, RejectionMode::default()));
    for _ in 0..2 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }
    stacker.stack().unwrap();

    add_solved(&mut stacker, &constant_raw(W, H, 1, 400));
    let token = stacker.cancel_token();
    token.cancel();
    assert!(matches!(stacker.stack(), Err(StackError::Cancelled)));
    assert_all_close(composite(&stacker), 100.0, 1e-2);
    assert_eq!(stacker.composite().unwrap().num_subs, 2);
    assert!(!token.is_cancelled());

    let report = stacker.stack().unwrap().unwrap();
    assert_eq!(report.subs_stacked, 3);
    assert_eq!(stacker.composite().unwrap().num_subs, 3);
}

#[test]
fn test_observer_sees_pipeline() {
    let recorder = Arc::new(Recorder::default());
    let mut stacker =
        LiveStacker::new(config(5, RejectionMode::None)).with_observer(recorder.clone());
    for _ in 0..2 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }
    stacker.stack().unwrap();

    let events = recorder.events.lock().unwrap();
    let count = |pred: fn(&SubEvent) -> bool| events.iter().filter(|(_, e)| pred(e)).count();
    assert_eq!(count(|e| matches!(e, SubEvent::Calibrated(_))), 2);
    assert_eq!(count(|e| matches!(e, SubEvent::Aligned(_))), 2);
    assert_eq!(count(|e| matches!(e, SubEvent::Stacked { .. })), 2);
    assert_eq!(recorder.reports.lock().unwrap().len(), 1);
}

#[test]
fn test_reset_releases_everything() {
    let mut stacker = LiveStacker::new(config(2, RejectionMode::None));
    stacker
        .add_master(MasterKind::Dark, &constant_raw(W, H, 1, 10).as_raw())
        .unwrap();
    for _ in 0..2 {
        add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    }
    stacker.stack().unwrap();
    assert_eq!(stacker.state(), SessionState::Running);

    stacker.reset();
    assert_eq!(stacker.state(), SessionState::Empty);
    assert!(stacker.composite().is_none());
    assert!(stacker.running().is_none());
    assert!(stacker.wcs_ref().is_none());
    assert!(stacker.masters().is_empty());
    assert_eq!(stacker.shape(), None);
    assert_eq!(stacker.metrics().subs_added, 0);

    // A new session may use a different shape.
    stacker.add_sub(&constant_raw(4, 4, 3, 50).as_raw()).unwrap();
    assert_eq!(stacker.shape(), Some(ImageShape::new(4, 4, 3)));
}

#[test]
fn test_sub_snr_metrics() {
    let mut stacker = LiveStacker::new(LiveStackConfig::default());
    let shape = ImageShape::new(W, H, 1);
    add_solved(&mut stacker, &raw_from_frame(&noisy_frame(shape, 1000.0, 200.0, 1)));
    add_solved(&mut stacker, &constant_raw(W, H, 1, 100));
    let metrics = stacker.metrics();
    assert_eq!(metrics.subs_added, 2);
    assert_eq!(metrics.sub_snr.count, 1);
    assert!(metrics.sub_snr.mean > 0.0);
}

#[test]
fn test_output_layout_and_bayer() {
    let mut stacker = LiveStacker::new(config(5, RejectionMode::None));
    let bayer = BayerInfo {
        pattern: "RGGB".into(),
        offset_x: 0,
        offset_y: 1,
    };
    stacker.set_bayer(Some(bayer.clone()));
    add_solved(&mut stacker, &raw_from_fn(W, H, 3, |c, _, _| 100 * (c as u16 + 1)));
    stacker.stack().unwrap();

    let planar = stacker.output(ChannelLayout::Planar).unwrap();
    assert_eq!(planar.channels, 3);
    assert_eq!(planar.bayer, Some(bayer));
    assert_eq!(planar.pixels[0], 100);
    assert_eq!(planar.pixels[W * H], 200);

    let interleaved = stacker.output(ChannelLayout::Interleaved).unwrap();
    assert_eq!(&interleaved.pixels[..3], &[100, 200, 300]);
}
