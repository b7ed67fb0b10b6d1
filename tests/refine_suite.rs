use async_trait::async_trait;
use face_composer::adjust::{AdjustmentStep, Direction, Magnitude, PartTarget, TargetedStep};
use face_composer::cancel::CancelToken;
use face_composer::compose::Compositor;
use face_composer::config::{PlacementConfig, PlacementSpec};
use face_composer::error::{ConfigError, FeedbackError};
use face_composer::feedback::{AdjustmentResult, FeedbackEngine, FeedbackRequest};
use face_composer::placement::PartKey;
use face_composer::refine::{
    ConvergenceCause, FailureReason, RefineOptions, RefinementController, RunState,
};
use face_composer::selection::Selection;
use face_composer::theme::Theme;
use face_composer::{PartCategory, Side};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    selections: Vec<Selection>,
    reference: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let nose = root.join("nose.png");
    RgbaImage::from_pixel(40, 40, Rgba([120, 80, 40, 255]))
        .save(&nose)
        .unwrap();
    let eye = root.join("eye.png");
    RgbaImage::from_pixel(30, 15, Rgba([0, 0, 0, 255]))
        .save(&eye)
        .unwrap();
    let reference = root.join("reference.png");
    RgbImage::from_pixel(64, 64, Rgb([200, 180, 160]))
        .save(&reference)
        .unwrap();
    Fixture {
        _dir: dir,
        root,
        selections: vec![
            Selection::new(PartCategory::Nose, nose),
            Selection::new(PartCategory::Eye, eye),
        ],
        reference,
    }
}

fn controller(engine: Arc<dyn FeedbackEngine>, options: RefineOptions) -> RefinementController {
    RefinementController::new(Compositor::new(200, &Theme::classic()), engine, options)
}

fn options(budget: u32) -> RefineOptions {
    RefineOptions {
        budget,
        timeout: Duration::from_secs(5),
        output_dir: None,
        run_id: "test".to_string(),
    }
}

fn nose_step(direction: Direction) -> TargetedStep {
    TargetedStep::new(
        PartTarget::category(PartCategory::Nose),
        AdjustmentStep::moved(direction, Magnitude::Normal),
    )
}

/// Never proposes anything.
struct EmptyEngine;

#[async_trait]
impl FeedbackEngine for EmptyEngine {
    async fn suggest_adjustments(
        &self,
        _request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        Ok(AdjustmentResult::default())
    }
}

/// Alternates left / right moves on the nose.
#[derive(Default)]
struct AlternatingEngine {
    calls: AtomicU32,
}

#[async_trait]
impl FeedbackEngine for AlternatingEngine {
    async fn suggest_adjustments(
        &self,
        _request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let direction = if call % 2 == 0 {
            Direction::Left
        } else {
            Direction::Right
        };
        Ok(AdjustmentResult::with_steps(vec![nose_step(direction)]))
    }
}

/// Keeps nudging the nose upward and records what it was shown.
#[derive(Default)]
struct DriftingEngine {
    seen_iterations: Mutex<Vec<(u32, usize)>>,
}

#[async_trait]
impl FeedbackEngine for DriftingEngine {
    async fn suggest_adjustments(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        self.seen_iterations
            .lock()
            .unwrap()
            .push((request.iteration, request.history.len()));
        Ok(AdjustmentResult {
            steps: vec![TargetedStep::new(
                PartTarget::category(PartCategory::Nose),
                AdjustmentStep::moved(Direction::Up, Magnitude::Slight),
            )],
            similarity: Some(0.5),
            ..AdjustmentResult::default()
        })
    }
}

/// Fails the first `failures` calls, then reports satisfaction.
struct FlakyEngine {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl FeedbackEngine for FlakyEngine {
    async fn suggest_adjustments(
        &self,
        _request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(FeedbackError::Parse("not json".to_string()));
        }
        Ok(AdjustmentResult::converged())
    }
}

/// Sleeps far longer than any test timeout.
#[derive(Default)]
struct SlowEngine {
    calls: AtomicU32,
}

#[async_trait]
impl FeedbackEngine for SlowEngine {
    async fn suggest_adjustments(
        &self,
        _request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AdjustmentResult::converged())
    }
}

/// Never answers.
struct HangingEngine;

#[async_trait]
impl FeedbackEngine for HangingEngine {
    async fn suggest_adjustments(
        &self,
        _request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        std::future::pending().await
    }
}

/// Cancels the run, then still answers with a step.
struct CancellingEngine {
    cancel: CancelToken,
}

#[async_trait]
impl FeedbackEngine for CancellingEngine {
    async fn suggest_adjustments(
        &self,
        _request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError> {
        self.cancel.cancel();
        Ok(AdjustmentResult::with_steps(vec![nose_step(Direction::Up)]))
    }
}

fn nose_y(report: &face_composer::RunReport, iteration: usize) -> f32 {
    report.history.iterations()[iteration]
        .placements
        .get(PartKey::new(PartCategory::Nose, Side::Single))
        .unwrap()
        .base_y
}

#[tokio::test]
async fn empty_feedback_converges_at_round_one() {
    let fx = fixture();
    let report = controller(Arc::new(EmptyEngine), options(5))
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Converged(ConvergenceCause::NoAdjustments)
    ));
    assert_eq!(report.rounds, 1);
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.log.len(), 1);
    assert!(report.log[0].converged);
    assert!(report.log[0].adjustments_applied.is_empty());
}

#[tokio::test]
async fn alternating_moves_converge_instead_of_exhausting() {
    let fx = fixture();
    let engine = Arc::new(AlternatingEngine::default());
    let report = controller(engine.clone(), options(5))
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Converged(ConvergenceCause::Oscillation)
    ));
    assert!(report.rounds <= 2);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    // The reversing step was not applied: the last composite is the moved one.
    assert_eq!(report.history.len(), 2);
    let moved = report.history.iterations()[1]
        .placements
        .get(PartKey::new(PartCategory::Nose, Side::Single))
        .unwrap();
    assert_eq!(moved.base_x, -5.0);
    assert_eq!(
        report.final_composite.placements(),
        &report.history.iterations()[1].placements
    );
}

#[tokio::test]
async fn budget_exhaustion_keeps_every_iteration() {
    let fx = fixture();
    let engine = Arc::new(DriftingEngine::default());
    let report = controller(engine.clone(), options(3))
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(report.final_state, RunState::Exhausted));
    assert_eq!(report.rounds, 3);
    assert_eq!(report.history.len(), 4);
    assert_eq!(report.log.len(), 4);
    assert!(report.log.iter().all(|entry| !entry.converged));

    let base = nose_y(&report, 0);
    for idx in 1..4 {
        assert_eq!(nose_y(&report, idx), base - 3.0 * idx as f32);
        assert_eq!(report.log[idx].adjustments_applied.len(), 1);
        assert_eq!(report.log[idx].similarity, Some(0.5));
    }
    // Eyes were never targeted.
    let eye_left = PartKey::new(PartCategory::Eye, Side::Left);
    assert_eq!(
        report.history.iterations()[3].placements.get(eye_left),
        report.history.iterations()[0].placements.get(eye_left)
    );

    let seen = engine.seen_iterations.lock().unwrap().clone();
    assert_eq!(seen, vec![(0, 1), (1, 2), (2, 3)]);
}

#[tokio::test]
async fn one_failure_is_retried() {
    let fx = fixture();
    let engine = Arc::new(FlakyEngine {
        failures: 1,
        calls: AtomicU32::new(0),
    });
    let report = controller(engine.clone(), options(5))
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Converged(ConvergenceCause::Satisfied)
    ));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn two_consecutive_failures_fail_the_run() {
    let fx = fixture();
    let engine = Arc::new(FlakyEngine {
        failures: u32::MAX,
        calls: AtomicU32::new(0),
    });
    let report = controller(engine.clone(), options(5))
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Failed(FailureReason::Feedback(FeedbackError::Parse(_)))
    ));
    assert!(!report.final_state.is_deliberate_stop());
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.final_composite.size(), 200);
}

#[tokio::test(start_paused = true)]
async fn slow_feedback_times_out_twice() {
    let fx = fixture();
    let engine = Arc::new(SlowEngine::default());
    let mut opts = options(5);
    opts.timeout = Duration::from_secs(2);
    let report = controller(engine.clone(), opts)
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Failed(FailureReason::Feedback(FeedbackError::Timeout(_)))
    ));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancellation_during_feedback_is_a_deliberate_stop() {
    let fx = fixture();
    let cancel = CancelToken::new();
    let controller =
        controller(Arc::new(HangingEngine), options(5)).with_cancel_token(cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let report = controller
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Failed(FailureReason::Cancelled)
    ));
    assert!(report.final_state.is_deliberate_stop());
    assert_eq!(report.history.len(), 1);
}

#[tokio::test]
async fn cancellation_before_next_composite_keeps_first_iteration() {
    let fx = fixture();
    let cancel = CancelToken::new();
    let engine = CancellingEngine {
        cancel: cancel.clone(),
    };
    let report = controller(Arc::new(engine), options(5))
        .with_cancel_token(cancel)
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();

    assert!(matches!(
        report.final_state,
        RunState::Failed(FailureReason::Cancelled)
    ));
    assert_eq!(report.rounds, 1);
    assert_eq!(report.history.len(), 1);
    assert_eq!(
        report.final_composite.image(),
        report.history.iterations()[0].composite.as_ref()
    );
    assert_eq!(
        report.final_composite.placements(),
        &report.history.iterations()[0].placements
    );
}

#[tokio::test]
async fn unreadable_reference_fails_after_first_composite() {
    let fx = fixture();
    let missing = fx.root.join("nope.png");
    let report = controller(Arc::new(EmptyEngine), options(5))
        .run(&fx.selections, &PlacementConfig::default(), &missing)
        .await
        .unwrap();
    assert!(matches!(
        report.final_state,
        RunState::Failed(FailureReason::ReferenceUnavailable { .. })
    ));
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.rounds, 0);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_compositing() {
    let fx = fixture();
    let mut config = PlacementConfig::default();
    config.nose = PlacementSpec::single(0.0, 0.0, 0.0);
    let err = controller(Arc::new(EmptyEngine), options(5))
        .run(&fx.selections, &config, &fx.reference)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::NonPositiveScale { .. }));
}

#[tokio::test]
async fn artifacts_are_persisted_per_iteration() {
    let fx = fixture();
    let out = fx.root.join("runs");
    let mut opts = options(2);
    opts.output_dir = Some(out.clone());
    opts.run_id = "demo".to_string();
    let report = controller(Arc::new(DriftingEngine::default()), opts)
        .run(&fx.selections, &PlacementConfig::default(), &fx.reference)
        .await
        .unwrap();
    assert!(matches!(report.final_state, RunState::Exhausted));

    for idx in 0..3 {
        let path = out.join(format!("demo_iter_{idx:02}.png"));
        assert!(path.is_file(), "missing {}", path.display());
    }
    let log = read_json(&out.join("demo_log.json"));
    assert_eq!(log["run_id"], "demo");
    assert_eq!(log["final_state"], "exhausted");
    assert_eq!(log["iterations"].as_array().unwrap().len(), 3);
    assert_eq!(
        log["iterations"][1]["adjustments_applied"][0]["step"],
        "up_slight"
    );
    assert_eq!(log["iterations"][1]["adjustments_applied"][0]["target"], "nose");
    assert!(report.warnings.is_empty());
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}
