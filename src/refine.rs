//! The refinement loop: composite, ask for feedback, nudge, repeat.
//!
//! A run is one sequential async flow. The feedback call is the only place it
//! waits for long; that call is bounded by a timeout and raced against the
//! run's [`CancelToken`]. Every terminal state carries the last composite
//! that was produced successfully.

use crate::adjust::{TargetedStep, is_exact_reversal};
use crate::cancel::CancelToken;
use crate::compose::{CompositeImage, Compositor};
use crate::config::{
    DEFAULT_FEEDBACK_TIMEOUT_SECS, DEFAULT_ITERATION_BUDGET, PlacementConfig, RefineConfig,
};
use crate::error::{ConfigError, FeedbackError};
use crate::feedback::{AdjustmentResult, FeedbackEngine, FeedbackRequest};
use crate::placement::PlacementSet;
use crate::render::{load_rgb, write_output_png};
use crate::selection::Selection;
use image::RgbImage;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceCause {
    /// The collaborator reported it is satisfied.
    Satisfied,
    /// The collaborator had nothing left to change.
    NoAdjustments,
    /// The proposed steps would undo the previous round.
    Oscillation,
}

#[derive(Debug, Clone)]
pub enum FailureReason {
    Feedback(FeedbackError),
    ReferenceUnavailable { path: PathBuf, message: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum RunState {
    Idle,
    Composing,
    AwaitingFeedback,
    Applying,
    Converged(ConvergenceCause),
    Exhausted,
    Failed(FailureReason),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged(_) | Self::Exhausted | Self::Failed(_))
    }

    /// Cancellation ends a run as `Failed`, but nothing went wrong.
    pub fn is_deliberate_stop(&self) -> bool {
        matches!(self, Self::Failed(FailureReason::Cancelled))
    }
}

impl fmt::Display for ConvergenceCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Satisfied => "satisfied",
            Self::NoAdjustments => "no adjustments",
            Self::Oscillation => "oscillation",
        })
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feedback(err) => write!(f, "{err}"),
            Self::ReferenceUnavailable { path, message } => {
                write!(f, "reference image {} unavailable: {message}", path.display())
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Composing => f.write_str("composing"),
            Self::AwaitingFeedback => f.write_str("awaiting_feedback"),
            Self::Applying => f.write_str("applying"),
            Self::Converged(cause) => write!(f, "converged ({cause})"),
            Self::Exhausted => f.write_str("exhausted"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

impl Serialize for RunState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One composite and the placements and steps that produced it.
#[derive(Debug, Clone)]
pub struct RefinementIteration {
    pub iteration: u32,
    pub composite: Arc<RgbImage>,
    pub placements: PlacementSet,
    /// Steps applied to the previous iteration's placements. Empty for 0.
    pub applied: Vec<TargetedStep>,
    /// Similarity the collaborator reported for the previous composite.
    pub similarity: Option<f32>,
    pub converged: bool,
}

/// Append-only record of a run.
#[derive(Debug, Clone, Default)]
pub struct RefinementHistory {
    iterations: Vec<RefinementIteration>,
}

impl RefinementHistory {
    pub fn push(&mut self, iteration: RefinementIteration) {
        self.iterations.push(iteration);
    }

    pub fn iterations(&self) -> &[RefinementIteration] {
        &self.iterations
    }

    pub fn last(&self) -> Option<&RefinementIteration> {
        self.iterations.last()
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    fn mark_last_converged(&mut self) {
        if let Some(last) = self.iterations.last_mut() {
            last.converged = true;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationLog {
    pub iteration: u32,
    pub adjustments_applied: Vec<TargetedStep>,
    pub converged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_layers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub final_state: RunState,
    pub final_composite: CompositeImage,
    /// Feedback rounds that returned a usable answer.
    pub rounds: u32,
    pub history: RefinementHistory,
    pub log: Vec<IterationLog>,
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
struct RunLogFile<'a> {
    run_id: &'a str,
    final_state: &'a RunState,
    rounds: u32,
    iterations: &'a [IterationLog],
    warnings: &'a [String],
}

#[derive(Debug, Clone)]
pub struct RefineOptions {
    /// Maximum number of feedback rounds.
    pub budget: u32,
    pub timeout: Duration,
    pub output_dir: Option<PathBuf>,
    pub run_id: String,
}

impl RefineOptions {
    pub fn from_config(config: &RefineConfig) -> Self {
        Self {
            budget: config.budget,
            timeout: Duration::from_secs(config.feedback_timeout_secs),
            ..Self::default()
        }
    }
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            budget: DEFAULT_ITERATION_BUDGET,
            timeout: Duration::from_secs(DEFAULT_FEEDBACK_TIMEOUT_SECS),
            output_dir: None,
            run_id: default_run_id(),
        }
    }
}

fn default_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("run_{secs}")
}

pub struct RefinementController {
    compositor: Compositor,
    engine: Arc<dyn FeedbackEngine>,
    options: RefineOptions,
    cancel: CancelToken,
}

impl RefinementController {
    pub fn new(
        compositor: Compositor,
        engine: Arc<dyn FeedbackEngine>,
        options: RefineOptions,
    ) -> Self {
        Self {
            compositor,
            engine,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &RefineOptions {
        &self.options
    }

    /// Runs the loop to a terminal state. Only configuration problems found
    /// before the first composite are returned as errors; everything later
    /// ends up in the report's `final_state`.
    pub async fn run(
        &self,
        selections: &[Selection],
        config: &PlacementConfig,
        reference_path: &Path,
    ) -> Result<RunReport, ConfigError> {
        config.validate()?;
        if self.compositor.canvas_size() == 0 {
            return Err(ConfigError::EmptyCanvas);
        }

        let mut run = RunProgress::new(&self.options.run_id);
        run.transition(RunState::Composing);
        let mut placements = PlacementSet::for_selections(config, selections);
        let mut composite = self.compositor.compose_selections(selections, &placements)?;
        run.record(0, &composite, Vec::new(), None);
        self.persist_iteration(&mut run, 0, &composite);

        let reference = match load_rgb(reference_path) {
            Ok(image) => image,
            Err(err) => {
                let reason = FailureReason::ReferenceUnavailable {
                    path: reference_path.to_path_buf(),
                    message: err.to_string(),
                };
                run.transition(RunState::Failed(reason));
                return Ok(self.finish(run, composite));
            }
        };

        let mut iteration = 0u32;
        loop {
            if run.rounds >= self.options.budget {
                run.transition(RunState::Exhausted);
                break;
            }

            run.transition(RunState::AwaitingFeedback);
            let request = FeedbackRequest {
                iteration,
                composite: composite.image(),
                reference: &reference,
                placements: &placements,
                history: &run.history,
            };
            let result = match self.request_feedback(&request).await {
                Ok(result) => result,
                Err(reason) => {
                    run.transition(RunState::Failed(reason));
                    break;
                }
            };
            run.rounds += 1;

            if let Some(cause) = convergence(&result, run.history.last()) {
                run.converge(cause);
                break;
            }

            run.transition(RunState::Applying);
            let next = placements.apply(&result.steps);

            if self.cancel.is_cancelled() {
                run.transition(RunState::Failed(FailureReason::Cancelled));
                break;
            }
            run.transition(RunState::Composing);
            composite = self.compositor.compose_selections(selections, &next)?;
            placements = next;
            iteration += 1;
            run.record(iteration, &composite, result.steps, result.similarity);
            self.persist_iteration(&mut run, iteration, &composite);
        }

        Ok(self.finish(run, composite))
    }

    async fn request_feedback(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FailureReason> {
        match self.attempt_feedback(request).await? {
            Ok(result) => Ok(result),
            Err(err) => {
                tracing::warn!(
                    run_id = %self.options.run_id,
                    iteration = request.iteration,
                    error = %err,
                    "feedback failed; retrying once"
                );
                self.attempt_feedback(request)
                    .await?
                    .map_err(FailureReason::Feedback)
            }
        }
    }

    /// One bounded, cancellable feedback call. The outer `Err` is cancellation.
    async fn attempt_feedback(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<Result<AdjustmentResult, FeedbackError>, FailureReason> {
        let timeout = self.options.timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FailureReason::Cancelled),
            outcome = tokio::time::timeout(timeout, self.engine.suggest_adjustments(request)) => {
                Ok(outcome.unwrap_or(Err(FeedbackError::Timeout(timeout))))
            }
        }
    }

    fn persist_iteration(&self, run: &mut RunProgress, iteration: u32, composite: &CompositeImage) {
        let Some(dir) = self.options.output_dir.as_deref() else {
            return;
        };
        let path = dir.join(format!("{}_iter_{iteration:02}.png", self.options.run_id));
        if let Err(err) = write_output_png(composite.image(), &path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to persist iteration");
            run.warnings
                .push(format!("failed to write {}: {err}", path.display()));
        }
    }

    fn persist_log(&self, run: &mut RunProgress) {
        let Some(dir) = self.options.output_dir.as_deref() else {
            return;
        };
        let path = dir.join(format!("{}_log.json", self.options.run_id));
        let doc = RunLogFile {
            run_id: &self.options.run_id,
            final_state: &run.state,
            rounds: run.rounds,
            iterations: &run.log,
            warnings: &run.warnings,
        };
        let written = serde_json::to_string_pretty(&doc)
            .map_err(anyhow::Error::from)
            .and_then(|json| {
                std::fs::create_dir_all(dir)?;
                std::fs::write(&path, json)?;
                Ok(())
            });
        if let Err(err) = written {
            tracing::warn!(path = %path.display(), error = %err, "failed to persist run log");
            run.warnings
                .push(format!("failed to write {}: {err}", path.display()));
        }
    }

    fn finish(&self, mut run: RunProgress, final_composite: CompositeImage) -> RunReport {
        self.persist_log(&mut run);
        if run.state.is_deliberate_stop() {
            tracing::info!(run_id = %run.run_id, iterations = run.history.len(), "run cancelled");
        } else {
            tracing::info!(
                run_id = %run.run_id,
                state = %run.state,
                rounds = run.rounds,
                iterations = run.history.len(),
                "run finished"
            );
        }
        RunReport {
            run_id: run.run_id,
            final_state: run.state,
            final_composite,
            rounds: run.rounds,
            history: run.history,
            log: run.log,
            warnings: run.warnings,
        }
    }
}

/// Terminal checks on a fresh feedback result, in priority order.
fn convergence(
    result: &AdjustmentResult,
    previous: Option<&RefinementIteration>,
) -> Option<ConvergenceCause> {
    if result.converged {
        return Some(ConvergenceCause::Satisfied);
    }
    if result.steps.is_empty() {
        return Some(ConvergenceCause::NoAdjustments);
    }
    let previous_steps = previous.map(|it| it.applied.as_slice()).unwrap_or_default();
    if is_exact_reversal(previous_steps, &result.steps) {
        return Some(ConvergenceCause::Oscillation);
    }
    None
}

/// Mutable bookkeeping for one run.
struct RunProgress {
    run_id: String,
    state: RunState,
    rounds: u32,
    history: RefinementHistory,
    log: Vec<IterationLog>,
    warnings: Vec<String>,
}

impl RunProgress {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            state: RunState::Idle,
            rounds: 0,
            history: RefinementHistory::default(),
            log: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(run_id = %self.run_id, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn converge(&mut self, cause: ConvergenceCause) {
        self.history.mark_last_converged();
        if let Some(last) = self.log.last_mut() {
            last.converged = true;
        }
        self.transition(RunState::Converged(cause));
    }

    fn record(
        &mut self,
        iteration: u32,
        composite: &CompositeImage,
        applied: Vec<TargetedStep>,
        similarity: Option<f32>,
    ) {
        let skipped_layers: Vec<String> =
            composite.skipped().iter().map(|err| err.to_string()).collect();
        for warning in &skipped_layers {
            self.warnings.push(format!("iteration {iteration}: {warning}"));
        }
        tracing::info!(
            run_id = %self.run_id,
            iteration,
            steps = applied.len(),
            skipped = skipped_layers.len(),
            "composited iteration"
        );
        self.log.push(IterationLog {
            iteration,
            adjustments_applied: applied.clone(),
            converged: false,
            similarity,
            skipped_layers,
        });
        self.history.push(RefinementIteration {
            iteration,
            composite: Arc::new(composite.image().clone()),
            placements: composite.placements().clone(),
            applied,
            similarity,
            converged: false,
        });
    }
}
