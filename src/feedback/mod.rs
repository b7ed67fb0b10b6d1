//! Visual feedback: the collaborator that looks at a composite next to the
//! reference photo and proposes placement nudges.
//!
//! The refinement loop only sees [`FeedbackEngine`]; [`gemini::GeminiEngine`]
//! is the production implementation, tests plug in deterministic stubs.

pub mod gemini;
pub mod parse;
pub mod prompt;

use crate::adjust::TargetedStep;
use crate::error::FeedbackError;
use crate::placement::PlacementSet;
use crate::refine::RefinementHistory;
use image::RgbImage;
use serde::Serialize;

pub use gemini::{GeminiConfig, GeminiEngine};
pub use parse::parse_response;

/// Everything the collaborator may look at for one round.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackRequest<'a> {
    /// Index of the iteration whose composite is under review.
    pub iteration: u32,
    pub composite: &'a RgbImage,
    pub reference: &'a RgbImage,
    pub placements: &'a PlacementSet,
    pub history: &'a RefinementHistory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdjustmentResult {
    pub steps: Vec<TargetedStep>,
    pub converged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AdjustmentResult {
    pub fn converged() -> Self {
        Self {
            converged: true,
            ..Self::default()
        }
    }

    pub fn with_steps(steps: Vec<TargetedStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
pub trait FeedbackEngine: Send + Sync {
    /// Proposes steps for the composite in `request`. Implementations must not
    /// mutate anything they are handed; the caller owns retries and timeouts.
    async fn suggest_adjustments(
        &self,
        request: &FeedbackRequest<'_>,
    ) -> Result<AdjustmentResult, FeedbackError>;
}
