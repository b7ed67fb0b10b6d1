use std::path::PathBuf;

use crate::category::{PartCategory, Side};

/// Fatal configuration problems. Raised before any compositing happens.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown part category: {0}")]
    UnknownCategory(String),
    #[error("unknown side: {0} (expected left, right or single)")]
    UnknownSide(String),
    #[error("side {side} does not fit {category} ({expected} category)")]
    SideMismatch {
        category: PartCategory,
        side: Side,
        expected: &'static str,
    },
    #[error("{category}: initial_scale must be positive, got {scale}")]
    NonPositiveScale { category: PartCategory, scale: f32 },
    #[error("{category}: {field} must be finite")]
    NonFinite {
        category: PartCategory,
        field: &'static str,
    },
    #[error("canvas size must be positive")]
    EmptyCanvas,
    #[error("reference size must be positive")]
    EmptyReference,
    #[error("malformed config {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Per-layer failures. The compositor records these and keeps drawing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompositeError {
    #[error("asset not found for {category} ({side}): {path}")]
    AssetNotFound {
        category: PartCategory,
        side: Side,
        path: PathBuf,
    },
    #[error("asset decode failed for {category} ({side}): {path}: {message}")]
    AssetDecode {
        category: PartCategory,
        side: Side,
        path: PathBuf,
        message: String,
    },
    #[error("{category} ({side}) scaled to {width}x{height} px, over the {limit} px layer limit")]
    LayerTooLarge {
        category: PartCategory,
        side: Side,
        width: u64,
        height: u64,
        limit: u64,
    },
}

/// Errors produced while asking the visual-feedback collaborator for advice.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedbackError {
    /// The response could not be turned into adjustment steps.
    #[error("feedback parse failed: {0}")]
    Parse(String),

    /// The call exceeded the caller-supplied timeout.
    #[error("feedback call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The HTTP request itself failed.
    #[error("feedback request failed: {0}")]
    Transport(String),

    /// The provider returned a non-success status.
    #[error("feedback API error: status {status}")]
    Api { status: u16, body: String },

    /// Required credentials are not configured.
    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },
}
