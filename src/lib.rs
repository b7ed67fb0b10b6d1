pub mod adjust;
pub mod cancel;
pub mod category;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod feedback;
pub mod placement;
pub mod placement_dump;
pub mod refine;
pub mod render;
pub mod selection;
pub mod theme;

pub use adjust::{AdjustmentStep, PartTarget, TargetedStep};
pub use cancel::CancelToken;
pub use category::{PartCategory, Side, Symmetry};
#[cfg(feature = "cli")]
pub use cli::run;
pub use compose::{CompositeImage, Compositor};
pub use config::{Config, PlacementConfig, PlacementSpec, load_config};
pub use error::{CompositeError, ConfigError, FeedbackError};
pub use feedback::{AdjustmentResult, FeedbackEngine, FeedbackRequest};
pub use placement::{PartInstance, PlacementSet, ResolvedPlacement, resolve};
pub use refine::{RefineOptions, RefinementController, RunReport, RunState};
pub use selection::{AssetLibrary, Selection, load_selections};
