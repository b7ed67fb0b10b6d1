use crate::category::PartCategory;
use crate::error::ConfigError;
use crate::theme::Theme;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Canvas size the default placement table is expressed in.
pub const DEFAULT_REFERENCE_SIZE: u32 = 400;
pub const DEFAULT_CANVAS_SIZE: u32 = 400;
pub const DEFAULT_ITERATION_BUDGET: u32 = 5;
pub const DEFAULT_FEEDBACK_TIMEOUT_SECS: u64 = 120;

/// Where and how large a category is drawn, relative to the canvas centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementSpec {
    pub base_x: f32,
    pub base_y: f32,
    pub initial_scale: f32,
    /// Horizontal half-distance between the left and right instance.
    #[serde(default)]
    pub symmetrical_spacing: f32,
}

impl PlacementSpec {
    pub const fn single(base_x: f32, base_y: f32, initial_scale: f32) -> Self {
        Self {
            base_x,
            base_y,
            initial_scale,
            symmetrical_spacing: 0.0,
        }
    }

    pub const fn paired(base_x: f32, base_y: f32, initial_scale: f32, spacing: f32) -> Self {
        Self {
            base_x,
            base_y,
            initial_scale,
            symmetrical_spacing: spacing,
        }
    }

    pub fn validate(&self, category: PartCategory) -> Result<(), ConfigError> {
        for (field, value) in [
            ("base_x", self.base_x),
            ("base_y", self.base_y),
            ("initial_scale", self.initial_scale),
            ("symmetrical_spacing", self.symmetrical_spacing),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { category, field });
            }
        }
        if self.initial_scale <= 0.0 {
            return Err(ConfigError::NonPositiveScale {
                category,
                scale: self.initial_scale,
            });
        }
        Ok(())
    }
}

/// Per-category placement table. One field per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Canvas size the offsets and spacings are expressed in.
    pub reference_size: u32,
    pub outline: PlacementSpec,
    pub hair: PlacementSpec,
    pub face_shape: PlacementSpec,
    pub eyebrow: PlacementSpec,
    pub eye: PlacementSpec,
    pub nose: PlacementSpec,
    pub mouth: PlacementSpec,
    pub ear: PlacementSpec,
    pub beard: PlacementSpec,
    pub glasses: PlacementSpec,
    pub acc: PlacementSpec,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            reference_size: DEFAULT_REFERENCE_SIZE,
            outline: PlacementSpec::single(0.0, 0.0, 1.0),
            hair: PlacementSpec::single(0.0, 0.0, 1.0),
            face_shape: PlacementSpec::single(0.0, 0.0, 1.0),
            eyebrow: PlacementSpec::paired(0.0, -15.0, 0.2, 25.0),
            eye: PlacementSpec::paired(0.0, 15.0, 0.2, 25.0),
            nose: PlacementSpec::single(0.0, 30.0, 0.2),
            mouth: PlacementSpec::single(0.0, 55.0, 0.25),
            ear: PlacementSpec::paired(0.0, 20.0, 0.28, 50.0),
            beard: PlacementSpec::single(0.0, 100.0, 0.4),
            glasses: PlacementSpec::single(0.0, 15.0, 0.5),
            acc: PlacementSpec::single(0.0, -20.0, 0.3),
        }
    }
}

impl PlacementConfig {
    pub fn spec(&self, category: PartCategory) -> &PlacementSpec {
        match category {
            PartCategory::Outline => &self.outline,
            PartCategory::Hair => &self.hair,
            PartCategory::FaceShape => &self.face_shape,
            PartCategory::Eyebrow => &self.eyebrow,
            PartCategory::Eye => &self.eye,
            PartCategory::Nose => &self.nose,
            PartCategory::Mouth => &self.mouth,
            PartCategory::Ear => &self.ear,
            PartCategory::Beard => &self.beard,
            PartCategory::Glasses => &self.glasses,
            PartCategory::Acc => &self.acc,
        }
    }

    pub fn spec_mut(&mut self, category: PartCategory) -> &mut PlacementSpec {
        match category {
            PartCategory::Outline => &mut self.outline,
            PartCategory::Hair => &mut self.hair,
            PartCategory::FaceShape => &mut self.face_shape,
            PartCategory::Eyebrow => &mut self.eyebrow,
            PartCategory::Eye => &mut self.eye,
            PartCategory::Nose => &mut self.nose,
            PartCategory::Mouth => &mut self.mouth,
            PartCategory::Ear => &mut self.ear,
            PartCategory::Beard => &mut self.beard,
            PartCategory::Glasses => &mut self.glasses,
            PartCategory::Acc => &mut self.acc,
        }
    }

    /// Looks a category up by name.
    pub fn spec_named(&self, name: &str) -> Result<&PlacementSpec, ConfigError> {
        let category: PartCategory = name.parse()?;
        Ok(self.spec(category))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference_size == 0 {
            return Err(ConfigError::EmptyReference);
        }
        for category in PartCategory::ALL {
            self.spec(category).validate(category)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub size: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CANVAS_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    pub budget: u32,
    pub feedback_timeout_secs: u64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_ITERATION_BUDGET,
            feedback_timeout_secs: DEFAULT_FEEDBACK_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub theme: Theme,
    pub canvas: CanvasConfig,
    pub placement: PlacementConfig,
    pub refine: RefineConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    canvas: Option<u32>,
    #[serde(alias = "reference_size")]
    reference_size: Option<u32>,
    theme: Option<ThemeFile>,
    placements: Option<BTreeMap<String, PlacementOverride>>,
    refine: Option<RefineFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThemeFile {
    background: Option<String>,
    #[serde(alias = "grid_color")]
    grid_color: Option<String>,
    #[serde(alias = "grid_spacing")]
    grid_spacing: Option<u32>,
    #[serde(alias = "axis_color")]
    axis_color: Option<String>,
    #[serde(alias = "marker_color")]
    marker_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlacementOverride {
    base_x: Option<f32>,
    base_y: Option<f32>,
    #[serde(alias = "scale")]
    initial_scale: Option<f32>,
    #[serde(alias = "spacing")]
    symmetrical_spacing: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefineFile {
    budget: Option<u32>,
    #[serde(alias = "timeout_secs", alias = "timeoutSecs")]
    feedback_timeout_secs: Option<u64>,
}

/// Loads a JSON/JSON5 config file on top of the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path).map_err(|err| ConfigError::Malformed {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let parsed: ConfigFile = json5::from_str(&contents).map_err(|err| ConfigError::Malformed {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    apply_config_file(config, parsed)
}

/// Parses config text directly; used by tests and embedders.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let parsed: ConfigFile = json5::from_str(contents).map_err(|err| ConfigError::Malformed {
        path: "<inline>".into(),
        message: err.to_string(),
    })?;
    apply_config_file(Config::default(), parsed)
}

fn apply_config_file(mut config: Config, parsed: ConfigFile) -> Result<Config, ConfigError> {
    if let Some(size) = parsed.canvas {
        config.canvas.size = size;
    }
    if let Some(size) = parsed.reference_size {
        config.placement.reference_size = size;
    }

    if let Some(theme) = parsed.theme {
        if let Some(v) = theme.background {
            config.theme.background = v;
        }
        if let Some(v) = theme.grid_color {
            config.theme.grid_color = v;
        }
        if let Some(v) = theme.grid_spacing {
            config.theme.grid_spacing = v.max(1);
        }
        if let Some(v) = theme.axis_color {
            config.theme.axis_color = v;
        }
        if let Some(v) = theme.marker_color {
            config.theme.marker_color = v;
        }
    }

    if let Some(placements) = parsed.placements {
        for (name, entry) in placements {
            let category: PartCategory = name.parse()?;
            let spec = config.placement.spec_mut(category);
            if let Some(v) = entry.base_x {
                spec.base_x = v;
            }
            if let Some(v) = entry.base_y {
                spec.base_y = v;
            }
            if let Some(v) = entry.initial_scale {
                spec.initial_scale = v;
            }
            if let Some(v) = entry.symmetrical_spacing {
                spec.symmetrical_spacing = v;
            }
        }
    }

    if let Some(refine) = parsed.refine {
        if let Some(v) = refine.budget {
            config.refine.budget = v;
        }
        if let Some(v) = refine.feedback_timeout_secs {
            config.refine.feedback_timeout_secs = v;
        }
    }

    if config.canvas.size == 0 {
        return Err(ConfigError::EmptyCanvas);
    }
    config.placement.validate()?;
    Ok(config)
}
