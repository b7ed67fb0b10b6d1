use crate::category::{PartCategory, Side};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One chosen part, as handed over by the part selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub category: PartCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(alias = "asset_reference", alias = "image_path")]
    pub asset: PathBuf,
    /// Selector confidence. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Selection {
    pub fn new(category: PartCategory, asset: impl Into<PathBuf>) -> Self {
        Self {
            category,
            side: None,
            asset: asset.into(),
            score: None,
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    pub selections: Vec<Selection>,
    /// `input_image` of an analysis-run document, when present.
    pub reference_hint: Option<PathBuf>,
}

/// Part images laid out as `<root>/<folder>/<folder>_<NNN>.png`.
#[derive(Debug, Clone)]
pub struct AssetLibrary {
    root: PathBuf,
}

impl AssetLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, asset: &Path) -> PathBuf {
        if asset.is_absolute() {
            asset.to_path_buf()
        } else {
            self.root.join(asset)
        }
    }

    pub fn candidates(category: PartCategory, part_num: u32) -> [String; 3] {
        let prefix = category.asset_folder();
        [
            format!("{prefix}_{part_num:03}.png"),
            format!("{prefix}_{part_num:02}.png"),
            format!("{prefix}_{part_num}.png"),
        ]
    }

    pub fn find_part(&self, category: PartCategory, part_num: u32) -> Option<PathBuf> {
        let folder = self.root.join(category.asset_folder());
        Self::candidates(category, part_num)
            .into_iter()
            .map(|name| folder.join(name))
            .find(|path| path.is_file())
    }
}

/// Reads selections from either a JSON array of records or an analysis-run
/// document (`{"parts": {"eye": {"selected": {"part_num": 10}}}}`).
pub fn load_selections(
    path: &Path,
    library: Option<&AssetLibrary>,
) -> Result<SelectionSet, ConfigError> {
    let malformed = |message: String| ConfigError::Malformed {
        path: path.to_path_buf(),
        message,
    };
    let contents = std::fs::read_to_string(path).map_err(|err| malformed(err.to_string()))?;
    let value: Value = serde_json::from_str(&contents).map_err(|err| malformed(err.to_string()))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let fallback = AssetLibrary::new(base_dir);
    let library = library.unwrap_or(&fallback);

    let mut set = parse_selection_value(value, library).map_err(malformed)?;
    for selection in &mut set.selections {
        selection.asset = library.resolve(&selection.asset);
    }
    Ok(set)
}

fn parse_selection_value(value: Value, library: &AssetLibrary) -> Result<SelectionSet, String> {
    match value {
        Value::Array(_) => {
            let selections: Vec<Selection> =
                serde_json::from_value(value).map_err(|err| err.to_string())?;
            Ok(SelectionSet {
                selections,
                reference_hint: None,
            })
        }
        Value::Object(ref map) if map.contains_key("selections") => {
            let selections: Vec<Selection> = serde_json::from_value(map["selections"].clone())
                .map_err(|err| err.to_string())?;
            Ok(SelectionSet {
                selections,
                reference_hint: reference_hint(map),
            })
        }
        Value::Object(ref map) if map.contains_key("parts") => {
            let parts = map["parts"]
                .as_object()
                .ok_or_else(|| "`parts` must be an object".to_string())?;
            let mut selections = Vec::new();
            for (name, info) in parts {
                let Ok(category) = name.parse::<PartCategory>() else {
                    tracing::warn!(
                        category = %name,
                        "skipping part outside the compositor's categories"
                    );
                    continue;
                };
                let selected = info.get("selected").unwrap_or(info);
                let Some(part_num) = selected.get("part_num").and_then(part_number) else {
                    continue;
                };
                let score = selected
                    .get("score")
                    .and_then(Value::as_f64)
                    .map(|v| v as f32);
                match library.find_part(category, part_num) {
                    Some(asset) => selections.push(Selection {
                        category,
                        side: None,
                        asset,
                        score,
                    }),
                    None => {
                        tracing::warn!(
                            %category,
                            part_num,
                            root = %library.root().display(),
                            "part image not found in library"
                        );
                    }
                }
            }
            Ok(SelectionSet {
                selections,
                reference_hint: reference_hint(map),
            })
        }
        _ => Err("expected an array of selections or an object with `parts`".to_string()),
    }
}

fn part_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn reference_hint(map: &serde_json::Map<String, Value>) -> Option<PathBuf> {
    map.get("input_image")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}
