//! Placement resolution: centre-relative specs to absolute canvas pixels.
//!
//! A [`PlacementSpec`] is expressed in the unit system of `reference_size`. Resolving it
//! against a canvas of size `S` multiplies offsets, spacing and scale by
//! `S / reference_size`, so a layout keeps its proportions on any canvas.

use crate::adjust::{self, TargetedStep};
use crate::category::{PartCategory, Side, Symmetry};
use crate::config::{PlacementConfig, PlacementSpec};
use crate::error::ConfigError;
use crate::selection::Selection;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedPlacement {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

pub fn resolve(
    spec: &PlacementSpec,
    category: PartCategory,
    side: Side,
    canvas_size: u32,
    reference_size: u32,
) -> Result<ResolvedPlacement, ConfigError> {
    check_side(category, side)?;
    if canvas_size == 0 {
        return Err(ConfigError::EmptyCanvas);
    }
    if reference_size == 0 {
        return Err(ConfigError::EmptyReference);
    }

    let ratio = canvas_size as f32 / reference_size as f32;
    let center = canvas_size as f32 / 2.0;
    let offset_x = spec.base_x + side.spacing_sign() * spec.symmetrical_spacing;
    Ok(ResolvedPlacement {
        x: center + offset_x * ratio,
        y: center + spec.base_y * ratio,
        scale: spec.initial_scale * ratio,
    })
}

fn check_side(category: PartCategory, side: Side) -> Result<(), ConfigError> {
    if category.accepts_side(side) {
        return Ok(());
    }
    let expected = match category.symmetry() {
        Symmetry::Paired => "paired",
        Symmetry::Single => "single",
    };
    Err(ConfigError::SideMismatch {
        category,
        side,
        expected,
    })
}

/// Resolves a category given by name, as it arrives from config files and
/// feedback documents.
pub fn resolve_named(
    config: &PlacementConfig,
    name: &str,
    side: Side,
    canvas_size: u32,
) -> Result<ResolvedPlacement, ConfigError> {
    let category: PartCategory = name.parse()?;
    resolve(
        config.spec(category),
        category,
        side,
        canvas_size,
        config.reference_size,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartKey {
    pub category: PartCategory,
    pub side: Side,
}

impl PartKey {
    pub fn new(category: PartCategory, side: Side) -> Self {
        Self { category, side }
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Side::Single => write!(f, "{}", self.category),
            side => write!(f, "{}.{}", self.category, side),
        }
    }
}

/// Per-instance placements for one run. Paired categories get an entry per
/// side so the two sides can be nudged independently.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementSet {
    reference_size: u32,
    entries: BTreeMap<PartKey, PlacementSpec>,
}

impl PlacementSet {
    pub fn from_config(
        config: &PlacementConfig,
        categories: impl IntoIterator<Item = PartCategory>,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for category in categories {
            for side in category.sides() {
                entries.insert(PartKey::new(category, *side), *config.spec(category));
            }
        }
        Self {
            reference_size: config.reference_size,
            entries,
        }
    }

    /// Placements for every category that has at least one selection.
    pub fn for_selections(config: &PlacementConfig, selections: &[Selection]) -> Self {
        Self::from_config(config, selections.iter().map(|s| s.category))
    }

    pub fn reference_size(&self) -> u32 {
        self.reference_size
    }

    pub fn get(&self, key: PartKey) -> Option<&PlacementSpec> {
        self.entries.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartKey, &PlacementSpec)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn categories(&self) -> Vec<PartCategory> {
        let mut out: Vec<PartCategory> = self.entries.keys().map(|k| k.category).collect();
        out.dedup();
        out
    }

    pub fn resolve(
        &self,
        key: PartKey,
        canvas_size: u32,
    ) -> Result<Option<ResolvedPlacement>, ConfigError> {
        match self.entries.get(&key) {
            Some(spec) => {
                resolve(spec, key.category, key.side, canvas_size, self.reference_size).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Applies every step to the entries it targets and returns the new set.
    /// Steps aimed at categories outside the set are ignored.
    pub fn apply(&self, steps: &[TargetedStep]) -> PlacementSet {
        let mut next = self.clone();
        for targeted in steps {
            let mut matched = false;
            for (key, spec) in next.entries.iter_mut() {
                if targeted.target.covers(key.category, key.side) {
                    *spec = adjust::apply(spec, targeted.step);
                    matched = true;
                }
            }
            if !matched {
                tracing::warn!(
                    target_part = %targeted.target,
                    step = %targeted.step,
                    "adjustment targets no placed part"
                );
            }
        }
        next
    }
}

#[derive(Serialize)]
struct PlacementEntry<'a> {
    part: String,
    #[serde(flatten)]
    spec: &'a PlacementSpec,
}

impl Serialize for PlacementSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|(key, spec)| PlacementEntry {
            part: key.to_string(),
            spec,
        }))
    }
}

/// One drawable layer: a selected asset at a resolved position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartInstance {
    pub category: PartCategory,
    pub side: Side,
    pub asset: PathBuf,
    /// Right-side copy of a canonical left-oriented asset.
    pub mirrored: bool,
    pub placement: ResolvedPlacement,
}

impl PartInstance {
    pub fn key(&self) -> PartKey {
        PartKey::new(self.category, self.side)
    }
}

/// Expands selections into instances. A paired selection without an explicit
/// side is drawn twice, the right copy mirrored.
pub fn build_instances(
    selections: &[Selection],
    placements: &PlacementSet,
    canvas_size: u32,
) -> Result<Vec<PartInstance>, ConfigError> {
    let mut instances = Vec::new();
    for selection in selections {
        let sides: Vec<Side> = match selection.side {
            Some(side) => vec![side],
            None => selection.category.sides().to_vec(),
        };
        for side in sides {
            let key = PartKey::new(selection.category, side);
            check_side(key.category, side)?;
            let Some(placement) = placements.resolve(key, canvas_size)? else {
                tracing::warn!(part = %key, "no placement for selected part; layer left empty");
                continue;
            };
            instances.push(PartInstance {
                category: selection.category,
                side,
                asset: selection.asset.clone(),
                mirrored: side == Side::Right && selection.side.is_none(),
                placement,
            });
        }
    }
    Ok(instances)
}
