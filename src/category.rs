use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartCategory {
    Outline,
    Hair,
    FaceShape,
    Eyebrow,
    Eye,
    Nose,
    Mouth,
    Ear,
    Beard,
    Glasses,
    Acc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symmetry {
    Single,
    Paired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    Single,
}

/// Draw order, back to front.
pub const Z_ORDER: [PartCategory; 11] = [
    PartCategory::Outline,
    PartCategory::Hair,
    PartCategory::FaceShape,
    PartCategory::Eyebrow,
    PartCategory::Eye,
    PartCategory::Nose,
    PartCategory::Mouth,
    PartCategory::Ear,
    PartCategory::Beard,
    PartCategory::Glasses,
    PartCategory::Acc,
];

static Z_RANKS: Lazy<HashMap<PartCategory, u8>> = Lazy::new(|| {
    Z_ORDER
        .iter()
        .enumerate()
        .map(|(rank, category)| (*category, rank as u8))
        .collect()
});

impl PartCategory {
    pub const ALL: [PartCategory; 11] = Z_ORDER;

    pub fn name(self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Hair => "hair",
            Self::FaceShape => "face_shape",
            Self::Eyebrow => "eyebrow",
            Self::Eye => "eye",
            Self::Nose => "nose",
            Self::Mouth => "mouth",
            Self::Ear => "ear",
            Self::Beard => "beard",
            Self::Glasses => "glasses",
            Self::Acc => "acc",
        }
    }

    pub fn z_rank(self) -> u8 {
        Z_RANKS.get(&self).copied().unwrap_or(u8::MAX)
    }

    pub fn symmetry(self) -> Symmetry {
        match self {
            Self::Eyebrow | Self::Eye | Self::Ear => Symmetry::Paired,
            _ => Symmetry::Single,
        }
    }

    pub fn is_paired(self) -> bool {
        self.symmetry() == Symmetry::Paired
    }

    /// Sides an instance of this category is drawn on.
    pub fn sides(self) -> &'static [Side] {
        match self.symmetry() {
            Symmetry::Paired => &[Side::Left, Side::Right],
            Symmetry::Single => &[Side::Single],
        }
    }

    pub fn accepts_side(self, side: Side) -> bool {
        self.sides().contains(&side)
    }

    /// Folder name used by the shipped part library.
    pub fn asset_folder(self) -> &'static str {
        match self {
            Self::Mouth => "mouse",
            other => other.name(),
        }
    }
}

impl fmt::Display for PartCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PartCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let category = match normalized.as_str() {
            "outline" => Self::Outline,
            "hair" => Self::Hair,
            "face_shape" | "faceshape" => Self::FaceShape,
            "eyebrow" => Self::Eyebrow,
            "eye" => Self::Eye,
            "nose" => Self::Nose,
            "mouth" | "mouse" => Self::Mouth,
            "ear" => Self::Ear,
            "beard" => Self::Beard,
            "glasses" => Self::Glasses,
            "acc" => Self::Acc,
            _ => return Err(ConfigError::UnknownCategory(s.to_string())),
        };
        Ok(category)
    }
}

impl Side {
    pub fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Single => "single",
        }
    }

    /// Horizontal sign applied to the symmetrical spacing.
    pub fn spacing_sign(self) -> f32 {
        match self {
            Self::Left => -1.0,
            Self::Right => 1.0,
            Self::Single => 0.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Side {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "single" => Ok(Self::Single),
            _ => Err(ConfigError::UnknownSide(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z_order_ranks_are_unique_and_ordered() {
        let mut ranks: Vec<u8> = PartCategory::ALL.iter().map(|c| c.z_rank()).collect();
        ranks.dedup();
        assert_eq!(ranks.len(), PartCategory::ALL.len());
        assert_eq!(PartCategory::Outline.z_rank(), 0);
        assert_eq!(PartCategory::Acc.z_rank(), 10);
        assert!(PartCategory::Hair.z_rank() < PartCategory::Eyebrow.z_rank());
        assert!(PartCategory::Beard.z_rank() < PartCategory::Glasses.z_rank());
    }

    #[test]
    fn parses_names_and_rejects_unknown() {
        assert_eq!("eye".parse::<PartCategory>().unwrap(), PartCategory::Eye);
        assert_eq!("Face_Shape".parse::<PartCategory>().unwrap(), PartCategory::FaceShape);
        assert_eq!("mouse".parse::<PartCategory>().unwrap(), PartCategory::Mouth);
        let err = "wrinkles".parse::<PartCategory>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCategory(name) if name == "wrinkles"));
    }

    #[test]
    fn paired_categories_have_two_sides() {
        for category in PartCategory::ALL {
            let expected = matches!(
                category,
                PartCategory::Eye | PartCategory::Eyebrow | PartCategory::Ear
            );
            assert_eq!(category.is_paired(), expected, "{category}");
        }
        assert_eq!(PartCategory::Eye.sides(), &[Side::Left, Side::Right]);
        assert!(!PartCategory::Nose.accepts_side(Side::Left));
    }

    #[test]
    fn mouth_assets_live_in_mouse_folder() {
        assert_eq!(PartCategory::Mouth.asset_folder(), "mouse");
        assert_eq!(PartCategory::Hair.asset_folder(), "hair");
    }
}
