//! The fixed vocabulary of placement nudges and how each one changes a
//! [`PlacementSpec`].
//!
//! Moves are additive in reference units, rescales are multiplicative. The
//! two definitions mean a `bigger` followed by a `smaller` of the same
//! magnitude lands at `s * (1 + m) * (1 - m)`, slightly below `s`; callers
//! should compare scales with a tolerance of `m * m * s`.

use crate::category::{PartCategory, Side};
use crate::config::PlacementSpec;
use crate::error::FeedbackError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const MOVE_NORMAL: f32 = 5.0;
pub const MOVE_SLIGHT: f32 = 3.0;
pub const RESCALE_NORMAL: f32 = 0.05;
pub const RESCALE_SLIGHT: f32 = 0.03;
pub const MIN_SCALE: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magnitude {
    Normal,
    Slight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleSign {
    Bigger,
    Smaller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjustmentStep {
    Move {
        direction: Direction,
        magnitude: Magnitude,
    },
    Rescale {
        sign: ScaleSign,
        magnitude: Magnitude,
    },
}

impl Direction {
    fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl ScaleSign {
    fn opposite(self) -> Self {
        match self {
            Self::Bigger => Self::Smaller,
            Self::Smaller => Self::Bigger,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Bigger => "bigger",
            Self::Smaller => "smaller",
        }
    }
}

impl Magnitude {
    pub fn move_units(self) -> f32 {
        match self {
            Self::Normal => MOVE_NORMAL,
            Self::Slight => MOVE_SLIGHT,
        }
    }

    pub fn rescale_factor(self) -> f32 {
        match self {
            Self::Normal => RESCALE_NORMAL,
            Self::Slight => RESCALE_SLIGHT,
        }
    }
}

impl AdjustmentStep {
    pub fn moved(direction: Direction, magnitude: Magnitude) -> Self {
        Self::Move {
            direction,
            magnitude,
        }
    }

    pub fn rescaled(sign: ScaleSign, magnitude: Magnitude) -> Self {
        Self::Rescale { sign, magnitude }
    }

    /// The step that undoes this one.
    pub fn reversed(self) -> Self {
        match self {
            Self::Move {
                direction,
                magnitude,
            } => Self::Move {
                direction: direction.opposite(),
                magnitude,
            },
            Self::Rescale { sign, magnitude } => Self::Rescale {
                sign: sign.opposite(),
                magnitude,
            },
        }
    }

    pub fn is_move(self) -> bool {
        matches!(self, Self::Move { .. })
    }

    /// Parses a position token such as `up` or `left_slight`.
    pub fn parse_position(token: &str) -> Result<Self, FeedbackError> {
        let (base, magnitude) = split_magnitude(token);
        let direction = match base {
            "up" => Direction::Up,
            "down" => Direction::Down,
            "left" => Direction::Left,
            "right" => Direction::Right,
            _ => {
                return Err(FeedbackError::Parse(format!(
                    "unknown position adjustment '{token}'"
                )));
            }
        };
        Ok(Self::moved(direction, magnitude))
    }

    /// Parses a scale token such as `bigger` or `smaller_slight`.
    pub fn parse_scale(token: &str) -> Result<Self, FeedbackError> {
        let (base, magnitude) = split_magnitude(token);
        let sign = match base {
            "bigger" => ScaleSign::Bigger,
            "smaller" => ScaleSign::Smaller,
            _ => {
                return Err(FeedbackError::Parse(format!(
                    "unknown scale adjustment '{token}'"
                )));
            }
        };
        Ok(Self::rescaled(sign, magnitude))
    }
}

fn split_magnitude(token: &str) -> (&str, Magnitude) {
    let token = token.trim();
    match token.strip_suffix("_slight") {
        Some(base) => (base, Magnitude::Slight),
        None => (token, Magnitude::Normal),
    }
}

impl fmt::Display for AdjustmentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (base, magnitude) = match self {
            Self::Move {
                direction,
                magnitude,
            } => (direction.token(), magnitude),
            Self::Rescale { sign, magnitude } => (sign.token(), magnitude),
        };
        match magnitude {
            Magnitude::Normal => f.write_str(base),
            Magnitude::Slight => write!(f, "{base}_slight"),
        }
    }
}

impl FromStr for AdjustmentStep {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_position(s).or_else(|_| Self::parse_scale(s))
    }
}

impl Serialize for AdjustmentStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Applies one step, returning a new spec. The input is left untouched.
pub fn apply(spec: &PlacementSpec, step: AdjustmentStep) -> PlacementSpec {
    let mut next = *spec;
    match step {
        AdjustmentStep::Move {
            direction,
            magnitude,
        } => {
            let units = magnitude.move_units();
            match direction {
                Direction::Up => next.base_y -= units,
                Direction::Down => next.base_y += units,
                Direction::Left => next.base_x -= units,
                Direction::Right => next.base_x += units,
            }
        }
        AdjustmentStep::Rescale { sign, magnitude } => {
            let factor = match sign {
                ScaleSign::Bigger => 1.0 + magnitude.rescale_factor(),
                ScaleSign::Smaller => 1.0 - magnitude.rescale_factor(),
            };
            next.initial_scale = (next.initial_scale * factor).max(MIN_SCALE);
        }
    }
    next
}

/// Which part a step is aimed at. `side: None` on a paired category means
/// both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartTarget {
    pub category: PartCategory,
    pub side: Option<Side>,
}

impl PartTarget {
    pub fn category(category: PartCategory) -> Self {
        Self {
            category,
            side: None,
        }
    }

    pub fn side(category: PartCategory, side: Side) -> Self {
        Self {
            category,
            side: Some(side),
        }
    }

    pub fn covers(&self, category: PartCategory, side: Side) -> bool {
        self.category == category && self.side.is_none_or(|s| s == side)
    }

    /// Parses `eye`, `eye.left` or `eye_right`.
    pub fn parse(key: &str) -> Result<Self, FeedbackError> {
        let key = key.trim();
        let (name, side) = match key.rsplit_once(|c| c == '.' || c == ':') {
            Some((name, side)) => (name, Some(side)),
            None => match key.rsplit_once('_') {
                Some((name, side @ ("left" | "right"))) => (name, Some(side)),
                _ => (key, None),
            },
        };
        let category: PartCategory = name
            .parse()
            .map_err(|err| FeedbackError::Parse(format!("{err}")))?;
        let side = match side {
            Some(raw) => {
                let side: Side = raw
                    .parse()
                    .map_err(|err| FeedbackError::Parse(format!("{err}")))?;
                if !category.accepts_side(side) {
                    return Err(FeedbackError::Parse(format!(
                        "{category} has no {side} side"
                    )));
                }
                Some(side)
            }
            None => None,
        };
        Ok(Self { category, side })
    }
}

impl fmt::Display for PartTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            Some(side) if side != Side::Single => write!(f, "{}.{}", self.category, side),
            _ => write!(f, "{}", self.category),
        }
    }
}

impl Serialize for PartTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TargetedStep {
    pub target: PartTarget,
    pub step: AdjustmentStep,
}

impl TargetedStep {
    pub fn new(target: PartTarget, step: AdjustmentStep) -> Self {
        Self { target, step }
    }

    pub fn reversed(self) -> Self {
        Self {
            target: self.target,
            step: self.step.reversed(),
        }
    }
}

impl fmt::Display for TargetedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.step)
    }
}

/// True when `newest` is a non-empty step set that undoes `previous`
/// exactly, one reversed step per previous step.
pub fn is_exact_reversal(previous: &[TargetedStep], newest: &[TargetedStep]) -> bool {
    if newest.is_empty() || newest.len() != previous.len() {
        return false;
    }
    let mut remaining: Vec<TargetedStep> = previous.to_vec();
    for step in newest {
        let undone = step.reversed();
        match remaining.iter().position(|prev| *prev == undone) {
            Some(idx) => {
                remaining.swap_remove(idx);
            }
            None => return false,
        }
    }
    remaining.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PlacementSpec {
        PlacementSpec::single(0.0, 10.0, 0.5)
    }

    #[test]
    fn moves_follow_image_coordinates() {
        let up = apply(&spec(), AdjustmentStep::moved(Direction::Up, Magnitude::Normal));
        assert_eq!(up.base_y, 5.0);
        let down = apply(&spec(), AdjustmentStep::moved(Direction::Down, Magnitude::Slight));
        assert_eq!(down.base_y, 13.0);
        let left = apply(&spec(), AdjustmentStep::moved(Direction::Left, Magnitude::Normal));
        assert_eq!(left.base_x, -5.0);
        let right = apply(&spec(), AdjustmentStep::moved(Direction::Right, Magnitude::Slight));
        assert_eq!(right.base_x, 3.0);
        assert_eq!(right.initial_scale, 0.5);
    }

    #[test]
    fn rescale_is_multiplicative() {
        let bigger = apply(
            &spec(),
            AdjustmentStep::rescaled(ScaleSign::Bigger, Magnitude::Normal),
        );
        assert!((bigger.initial_scale - 0.525).abs() < 1e-6);
        let smaller = apply(
            &spec(),
            AdjustmentStep::rescaled(ScaleSign::Smaller, Magnitude::Slight),
        );
        assert!((smaller.initial_scale - 0.485).abs() < 1e-6);
    }

    #[test]
    fn bigger_then_smaller_round_trip_is_close() {
        let original = spec();
        let there = apply(
            &original,
            AdjustmentStep::rescaled(ScaleSign::Bigger, Magnitude::Slight),
        );
        let back = apply(&there, AdjustmentStep::rescaled(ScaleSign::Smaller, Magnitude::Slight));
        let tolerance = RESCALE_SLIGHT * RESCALE_SLIGHT * original.initial_scale + 1e-6;
        assert!((back.initial_scale - original.initial_scale).abs() <= tolerance);
        // Multiplicative steps do not cancel exactly.
        assert!(back.initial_scale < original.initial_scale);
    }

    #[test]
    fn scale_stays_positive() {
        let mut current = PlacementSpec::single(0.0, 0.0, MIN_SCALE);
        for _ in 0..10 {
            current = apply(
                &current,
                AdjustmentStep::rescaled(ScaleSign::Smaller, Magnitude::Normal),
            );
        }
        assert!(current.initial_scale > 0.0);
    }

    #[test]
    fn apply_does_not_touch_input() {
        let original = spec();
        let _ = apply(&original, AdjustmentStep::moved(Direction::Up, Magnitude::Normal));
        assert_eq!(original, spec());
    }

    #[test]
    fn tokens_round_trip_through_display() {
        for token in [
            "up", "down", "left", "right", "up_slight", "left_slight", "bigger", "smaller",
            "bigger_slight", "smaller_slight",
        ] {
            let step: AdjustmentStep = token.parse().unwrap();
            assert_eq!(step.to_string(), token);
        }
        assert!("sideways".parse::<AdjustmentStep>().is_err());
        assert!(AdjustmentStep::parse_scale("up").is_err());
    }

    #[test]
    fn parses_targets() {
        assert_eq!(
            PartTarget::parse("eye.left").unwrap(),
            PartTarget::side(PartCategory::Eye, Side::Left)
        );
        assert_eq!(
            PartTarget::parse("ear_right").unwrap(),
            PartTarget::side(PartCategory::Ear, Side::Right)
        );
        assert_eq!(
            PartTarget::parse("face_shape").unwrap(),
            PartTarget::category(PartCategory::FaceShape)
        );
        assert!(PartTarget::parse("nose.left").is_err());
        assert!(PartTarget::parse("tail").is_err());
    }

    #[test]
    fn detects_exact_reversal() {
        let eye = PartTarget::category(PartCategory::Eye);
        let mouth = PartTarget::category(PartCategory::Mouth);
        let left = TargetedStep::new(
            eye,
            AdjustmentStep::moved(Direction::Left, Magnitude::Normal),
        );
        let right = TargetedStep::new(
            eye,
            AdjustmentStep::moved(Direction::Right, Magnitude::Normal),
        );
        let grow = TargetedStep::new(
            mouth,
            AdjustmentStep::rescaled(ScaleSign::Bigger, Magnitude::Slight),
        );
        let shrink = grow.reversed();

        assert!(is_exact_reversal(&[left], &[right]));
        assert!(is_exact_reversal(&[left, grow], &[shrink, right]));
        assert!(!is_exact_reversal(&[left], &[left]));
        assert!(!is_exact_reversal(&[left, grow], &[right]));
        assert!(!is_exact_reversal(&[], &[]));
        let right_slight =
            TargetedStep::new(eye, AdjustmentStep::moved(Direction::Right, Magnitude::Slight));
        assert!(!is_exact_reversal(&[left], &[right_slight]));
    }
}
