//! Expression classification: blendshape scores → one of five emoji.

use crate::blendshape::{Blendshape, BlendshapeMap};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Score a candidate must beat, on top of its own threshold, to displace neutral.
pub const BASELINE_SCORE: f32 = 0.15;

const SURPRISE_JAW_WEIGHT: f32 = 0.9;
const SURPRISE_PUCKER_WEIGHT: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLabel {
    Neutral,
    Smile,
    Surprise,
    Frown,
    Cheeky,
}

impl ExpressionLabel {
    pub const ALL: [ExpressionLabel; 5] = [
        ExpressionLabel::Neutral,
        ExpressionLabel::Smile,
        ExpressionLabel::Surprise,
        ExpressionLabel::Frown,
        ExpressionLabel::Cheeky,
    ];

    /// Non-neutral labels in evaluation order. Earlier entries win exact ties.
    pub const CANDIDATES: [ExpressionLabel; 4] = [
        ExpressionLabel::Smile,
        ExpressionLabel::Surprise,
        ExpressionLabel::Frown,
        ExpressionLabel::Cheeky,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExpressionLabel::Neutral => "neutral",
            ExpressionLabel::Smile => "smile",
            ExpressionLabel::Surprise => "surprise",
            ExpressionLabel::Frown => "frown",
            ExpressionLabel::Cheeky => "cheeky",
        }
    }

    pub fn glyph(self) -> Glyph {
        match self {
            ExpressionLabel::Neutral => Glyph::NEUTRAL,
            ExpressionLabel::Smile => Glyph::SMILE,
            ExpressionLabel::Surprise => Glyph::SURPRISE,
            ExpressionLabel::Frown => Glyph::FROWN,
            ExpressionLabel::Cheeky => Glyph::CHEEKY,
        }
    }
}

impl fmt::Display for ExpressionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emoji shown for an [`ExpressionLabel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Glyph(&'static str);

impl Glyph {
    pub const NEUTRAL: Glyph = Glyph("\u{1F610}");
    pub const SMILE: Glyph = Glyph("\u{1F642}");
    pub const SURPRISE: Glyph = Glyph("\u{1F62E}");
    pub const FROWN: Glyph = Glyph("\u{1F621}");
    pub const CHEEKY: Glyph = Glyph("\u{1F61C}");

    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Glyph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for Glyph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

#[derive(Error, Debug)]
pub enum ThresholdError {
    #[error("failed to read threshold file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid threshold table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("threshold for {label} must be finite, got {value}")]
    NotFinite { label: ExpressionLabel, value: f32 },
}

/// Activation threshold per non-neutral label.
///
/// One field per label, so every candidate always has exactly one threshold.
/// Fields left out of a TOML override keep their default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdTable {
    pub smile: f32,
    pub surprise: f32,
    pub frown: f32,
    pub cheeky: f32,
}

impl ThresholdTable {
    pub const DEFAULT: ThresholdTable = ThresholdTable {
        smile: 0.25,
        surprise: 0.28,
        frown: 0.2,
        cheeky: 0.22,
    };

    /// Threshold for `label`; neutral has none.
    pub fn threshold(&self, label: ExpressionLabel) -> Option<f32> {
        match label {
            ExpressionLabel::Neutral => None,
            ExpressionLabel::Smile => Some(self.smile),
            ExpressionLabel::Surprise => Some(self.surprise),
            ExpressionLabel::Frown => Some(self.frown),
            ExpressionLabel::Cheeky => Some(self.cheeky),
        }
    }

    /// Parse an override table from TOML text.
    pub fn from_toml_str(src: &str) -> Result<Self, ThresholdError> {
        let table: ThresholdTable = toml::from_str(src)?;
        table.validate()?;
        Ok(table)
    }

    /// Load an override table from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ThresholdError> {
        let src = std::fs::read_to_string(path).map_err(|source| ThresholdError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), ?table, "loaded threshold table");
        Ok(table)
    }

    fn validate(&self) -> Result<(), ThresholdError> {
        for label in ExpressionLabel::CANDIDATES {
            if let Some(value) = self.threshold(label) {
                if !value.is_finite() {
                    return Err(ThresholdError::NotFinite { label, value });
                }
            }
        }
        Ok(())
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Renders the table in the same TOML form [`ThresholdTable::from_toml_str`] reads.
impl fmt::Display for ThresholdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in ExpressionLabel::CANDIDATES {
            if let Some(value) = self.threshold(label) {
                writeln!(f, "{label} = {value:?}")?;
            }
        }
        Ok(())
    }
}

/// Candidate activation scores derived from a [`BlendshapeMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExpressionScores {
    pub smile: f32,
    pub surprise: f32,
    pub frown: f32,
    pub cheeky: f32,
}

impl ExpressionScores {
    pub fn from_map(map: &BlendshapeMap) -> Self {
        let get = |key| map.get(key);
        Self {
            smile: get(Blendshape::MouthSmileLeft).max(get(Blendshape::MouthSmileRight)),
            surprise: get(Blendshape::JawOpen) * SURPRISE_JAW_WEIGHT
                + get(Blendshape::MouthPucker) * SURPRISE_PUCKER_WEIGHT,
            frown: get(Blendshape::MouthFrownLeft).max(get(Blendshape::MouthFrownRight)),
            cheeky: get(Blendshape::CheekPuffLeft).max(get(Blendshape::CheekPuffRight))
                + get(Blendshape::TongueOut),
        }
    }

    pub fn score(&self, label: ExpressionLabel) -> Option<f32> {
        match label {
            ExpressionLabel::Neutral => None,
            ExpressionLabel::Smile => Some(self.smile),
            ExpressionLabel::Surprise => Some(self.surprise),
            ExpressionLabel::Frown => Some(self.frown),
            ExpressionLabel::Cheeky => Some(self.cheeky),
        }
    }

    /// Pick the winning label against `thresholds`.
    ///
    /// A candidate is adopted only if its score is strictly above its own
    /// threshold and strictly above the best score so far (starting at
    /// [`BASELINE_SCORE`]), so exact ties keep the earlier candidate.
    pub fn pick(&self, thresholds: &ThresholdTable) -> ExpressionLabel {
        let mut best = ExpressionLabel::Neutral;
        let mut best_score = BASELINE_SCORE;

        for label in ExpressionLabel::CANDIDATES {
            let (Some(score), Some(threshold)) = (self.score(label), thresholds.threshold(label))
            else {
                continue;
            };
            if score > threshold && score > best_score {
                best = label;
                best_score = score;
            }
        }

        best
    }
}

/// Classify with a custom threshold table.
pub fn classify_with(map: &BlendshapeMap, thresholds: &ThresholdTable) -> ExpressionLabel {
    if map.is_empty() {
        return ExpressionLabel::Neutral;
    }
    ExpressionScores::from_map(map).pick(thresholds)
}

/// Classify with the built-in thresholds, returning the label.
pub fn classify_label(map: &BlendshapeMap) -> ExpressionLabel {
    classify_with(map, &ThresholdTable::DEFAULT)
}

/// Classify with the built-in thresholds, returning the emoji.
pub fn classify(map: &BlendshapeMap) -> Glyph {
    classify_label(map).glyph()
}
