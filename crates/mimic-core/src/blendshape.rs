//! Blendshape key set, per-frame score map, and the normalizer that builds it
//! from raw model output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

macro_rules! blendshapes {
    ($($variant:ident => $name:literal,)+) => {
        /// Closed set of blendshape categories understood by the classifier.
        ///
        /// The first 52 entries follow the MediaPipe face blendshape output order;
        /// the trailing ARKit-only keys are never produced by that model and
        /// therefore always read as 0 unless a caller supplies them.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Blendshape {
            $($variant,)+
        }

        impl Blendshape {
            pub const ALL: [Blendshape; Blendshape::COUNT] = [$(Blendshape::$variant,)+];

            /// Category name as emitted by the model (camelCase).
            pub fn name(self) -> &'static str {
                match self {
                    $(Blendshape::$variant => $name,)+
                }
            }
        }

        impl FromStr for Blendshape {
            type Err = UnknownBlendshape;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Blendshape::$variant),)+
                    _ => Err(UnknownBlendshape(s.to_string())),
                }
            }
        }
    };
}

blendshapes! {
    Neutral => "_neutral",
    BrowDownLeft => "browDownLeft",
    BrowDownRight => "browDownRight",
    BrowInnerUp => "browInnerUp",
    BrowOuterUpLeft => "browOuterUpLeft",
    BrowOuterUpRight => "browOuterUpRight",
    CheekPuff => "cheekPuff",
    CheekSquintLeft => "cheekSquintLeft",
    CheekSquintRight => "cheekSquintRight",
    EyeBlinkLeft => "eyeBlinkLeft",
    EyeBlinkRight => "eyeBlinkRight",
    EyeLookDownLeft => "eyeLookDownLeft",
    EyeLookDownRight => "eyeLookDownRight",
    EyeLookInLeft => "eyeLookInLeft",
    EyeLookInRight => "eyeLookInRight",
    EyeLookOutLeft => "eyeLookOutLeft",
    EyeLookOutRight => "eyeLookOutRight",
    EyeLookUpLeft => "eyeLookUpLeft",
    EyeLookUpRight => "eyeLookUpRight",
    EyeSquintLeft => "eyeSquintLeft",
    EyeSquintRight => "eyeSquintRight",
    EyeWideLeft => "eyeWideLeft",
    EyeWideRight => "eyeWideRight",
    JawForward => "jawForward",
    JawLeft => "jawLeft",
    JawOpen => "jawOpen",
    JawRight => "jawRight",
    MouthClose => "mouthClose",
    MouthDimpleLeft => "mouthDimpleLeft",
    MouthDimpleRight => "mouthDimpleRight",
    MouthFrownLeft => "mouthFrownLeft",
    MouthFrownRight => "mouthFrownRight",
    MouthFunnel => "mouthFunnel",
    MouthLeft => "mouthLeft",
    MouthLowerDownLeft => "mouthLowerDownLeft",
    MouthLowerDownRight => "mouthLowerDownRight",
    MouthPressLeft => "mouthPressLeft",
    MouthPressRight => "mouthPressRight",
    MouthPucker => "mouthPucker",
    MouthRight => "mouthRight",
    MouthRollLower => "mouthRollLower",
    MouthRollUpper => "mouthRollUpper",
    MouthShrugLower => "mouthShrugLower",
    MouthShrugUpper => "mouthShrugUpper",
    MouthSmileLeft => "mouthSmileLeft",
    MouthSmileRight => "mouthSmileRight",
    MouthStretchLeft => "mouthStretchLeft",
    MouthStretchRight => "mouthStretchRight",
    MouthUpperUpLeft => "mouthUpperUpLeft",
    MouthUpperUpRight => "mouthUpperUpRight",
    NoseSneerLeft => "noseSneerLeft",
    NoseSneerRight => "noseSneerRight",
    CheekPuffLeft => "cheekPuffLeft",
    CheekPuffRight => "cheekPuffRight",
    TongueOut => "tongueOut",
}

impl Blendshape {
    pub const COUNT: usize = 55;

    /// Number of categories produced by the MediaPipe blendshape model.
    pub const MODEL_OUTPUTS: usize = 52;

    /// Category at `index` in the model's output tensor.
    pub fn from_model_index(index: usize) -> Option<Self> {
        if index < Self::MODEL_OUTPUTS {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Blendshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown blendshape category: {0}")]
pub struct UnknownBlendshape(pub String);

/// One named score emitted by the model for one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendshapeScore {
    #[serde(rename = "categoryName", default)]
    pub name: String,
    #[serde(default)]
    pub score: f32,
}

impl BlendshapeScore {
    pub fn new(name: impl Into<String>, score: f32) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Blendshape categories for a single face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classifications {
    #[serde(default)]
    pub categories: Vec<BlendshapeScore>,
}

/// Raw per-frame model output: one entry per detected face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(default)]
    pub face_blendshapes: Vec<Classifications>,
}

impl DetectionResult {
    /// Result holding a single face.
    pub fn single(face: Classifications) -> Self {
        Self {
            face_blendshapes: vec![face],
        }
    }

    /// The first detected face. Additional faces are never classified.
    pub fn first_face(&self) -> Option<&Classifications> {
        self.face_blendshapes.first()
    }
}

/// Scores keyed by blendshape, rebuilt for every frame.
///
/// Reading a key that was never written yields 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendshapeMap {
    scores: [Option<f32>; Blendshape::COUNT],
    len: usize,
}

impl Default for BlendshapeMap {
    fn default() -> Self {
        Self {
            scores: [None; Blendshape::COUNT],
            len: 0,
        }
    }
}

impl BlendshapeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score for `key`, replacing any previous value.
    pub fn insert(&mut self, key: Blendshape, score: f32) {
        let slot = &mut self.scores[key.slot()];
        if slot.is_none() {
            self.len += 1;
        }
        *slot = Some(score);
    }

    /// Score for `key`, or 0 when absent.
    pub fn get(&self, key: Blendshape) -> f32 {
        self.scores[key.slot()].unwrap_or(0.0)
    }

    pub fn contains(&self, key: Blendshape) -> bool {
        self.scores[key.slot()].is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Present entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Blendshape, f32)> + '_ {
        Blendshape::ALL
            .iter()
            .filter_map(|&key| self.scores[key.slot()].map(|score| (key, score)))
    }
}

impl FromIterator<(Blendshape, f32)> for BlendshapeMap {
    fn from_iter<I: IntoIterator<Item = (Blendshape, f32)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, score) in iter {
            map.insert(key, score);
        }
        map
    }
}

/// Build a [`BlendshapeMap`] from one face's categories.
///
/// Absent input or an empty category list yields an empty map. Duplicate names
/// resolve to the last score seen; names outside [`Blendshape`] are dropped.
/// Scores are stored as given, without clamping.
pub fn normalize(face: Option<&Classifications>) -> BlendshapeMap {
    let mut map = BlendshapeMap::new();
    let Some(face) = face else {
        return map;
    };

    for entry in &face.categories {
        match entry.name.parse::<Blendshape>() {
            Ok(key) => map.insert(key, entry.score),
            Err(e) => tracing::trace!(error = %e, "ignoring blendshape entry"),
        }
    }

    map
}
