// THEORY:
// The vocabulary shared by every classifier and by the protocol resolver.
//
// A `Classification` is always tagged with the path that produced it. Downstream code
// must be able to tell a model score from a heuristic placeholder without guessing,
// so confidence and provenance are explicit variants rather than bare floats.

use crate::error::ScorerError;
use serde::Serialize;
use std::fmt;

/// Confidence reported for every heuristic result. Not a probability.
pub const HEURISTIC_PLACEHOLDER_CONFIDENCE: f32 = 0.5;

/// Pathogen name of `TriageLabel::PathogenA` in the protocol table.
pub const PATHOGEN_A: &str = "Streptococcus pneumoniae";
/// Pathogen name of `TriageLabel::PathogenB` in the protocol table.
pub const PATHOGEN_B: &str = "Mycoplasma pneumoniae";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageLabel {
    Normal,
    /// Lobar consolidation pattern.
    PathogenA,
    /// Interstitial infiltrate pattern.
    PathogenB,
    /// A model flagged the film as abnormal without naming a pathogen.
    PositiveUnspecified,
}

impl TriageLabel {
    /// Every label a heuristic or model classifier can emit.
    pub const ALL: [TriageLabel; 4] = [
        TriageLabel::Normal,
        TriageLabel::PathogenA,
        TriageLabel::PathogenB,
        TriageLabel::PositiveUnspecified,
    ];

    /// Protocol table key for labels that name a pathogen.
    pub fn pathogen(&self) -> Option<&'static str> {
        match self {
            TriageLabel::PathogenA => Some(PATHOGEN_A),
            TriageLabel::PathogenB => Some(PATHOGEN_B),
            TriageLabel::Normal | TriageLabel::PositiveUnspecified => None,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, TriageLabel::Normal)
    }
}

impl fmt::Display for TriageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriageLabel::Normal => f.write_str("normal"),
            TriageLabel::PathogenA => write!(f, "{PATHOGEN_A} (lobar consolidation)"),
            TriageLabel::PathogenB => write!(f, "{PATHOGEN_B} (interstitial infiltrate)"),
            TriageLabel::PositiveUnspecified => f.write_str("abnormal, pathogen unspecified"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Confidence {
    /// Derived from a scorer output, in [0, 1].
    Model(f32),
    /// Fixed stand-in reported by the intensity heuristic.
    HeuristicPlaceholder,
}

impl Confidence {
    pub fn value(&self) -> f32 {
        match *self {
            Confidence::Model(value) => value,
            Confidence::HeuristicPlaceholder => HEURISTIC_PLACEHOLDER_CONFIDENCE,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(self, Confidence::HeuristicPlaceholder)
    }
}

/// Why the heuristic path produced the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    NoScorerConfigured,
    InferenceUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum ClassifierPath {
    Model {
        scorer: String,
        /// Position of the candidate transform the scorer accepted.
        candidate_index: usize,
        input_shape: Vec<usize>,
        /// Winning class position for multi-class scorers. Informative only.
        class_index: Option<usize>,
    },
    Heuristic {
        reason: FallbackReason,
        mean_intensity: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: TriageLabel,
    pub confidence: Confidence,
    pub path: ClassifierPath,
}

impl Classification {
    pub fn is_model_based(&self) -> bool {
        matches!(self.path, ClassifierPath::Model { .. })
    }
}

/// Class scores in positional order, each clamped into [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(scores: Vec<f32>) -> Result<Self, ScorerError> {
        if scores.is_empty() {
            return Err(ScorerError::InvalidScores("empty score vector".to_string()));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(ScorerError::InvalidScores(format!("non-finite score {bad}")));
        }
        Ok(Self(scores.into_iter().map(|s| s.clamp(0.0, 1.0)).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index and value of the highest score; the first one wins ties.
    pub fn arg_max(&self) -> (usize, f32) {
        self.0
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best })
    }
}
