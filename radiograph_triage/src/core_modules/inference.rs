// THEORY:
// The inference layer decouples the pipeline from a pretrained scorer whose input
// contract cannot be discovered ahead of time. Some exported models want a bare
// H×W×C tensor, some want a batch axis, and some were trained with an extra
// sequence axis in front of that.
//
// Key architectural principles:
// 1.  **Explicit Strategy List**: The adapter owns an ordered, finite list of
//     `CandidateTransform`s. Each one resizes the film to a fixed spatial size,
//     normalizes samples to [0, 1], lays channels out in the configured order (BGR by
//     default, as the reference model was trained on) and inserts 0, 1 or 2 leading
//     singleton axes. Candidates are tried in order; worst case is one scorer call per
//     candidate.
// 2.  **Fail Closed**: A shape rejection moves on to the next candidate. Any other
//     scorer failure, or running out of candidates, surfaces `InferenceUnavailable`
//     carrying the last scorer error. A result is never invented.
// 3.  **Opaque Scorer**: The scorer is a black box with unknown latency and unknown
//     thread-safety. `Scorer::score` takes `&mut self`; the `ModelClassifier` keeps it
//     behind a `Mutex` so shared engines serialize calls into it. Tensors are built
//     before the lock is taken, so only the scorer calls themselves queue.
// 4.  **Positional Interpretation**: One score is P(abnormal). Several scores are
//     treated positionally; the winning index is reported but never mapped onto a
//     specific pathogen, because the scorer's label set is not ours.

use crate::core_modules::classification::{
    Classification, ClassifierPath, Confidence, ScoreVector, TriageLabel,
};
use crate::core_modules::raw_image::RawImage;
use crate::error::{ConfigError, InferenceUnavailable, ScorerError};
use image::imageops::{self, FilterType};
use ndarray::{Array3, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Spatial size the reference classifier was trained on.
pub const DEFAULT_INPUT_SIZE: u32 = 150;
pub const DEFAULT_POSITIVE_THRESHOLD: f32 = 0.5;
const MAX_LEADING_AXES: usize = 2;

/// A pretrained classifier seen as a black box.
pub trait Scorer: Send {
    fn name(&self) -> &str;

    /// Scores one image tensor. Must return `ScorerError::ShapeMismatch` when the
    /// tensor's shape is not what the model expects.
    fn score(&mut self, input: ArrayViewD<'_, f32>) -> Result<ScoreVector, ScorerError>;
}

/// Adapts a closure into a `Scorer`, mostly for tests and embedding callers.
pub struct FnScorer<F> {
    name: String,
    score_fn: F,
}

impl<F> FnScorer<F>
where
    F: FnMut(ArrayViewD<'_, f32>) -> Result<ScoreVector, ScorerError> + Send,
{
    pub fn new(name: impl Into<String>, score_fn: F) -> Self {
        Self {
            name: name.into(),
            score_fn,
        }
    }
}

impl<F> Scorer for FnScorer<F>
where
    F: FnMut(ArrayViewD<'_, f32>) -> Result<ScoreVector, ScorerError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&mut self, input: ArrayViewD<'_, f32>) -> Result<ScoreVector, ScorerError> {
        (self.score_fn)(input)
    }
}

/// Channel layout of the last tensor axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

impl ChannelOrder {
    /// Source RGB channel feeding tensor channel `channel`.
    #[inline]
    fn source_channel(self, channel: usize) -> usize {
        match self {
            ChannelOrder::Bgr => 2 - channel,
            ChannelOrder::Rgb => channel,
        }
    }
}

/// One way of turning a film into a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTransform {
    pub width: u32,
    pub height: u32,
    /// Singleton axes placed in front of H×W×C: 0, 1 (batch) or 2 (batch, sequence).
    pub leading_axes: usize,
}

impl CandidateTransform {
    pub fn new(width: u32, height: u32, leading_axes: usize) -> Self {
        Self {
            width,
            height,
            leading_axes,
        }
    }

    /// The default search order: no extra axes, batch, batch + sequence.
    pub fn default_candidates() -> Vec<CandidateTransform> {
        (0..=MAX_LEADING_AXES)
            .map(|axes| Self::new(DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE, axes))
            .collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![1; self.leading_axes];
        shape.extend([self.height as usize, self.width as usize, 3]);
        shape
    }

    pub fn build(&self, image: &RawImage, order: ChannelOrder) -> ArrayD<f32> {
        let resized = imageops::resize(image.pixels(), self.width, self.height, FilterType::Triangle);
        let hwc = Array3::from_shape_fn(
            (self.height as usize, self.width as usize, 3),
            |(y, x, c)| {
                resized.get_pixel(x as u32, y as u32)[order.source_channel(c)] as f32 / 255.0
            },
        );
        let mut tensor = hwc.into_dyn();
        for _ in 0..self.leading_axes {
            tensor = tensor.insert_axis(Axis(0));
        }
        tensor
    }
}

/// Validated candidate list plus the rules for reading scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub candidates: Vec<CandidateTransform>,
    pub channel_order: ChannelOrder,
    /// Single-score vectors strictly above this value are positive.
    pub positive_threshold: f32,
    /// Index that means "normal" in multi-score vectors.
    pub normal_class_index: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            candidates: CandidateTransform::default_candidates(),
            channel_order: ChannelOrder::default(),
            positive_threshold: DEFAULT_POSITIVE_THRESHOLD,
            normal_class_index: 0,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        for (index, candidate) in self.candidates.iter().enumerate() {
            if candidate.width == 0 || candidate.height == 0 {
                return Err(ConfigError::ZeroSizedCandidate { index });
            }
            if candidate.leading_axes > MAX_LEADING_AXES {
                return Err(ConfigError::TooManyLeadingAxes {
                    index,
                    leading_axes: candidate.leading_axes,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.positive_threshold) {
            return Err(ConfigError::OutOfRange {
                name: "positive_threshold",
                value: self.positive_threshold,
            });
        }
        Ok(())
    }
}

/// Scores tagged with the candidate that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedScores {
    pub scores: ScoreVector,
    pub candidate_index: usize,
    pub input_shape: Vec<usize>,
}

/// Builds one tensor per candidate, in candidate order.
pub fn prepare_inputs(
    candidates: &[CandidateTransform],
    image: &RawImage,
    order: ChannelOrder,
) -> Vec<ArrayD<f32>> {
    candidates
        .iter()
        .map(|candidate| candidate.build(image, order))
        .collect()
}

/// Tries each candidate transform against the scorer until one is accepted.
pub fn negotiate(
    scorer: &mut dyn Scorer,
    candidates: &[CandidateTransform],
    order: ChannelOrder,
    image: &RawImage,
) -> Result<NegotiatedScores, InferenceUnavailable> {
    negotiate_prepared(scorer, &prepare_inputs(candidates, image, order))
}

/// Offers already built tensors to the scorer, in order, until one is accepted.
pub fn negotiate_prepared(
    scorer: &mut dyn Scorer,
    inputs: &[ArrayD<f32>],
) -> Result<NegotiatedScores, InferenceUnavailable> {
    let mut last_error = None;

    for (candidate_index, tensor) in inputs.iter().enumerate() {
        let input_shape = tensor.shape().to_vec();

        match scorer.score(tensor.view()) {
            Ok(scores) => {
                debug!(scorer = scorer.name(), candidate_index, ?input_shape, "scorer accepted input");
                return Ok(NegotiatedScores {
                    scores,
                    candidate_index,
                    input_shape,
                });
            }
            Err(error @ ScorerError::ShapeMismatch { .. }) => {
                debug!(scorer = scorer.name(), candidate_index, ?input_shape, %error, "shape rejected");
                last_error = Some(error);
            }
            Err(error) => {
                warn!(scorer = scorer.name(), candidate_index, %error, "scorer failed");
                return Err(InferenceUnavailable {
                    reason: format!("scorer '{}' failed on candidate {candidate_index}", scorer.name()),
                    last_error: Some(error),
                });
            }
        }
    }

    Err(InferenceUnavailable {
        reason: format!(
            "scorer '{}' rejected all {} candidate shapes",
            scorer.name(),
            inputs.len()
        ),
        last_error,
    })
}

/// Wraps a loaded scorer. Built once, shared read-only by every request.
pub struct ModelClassifier {
    scorer: Mutex<Box<dyn Scorer>>,
    scorer_name: String,
    config: InferenceConfig,
}

impl std::fmt::Debug for ModelClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClassifier")
            .field("scorer", &self.scorer_name)
            .field("config", &self.config)
            .finish()
    }
}

impl ModelClassifier {
    pub fn new(scorer: Box<dyn Scorer>, config: InferenceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            scorer_name: scorer.name().to_string(),
            scorer: Mutex::new(scorer),
            config,
        })
    }

    pub fn scorer_name(&self) -> &str {
        &self.scorer_name
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn classify(&self, image: &RawImage) -> Result<Classification, InferenceUnavailable> {
        let inputs = prepare_inputs(&self.config.candidates, image, self.config.channel_order);
        let negotiated = {
            let mut scorer = self.scorer.lock().map_err(|_| InferenceUnavailable {
                reason: format!("scorer '{}' is poisoned by an earlier panic", self.scorer_name),
                last_error: Some(ScorerError::Failed("mutex poisoned".to_string())),
            })?;
            negotiate_prepared(&mut **scorer, &inputs)?
        };
        Ok(self.interpret(negotiated))
    }

    fn interpret(&self, negotiated: NegotiatedScores) -> Classification {
        let NegotiatedScores {
            scores,
            candidate_index,
            input_shape,
        } = negotiated;

        let (label, confidence, class_index) = match scores.as_slice() {
            [probability] => {
                if *probability > self.config.positive_threshold {
                    (TriageLabel::PositiveUnspecified, *probability, None)
                } else {
                    (TriageLabel::Normal, 1.0 - *probability, None)
                }
            }
            _ => {
                let (index, best) = scores.arg_max();
                let label = if index == self.config.normal_class_index {
                    TriageLabel::Normal
                } else {
                    TriageLabel::PositiveUnspecified
                };
                (label, best, Some(index))
            }
        };

        Classification {
            label,
            confidence: Confidence::Model(confidence),
            path: ClassifierPath::Model {
                scorer: self.scorer_name.clone(),
                candidate_index,
                input_shape,
                class_index,
            },
        }
    }
}
