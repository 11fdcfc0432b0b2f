// THEORY:
// Errors are split by who is at fault and what the caller should do about it.
//
// 1.  `DecodeError` belongs to the request: the bytes were not a usable picture.
//     The request is aborted and nothing partial is returned.
// 2.  `InferenceUnavailable` belongs to the scorer: it is missing, rejected every
//     candidate shape, or failed outright. It is never shown to the end user as a
//     failure; the classifier degrades to the heuristic path exactly once.
// 3.  `UnknownPathogen` and `ConfigError` belong to the deployment. A label with
//     no protocol record means the reference table and the classifiers disagree,
//     and a default protocol must never be substituted for it.

use thiserror::Error;

/// The raw upload could not be turned into a `RawImage`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image buffer is empty")]
    Empty,
    #[error("unsupported image format (expected JPEG or PNG)")]
    UnsupportedFormat,
    #[error("failed to decode image: {0}")]
    Malformed(#[from] image::ImageError),
    #[error("decoded image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },
}

/// Failure reported by an opaque scorer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScorerError {
    /// The scorer did not accept a tensor of this shape. Negotiation moves on.
    #[error("scorer rejected input shape {actual:?} (expected {expected})")]
    ShapeMismatch { expected: String, actual: Vec<usize> },
    /// Any other failure. Negotiation stops.
    #[error("scorer failed: {0}")]
    Failed(String),
    /// The scorer answered with something that is not a score vector.
    #[error("invalid score vector: {0}")]
    InvalidScores(String),
}

/// No model-derived result could be produced for this request.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("inference unavailable: {reason}")]
pub struct InferenceUnavailable {
    pub reason: String,
    /// The error returned by the last scorer call, if any call was made.
    #[source]
    pub last_error: Option<ScorerError>,
}

impl InferenceUnavailable {
    pub fn no_scorer() -> Self {
        Self {
            reason: "no scorer configured".to_string(),
            last_error: None,
        }
    }
}

/// A label was resolved that has no record in the protocol reference table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no protocol record for pathogen '{0}'")]
pub struct UnknownPathogen(pub String);

/// The deployment itself is unusable. Raised while building the engine.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("protocol table has no record for '{0}', which a classifier can emit")]
    MissingProtocol(String),
    #[error("protocol table contains '{0}' more than once")]
    DuplicateProtocol(String),
    #[error("protocol row for '{0}' has neither a first-line therapy nor a treatment snippet")]
    EmptyTreatment(String),
    #[error("no candidate input shapes configured")]
    NoCandidates,
    #[error("candidate {index} has zero spatial size")]
    ZeroSizedCandidate { index: usize },
    #[error("candidate {index} asks for {leading_axes} leading axes (at most 2 supported)")]
    TooManyLeadingAxes { index: usize, leading_axes: usize },
    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("invalid adaptive equalization settings: {0}")]
    InvalidContrast(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything a single triage request can fail with.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    UnknownPathogen(#[from] UnknownPathogen),
    #[error("worker pool unavailable: {0}")]
    WorkerPool(&'static str),
}
