// THEORY:
// The `pipeline` module is the top-level API of the triage engine. It wires the
// core modules into one synchronous, stateless call per radiograph:
//
//   bytes ─► RawImage ─┬─► Enhancer ──────────────────────────────► EnhancedImage
//                      └─► Classifier ─► Classification ─► Resolver ─► ProtocolSummary
//
// Key architectural principles:
// 1.  **Init Once, Read Forever**: `TriageEngine::new` loads and validates the two
//     process-wide resources (classifier and protocol table) exactly once. The engine
//     exposes only `&self` methods and is shared as `Arc<TriageEngine>`.
// 2.  **Classifier Chosen Up Front**: `Classifier` is a tagged variant selected when the
//     engine is built. A model classifier that cannot produce a result degrades to the
//     heuristic exactly once for that request; the reason travels with the result.
// 3.  **Loud Configuration Defects**: The engine refuses to start if any label its
//     classifier can emit has no protocol record.

use crate::config::TriageConfig;
use crate::core_modules::classification::{Classification, FallbackReason, TriageLabel};
use crate::core_modules::enhancer::Enhancer;
use crate::core_modules::heuristic::HeuristicClassifier;
use crate::core_modules::inference::{ModelClassifier, Scorer};
use crate::core_modules::protocol::{ProtocolResolver, ProtocolTable};
use crate::core_modules::raw_image::RawImage;
use crate::error::{ConfigError, TriageError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::classification::{ClassifierPath, Confidence};
pub use crate::core_modules::enhancer::EnhancedImage;
pub use crate::core_modules::protocol::{ProtocolDetails, ProtocolSummary};

/// The classification strategy, fixed for the lifetime of an engine.
#[derive(Debug)]
pub enum Classifier {
    Model(ModelClassifier),
    Heuristic(HeuristicClassifier),
}

impl Classifier {
    /// Labels this classifier can ever emit, including the heuristic fallback.
    pub fn possible_labels(&self) -> Vec<TriageLabel> {
        let mut labels = HeuristicClassifier::LABELS.to_vec();
        if matches!(self, Classifier::Model(_)) {
            labels.push(TriageLabel::PositiveUnspecified);
        }
        labels
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::Model(_) => "model",
            Classifier::Heuristic(_) => "heuristic",
        }
    }

    pub fn classify(&self, image: &RawImage) -> Classification {
        match self {
            Classifier::Heuristic(heuristic) => {
                heuristic.classify(image, FallbackReason::NoScorerConfigured)
            }
            Classifier::Model(model) => match model.classify(image) {
                Ok(classification) => classification,
                Err(unavailable) => {
                    let detail = match &unavailable.last_error {
                        Some(last) => format!("{unavailable}: {last}"),
                        None => unavailable.to_string(),
                    };
                    warn!(scorer = model.scorer_name(), %detail, "falling back to intensity heuristic");
                    HeuristicClassifier.classify(image, FallbackReason::InferenceUnavailable(detail))
                }
            },
        }
    }
}

/// Everything produced for one radiograph.
#[derive(Debug, Clone)]
pub struct TriageReport {
    pub enhanced: EnhancedImage,
    pub classification: Classification,
    pub protocol: ProtocolSummary,
}

impl TriageReport {
    /// The report without pixel data, for JSON output.
    pub fn summary(&self) -> TriageSummary {
        let (width, height) = self.enhanced.dimensions();
        TriageSummary {
            width,
            height,
            classification: self.classification.clone(),
            protocol: self.protocol.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageSummary {
    pub width: u32,
    pub height: u32,
    pub classification: Classification,
    pub protocol: ProtocolSummary,
}

/// The main, top-level struct for the triage engine.
#[derive(Debug)]
pub struct TriageEngine {
    enhancer: Enhancer,
    classifier: Classifier,
    resolver: ProtocolResolver,
}

impl TriageEngine {
    /// Builds the engine from configuration, loading the protocol table it names.
    /// `scorer` is the pre-loaded model, if the deployment has one.
    pub fn new(config: &TriageConfig, scorer: Option<Box<dyn Scorer>>) -> Result<Self, ConfigError> {
        let table = Arc::new(config.protocols.load_table()?);
        Self::with_table(config, table, scorer)
    }

    /// Builds the engine around an already loaded table.
    pub fn with_table(
        config: &TriageConfig,
        table: Arc<ProtocolTable>,
        scorer: Option<Box<dyn Scorer>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let classifier = match scorer {
            Some(scorer) => Classifier::Model(ModelClassifier::new(scorer, config.inference.clone())?),
            None => Classifier::Heuristic(HeuristicClassifier),
        };

        let resolver = ProtocolResolver::new(table, config.protocols.presumptive_pathogen.clone());
        resolver.check_coverage(&classifier.possible_labels())?;

        info!(
            classifier = classifier.kind(),
            protocols = resolver.table().len(),
            source = resolver.table().source(),
            contrast = ?config.enhancer.contrast,
            "triage engine ready"
        );

        Ok(Self {
            enhancer: Enhancer::new(config.enhancer.contrast),
            classifier,
            resolver,
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &ProtocolResolver {
        &self.resolver
    }

    /// Runs decode → enhance → classify → resolve for one upload.
    pub fn triage(&self, bytes: &[u8]) -> Result<TriageReport, TriageError> {
        let image = RawImage::decode(bytes)?;
        self.triage_image(&image)
    }

    /// Same as `triage` for an image that is already decoded.
    pub fn triage_image(&self, image: &RawImage) -> Result<TriageReport, TriageError> {
        let enhanced = self.enhancer.enhance(image);
        let classification = self.classifier.classify(image);
        let protocol = self.resolver.resolve(&classification)?;
        Ok(TriageReport {
            enhanced,
            classification,
            protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::classification::{PATHOGEN_A, ScoreVector};
    use crate::core_modules::inference::FnScorer;
    use crate::core_modules::protocol::ProtocolRecord;
    use crate::error::ScorerError;
    use image::{Rgb, RgbImage};
    use ndarray::ArrayViewD;

    fn gray(value: u8) -> RawImage {
        RawImage::from_rgb(RgbImage::from_pixel(20, 20, Rgb([value, value, value]))).unwrap()
    }

    fn batch_scorer(probability: f32) -> Box<dyn Scorer> {
        Box::new(FnScorer::new("batch", move |input: ArrayViewD<'_, f32>| {
            if input.ndim() == 4 {
                ScoreVector::new(vec![probability])
            } else {
                Err(ScorerError::ShapeMismatch {
                    expected: "[1, 150, 150, 3]".to_string(),
                    actual: input.shape().to_vec(),
                })
            }
        }))
    }

    #[test]
    fn heuristic_engine_is_selected_without_scorer() {
        let engine = TriageEngine::new(&TriageConfig::default(), None).unwrap();
        assert_eq!(engine.classifier().kind(), "heuristic");
        assert!(
            !engine
                .classifier()
                .possible_labels()
                .contains(&TriageLabel::PositiveUnspecified)
        );
    }

    #[test]
    fn model_engine_reports_positive_with_presumptive_protocol() {
        let engine = TriageEngine::new(&TriageConfig::default(), Some(batch_scorer(0.93))).unwrap();
        let report = engine.triage_image(&gray(60)).unwrap();
        assert_eq!(report.classification.label, TriageLabel::PositiveUnspecified);
        assert_eq!(report.classification.confidence, Confidence::Model(0.93));
        let details = report.protocol.details().expect("treatment");
        assert!(details.presumptive);
        assert_eq!(details.record.pathogen, PATHOGEN_A);
    }

    #[test]
    fn failing_scorer_falls_back_to_heuristic_once() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let scorer = FnScorer::new("broken", move |_input: ArrayViewD<'_, f32>| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(ScorerError::Failed("runtime error".to_string()))
        });
        let engine = TriageEngine::new(&TriageConfig::default(), Some(Box::new(scorer))).unwrap();
        let report = engine.triage_image(&gray(200)).unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(report.classification.label, TriageLabel::PathogenA);
        assert!(report.classification.confidence.is_heuristic());
        match report.classification.path {
            ClassifierPath::Heuristic {
                reason: FallbackReason::InferenceUnavailable(message),
                ..
            } => assert!(message.contains("runtime error")),
            other => panic!("unexpected path {other:?}"),
        }
    }

    #[test]
    fn engine_refuses_table_missing_an_emittable_pathogen() {
        let table = ProtocolTable::new(
            "partial",
            [ProtocolRecord {
                pathogen: PATHOGEN_A.to_string(),
                pattern: "Lobar".to_string(),
                first_line: "Amoxicillin".to_string(),
                max_dose: String::new(),
                duration: String::new(),
                alternative: String::new(),
                page: "1".to_string(),
            }],
        )
        .unwrap();
        let error = TriageEngine::with_table(&TriageConfig::default(), Arc::new(table), None).unwrap_err();
        assert!(matches!(error, ConfigError::MissingProtocol(p) if p == "Mycoplasma pneumoniae"));
    }

    #[test]
    fn engine_refuses_unknown_presumptive_pathogen_only_with_a_model() {
        let mut config = TriageConfig::default();
        config.protocols.presumptive_pathogen = "Haemophilus influenzae".to_string();
        assert!(TriageEngine::new(&config, None).is_ok());
        assert!(matches!(
            TriageEngine::new(&config, Some(batch_scorer(0.1))),
            Err(ConfigError::MissingProtocol(p)) if p == "Haemophilus influenzae"
        ));
    }

    #[test]
    fn summary_drops_pixels_but_keeps_dimensions() {
        let engine = TriageEngine::new(&TriageConfig::default(), None).unwrap();
        let report = engine.triage_image(&gray(110)).unwrap();
        let summary = report.summary();
        assert_eq!((summary.width, summary.height), (20, 20));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["classification"]["label"], "pathogen_b");
        assert_eq!(json["protocol"]["kind"], "treatment");
        assert_eq!(json["protocol"]["record"]["pathogen"], "Mycoplasma pneumoniae");
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TriageEngine>();
    }
}
