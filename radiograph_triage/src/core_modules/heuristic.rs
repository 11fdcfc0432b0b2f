// THEORY:
// The density heuristic is the classifier of last resort. It is a pure, total
// function of one number, the mean Rec. 601 luminance of the film:
//
//   mean < 95          → Normal
//   mean > 130         → PathogenA (lobar consolidation)
//   otherwise          → PathogenB (interstitial infiltrate)
//
// The comparison is done on the exact fixed-point luma sum, so a film whose mean
// is exactly on a threshold lands on the documented side of it.
//
// The thresholds are ad-hoc and not clinically validated. The result always carries
// `Confidence::HeuristicPlaceholder` so nobody mistakes it for a probability.

use crate::core_modules::classification::{
    Classification, ClassifierPath, Confidence, FallbackReason, TriageLabel,
};
use crate::core_modules::raw_image::{LUMA_SCALE, Luminance, RawImage};

/// Strictly below this mean intensity the film is called normal.
pub const NORMAL_BELOW: Luminance = 95.0;
/// Strictly above this mean intensity the film is called lobar consolidation.
pub const CONSOLIDATION_ABOVE: Luminance = 130.0;

/// Applies the fixed thresholds, in order.
pub fn label_for_mean(mean: Luminance) -> TriageLabel {
    if mean < NORMAL_BELOW {
        TriageLabel::Normal
    } else if mean > CONSOLIDATION_ABOVE {
        TriageLabel::PathogenA
    } else {
        TriageLabel::PathogenB
    }
}

/// Same thresholds as `label_for_mean`, applied to a luma sum in thousandths over
/// `count` pixels without any division.
pub fn label_for_luminance_sum(sum_milli: u64, count: u64) -> TriageLabel {
    let scaled = |threshold: Luminance| threshold as u128 * LUMA_SCALE as u128 * count as u128;
    let sum = sum_milli as u128;
    if sum < scaled(NORMAL_BELOW) {
        TriageLabel::Normal
    } else if sum > scaled(CONSOLIDATION_ABOVE) {
        TriageLabel::PathogenA
    } else {
        TriageLabel::PathogenB
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Every heuristic label, used to check the protocol table at startup.
    pub const LABELS: [TriageLabel; 3] = [
        TriageLabel::Normal,
        TriageLabel::PathogenA,
        TriageLabel::PathogenB,
    ];

    pub fn classify(&self, image: &RawImage, reason: FallbackReason) -> Classification {
        let mean_intensity = image.mean_intensity();
        Classification {
            label: label_for_luminance_sum(image.luminance_sum_milli(), image.pixel_count()),
            confidence: Confidence::HeuristicPlaceholder,
            path: ClassifierPath::Heuristic {
                reason,
                mean_intensity,
            },
        }
    }
}
