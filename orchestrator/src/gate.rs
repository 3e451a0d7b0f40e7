//! Gate evaluation between analysis and delivery: decides whether a
//! Request proceeds to DELIVER or is DISCARDED, purely from the already
//! persisted `AnalysisResult` and call metadata — no external I/O.

use leadline_model::AnalysisResult;
use leadline_model::WorkflowConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Discard { reason: &'static str },
}

/// Service-area membership is checked against a `"service_area"` string
/// field on the raw call metadata, case-insensitively. The metadata field
/// convention is this project's own choice, since provider wire formats
/// vary and the check only needs a stable internal contract.
pub fn evaluate(
    analysis: &AnalysisResult,
    call_metadata: &serde_json::Value,
    workflow: &WorkflowConfig,
) -> GateDecision {
    if workflow.spam_detection.enabled && analysis.spam_likelihood >= workflow.spam_detection.threshold {
        return GateDecision::Discard {
            reason: "spam_likelihood_above_threshold",
        };
    }

    if analysis.score < workflow.analysis.min_score_to_deliver {
        return GateDecision::Discard {
            reason: "score_below_minimum",
        };
    }

    if workflow.service_area.enabled {
        let area = call_metadata.get("service_area").and_then(|v| v.as_str());
        let allowed = match area {
            Some(area) => workflow
                .service_area
                .allowed_areas
                .iter()
                .any(|a| a.eq_ignore_ascii_case(area)),
            None => false,
        };
        if !allowed {
            return GateDecision::Discard {
                reason: "outside_service_area",
            };
        }
    }

    GateDecision::Proceed
}
