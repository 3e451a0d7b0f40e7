//! Analyzer: submits the transcript and call metadata to a language
//! model and parses its response into an `AnalysisResult`.

use async_trait::async_trait;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use leadline_model::AnalysisResult;
use leadline_model::Budget;
use leadline_model::Intent;
use leadline_model::ProjectType;
use leadline_model::Sentiment;
use leadline_model::Timeline;
use leadline_model::WorkflowConfig;
use serde::Deserialize;
use tracing::warn;

/// The raw completion backend behind `Analyzer` — one call per attempt,
/// with no parsing or retry logic of its own. Kept separate so the
/// retry-once-on-parse-failure behavior in `Analyzer::analyze` is
/// testable without a real language model.
#[async_trait]
pub trait RawAnalyzerClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, PipelineError>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        transcript: &str,
        call_metadata: &serde_json::Value,
        workflow_config: &WorkflowConfig,
    ) -> Result<AnalysisResult, PipelineError>;
}

/// Matches the schema the prompt asks the model to emit. Scores are
/// parsed as unbounded integers and clamped by `AnalysisResult::new`
/// rather than rejected, so a model that slightly overshoots its range
/// doesn't trigger a needless reprompt. The enum fields similarly fall
/// back to their `Other(String)` variant on an unrecognized token
/// instead of failing to deserialize, so only a genuinely malformed
/// body (bad JSON, a missing required field) triggers the retry below.
#[derive(Debug, Deserialize)]
struct RawAnalysisResponse {
    intent: Intent,
    project_type: ProjectType,
    timeline: Timeline,
    budget: Budget,
    sentiment: Sentiment,
    score: i32,
    spam_likelihood: i32,
    #[serde(default)]
    key_details: Vec<String>,
    #[serde(default)]
    appointment_requested: bool,
    #[serde(default)]
    followup_required: bool,
}

impl From<RawAnalysisResponse> for AnalysisResult {
    fn from(raw: RawAnalysisResponse) -> Self {
        AnalysisResult::new(
            raw.intent,
            raw.project_type,
            raw.timeline,
            raw.budget,
            raw.sentiment,
            raw.score,
            raw.spam_likelihood,
            raw.key_details,
            raw.appointment_requested,
            raw.followup_required,
        )
    }
}

pub struct LlmAnalyzer<C: RawAnalyzerClient> {
    client: C,
}

impl<C: RawAnalyzerClient> LlmAnalyzer<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    fn build_prompt(
        transcript: &str,
        call_metadata: &serde_json::Value,
        workflow_config: &WorkflowConfig,
        stricter: bool,
    ) -> String {
        let reminder = if stricter {
            "\n\nYour previous response did not parse as the required JSON schema. \
             Respond with ONLY a single JSON object matching the schema, no prose."
        } else {
            ""
        };
        format!(
            "Analyze this phone call transcript for a home services lead.\n\
             Transcript: {transcript}\n\
             Call metadata: {call_metadata}\n\
             Spam threshold: {}\n\
             Respond as JSON: {{intent, project_type, timeline, budget, sentiment, score, \
             spam_likelihood, key_details, appointment_requested, followup_required}}{reminder}",
            workflow_config.spam_detection.threshold
        )
    }
}

#[async_trait]
impl<C: RawAnalyzerClient> Analyzer for LlmAnalyzer<C> {
    async fn analyze(
        &self,
        transcript: &str,
        call_metadata: &serde_json::Value,
        workflow_config: &WorkflowConfig,
    ) -> Result<AnalysisResult, PipelineError> {
        let prompt = Self::build_prompt(transcript, call_metadata, workflow_config, false);
        let first = self.client.complete(&prompt).await?;
        if let Ok(parsed) = serde_json::from_str::<RawAnalysisResponse>(&first) {
            return Ok(parsed.into());
        }
        warn!("analyzer response failed to parse, retrying with a stricter prompt");

        let stricter_prompt = Self::build_prompt(transcript, call_metadata, workflow_config, true);
        let second = self.client.complete(&stricter_prompt).await?;
        serde_json::from_str::<RawAnalysisResponse>(&second)
            .map(Into::into)
            .map_err(|e| {
                PipelineError::new(
                    ErrorClass::Fatal,
                    "invalid_response",
                    format!("analyzer response did not match the expected schema: {e}"),
                )
            })
    }
}

/// In-process stand-in used by the app crate's in-memory wiring and by
/// tests. Always returns a fixed, schema-valid JSON body.
pub struct FakeRawAnalyzerClient {
    pub response: String,
}

impl FakeRawAnalyzerClient {
    pub fn valid() -> Self {
        Self {
            response: serde_json::json!({
                "intent": "quote_request",
                "project_type": "kitchen",
                "timeline": "1-3mo",
                "budget": "high",
                "sentiment": "positive",
                "score": 85,
                "spam_likelihood": 2,
                "key_details": ["wants a full remodel"],
                "appointment_requested": true,
                "followup_required": false,
            })
            .to_string(),
        }
    }

    pub fn malformed() -> Self {
        Self {
            response: "not json at all".to_string(),
        }
    }

    /// Same fixed analysis as [`Self::valid`] but with `score` overridden,
    /// for exercising gate decisions that depend on the score.
    pub fn with_score(score: u8) -> Self {
        Self {
            response: serde_json::json!({
                "intent": "quote_request",
                "project_type": "kitchen",
                "timeline": "1-3mo",
                "budget": "high",
                "sentiment": "positive",
                "score": score,
                "spam_likelihood": 2,
                "key_details": ["wants a full remodel"],
                "appointment_requested": true,
                "followup_required": false,
            })
            .to_string(),
        }
    }
}

#[async_trait]
impl RawAnalyzerClient for FakeRawAnalyzerClient {
    async fn complete(&self, _prompt: &str) -> Result<String, PipelineError> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_a_well_formed_response_on_the_first_try() {
        let analyzer = LlmAnalyzer::new(FakeRawAnalyzerClient::valid());
        let result = analyzer
            .analyze("hello", &serde_json::json!({}), &WorkflowConfig::default())
            .await
            .unwrap();
        assert_eq!(result.score, 85);
        assert_eq!(result.intent, Intent::QuoteRequest);
    }

    #[tokio::test]
    async fn with_score_overrides_only_the_score_field() {
        let analyzer = LlmAnalyzer::new(FakeRawAnalyzerClient::with_score(12));
        let result = analyzer
            .analyze("hello", &serde_json::json!({}), &WorkflowConfig::default())
            .await
            .unwrap();
        assert_eq!(result.score, 12);
        assert_eq!(result.intent, Intent::QuoteRequest);
    }

    #[tokio::test]
    async fn unrecognized_enum_token_does_not_trigger_a_retry() {
        let client = FakeRawAnalyzerClient {
            response: serde_json::json!({
                "intent": "reschedule_request",
                "project_type": "kitchen",
                "timeline": "1-3mo",
                "budget": "high",
                "sentiment": "positive",
                "score": 60,
                "spam_likelihood": 2,
            })
            .to_string(),
        };
        let analyzer = LlmAnalyzer::new(client);
        let result = analyzer
            .analyze("hello", &serde_json::json!({}), &WorkflowConfig::default())
            .await
            .unwrap();
        assert_eq!(result.intent, Intent::Other("reschedule_request".to_string()));
        assert_eq!(result.score, 60);
    }

    #[tokio::test]
    async fn two_malformed_responses_surface_invalid_response() {
        let analyzer = LlmAnalyzer::new(FakeRawAnalyzerClient::malformed());
        let err = analyzer
            .analyze("hello", &serde_json::json!({}), &WorkflowConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, "invalid_response");
        assert!(!err.is_retryable());
    }
}
