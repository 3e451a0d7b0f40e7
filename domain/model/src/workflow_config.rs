//! Per-tenant workflow configuration.
//!
//! A typed value with enumerated fields rather than a loosely-typed
//! option bag. Unknown JSON fields are ignored on deserialize (`serde`'s
//! default behavior); missing fields fall back to the `Default` impls
//! below, documented per-field.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub transcription: TranscriptionConfig,
    pub analysis: AnalysisConfig,
    pub spam_detection: SpamDetectionConfig,
    pub service_area: ServiceAreaConfig,
    pub crm: CrmConfig,
    pub notifications: NotificationConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            transcription: TranscriptionConfig::default(),
            analysis: AnalysisConfig::default(),
            spam_detection: SpamDetectionConfig::default(),
            service_area: ServiceAreaConfig::default(),
            crm: CrmConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    pub language: String,
    pub diarization: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "en-US".to_string(),
            diarization: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub model: String,
    /// 0..=100; the GATE stage discards any lead scoring below this,
    /// regardless of spam/service-area outcome.
    pub min_score_to_deliver: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "default".to_string(),
            min_score_to_deliver: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamDetectionConfig {
    pub enabled: bool,
    /// 0..=100; spam_likelihood at or above this discards the lead.
    pub threshold: u8,
}

impl Default for SpamDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceAreaConfig {
    pub enabled: bool,
    pub allowed_areas: Vec<String>,
    /// Extra radius/margin applied when checking whether a call falls
    /// within `allowed_areas`; units are caller-defined (e.g. miles).
    pub buffer: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    pub enabled: bool,
    /// Selects the adapter implementation from the CRM Adapter Registry.
    /// Empty string means "no provider configured"; the DELIVER stage
    /// then treats the gate as not satisfied.
    pub provider: String,
    /// Opaque handle resolved through the secret-store collaborator; never
    /// raw credential material.
    pub credentials_handle: String,
    /// Maps our AnalysisResult/Request field names to the CRM's field
    /// names, e.g. `{"intent": "Lead_Intent__c"}`.
    pub field_mapping: std::collections::HashMap<String, String>,
    /// Minimum `AnalysisResult.score` required to push to the CRM.
    pub push_when_score_at_least: u8,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: String::new(),
            credentials_handle: String::new(),
            field_mapping: std::collections::HashMap::new(),
            push_when_score_at_least: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub min_score: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_json_fields_are_ignored() {
        let json = serde_json::json!({
            "transcription": {"enabled": false, "made_up_field": 42},
            "unknown_top_level": true,
        });
        let config: WorkflowConfig = serde_json::from_value(json).unwrap();
        assert!(!config.transcription.enabled);
        // Missing sections fall back to documented defaults.
        assert!(config.analysis.enabled);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = WorkflowConfig::default();
        assert_eq!(config.spam_detection.threshold, 80);
        assert!(!config.crm.enabled);
    }
}
