//! `AnalysisResult`: the structured output of submitting a call's
//! transcript and metadata to the language model.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

/// Defines an enum whose known variants round-trip as fixed snake_case
/// tokens, plus an `Other(String)` catch-all that preserves whatever raw
/// token a model actually sent — so a slightly different enum value from
/// the analyzer degrades to "unclassified" instead of failing the whole
/// response to parse.
macro_rules! open_string_enum {
    ($name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $token,)+
                    Self::Other(raw) => raw.as_str(),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Ok(match raw.as_str() {
                    $($token => Self::$variant,)+
                    _ => Self::Other(raw),
                })
            }
        }
    };
}

open_string_enum!(Intent {
    QuoteRequest => "quote_request",
    InfoSeeking => "info_seeking",
    Appointment => "appointment",
    Complaint => "complaint",
});

open_string_enum!(ProjectType {
    Kitchen => "kitchen",
    Bathroom => "bathroom",
    WholeHome => "whole_home",
    Addition => "addition",
});

open_string_enum!(Timeline {
    Immediate => "immediate",
    OneToThreeMonths => "1-3mo",
    ThreeToSixMonths => "3-6mo",
    SixMonthsPlus => "6+mo",
});

open_string_enum!(Budget {
    High => "high",
    Medium => "medium",
    Low => "low",
});

open_string_enum!(Sentiment {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub intent: Intent,
    pub project_type: ProjectType,
    pub timeline: Timeline,
    pub budget: Budget,
    pub sentiment: Sentiment,
    /// 1..=100, clamped on construction.
    pub score: u8,
    /// 0..=100, clamped on construction.
    pub spam_likelihood: u8,
    pub key_details: Vec<String>,
    pub appointment_requested: bool,
    pub followup_required: bool,
}

impl AnalysisResult {
    /// Builds a result, clamping `score` into `1..=100` and
    /// `spam_likelihood` into `0..=100` per the scoring contract.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        intent: Intent,
        project_type: ProjectType,
        timeline: Timeline,
        budget: Budget,
        sentiment: Sentiment,
        score: i32,
        spam_likelihood: i32,
        key_details: Vec<String>,
        appointment_requested: bool,
        followup_required: bool,
    ) -> Self {
        Self {
            intent,
            project_type,
            timeline,
            budget,
            sentiment,
            score: score.clamp(1, 100) as u8,
            spam_likelihood: spam_likelihood.clamp(0, 100) as u8,
            key_details,
            appointment_requested,
            followup_required,
        }
    }
}
