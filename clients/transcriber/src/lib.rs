//! Transcriber capability: submits call audio to a speech recognizer
//! and returns diarized text.

use std::time::Duration;

use async_trait::async_trait;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct TranscriptionOptions {
    pub language: String,
    pub diarization: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub speaker_tag: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub confidence: f64,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Submits `blob_uri` for transcription as a long-running operation
    /// and blocks until it completes or `deadline` expires.
    ///
    /// Error mapping: `unsupported_format` → `skip` (the stage advances
    /// with no transcript); a deadline overrun → `deadline`; a
    /// recognizer-side outage → `transient`; any other rejection →
    /// `fatal`.
    async fn transcribe(
        &self,
        blob_uri: &str,
        options: TranscriptionOptions,
        deadline: Duration,
    ) -> Result<TranscriptionResult, PipelineError>;
}

/// In-process stand-in used by the app crate's in-memory wiring and by
/// tests. Returns a fixed transcript for any `.wav`/`.mp3` URI and a
/// `skip` for anything else, modeling the unsupported-format path
/// without a real speech recognizer.
pub struct FakeTranscriber {
    pub fixed_transcript: String,
}

impl FakeTranscriber {
    pub fn new(fixed_transcript: impl Into<String>) -> Self {
        Self {
            fixed_transcript: fixed_transcript.into(),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        blob_uri: &str,
        _options: TranscriptionOptions,
        _deadline: Duration,
    ) -> Result<TranscriptionResult, PipelineError> {
        let supported = blob_uri.ends_with(".wav") || blob_uri.ends_with(".mp3");
        if !supported {
            return Err(PipelineError::new(
                ErrorClass::Skip,
                "unsupported_format",
                format!("no recognizer supports the format at {blob_uri}"),
            ));
        }
        Ok(TranscriptionResult {
            text: self.fixed_transcript.clone(),
            segments: vec![Segment {
                speaker_tag: "1".to_string(),
                start_seconds: 0.0,
                end_seconds: 3.2,
                text: self.fixed_transcript.clone(),
                confidence: 0.95,
            }],
            confidence: 0.95,
        })
    }
}
