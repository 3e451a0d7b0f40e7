//! The pipeline state machine.
//!
//! ```text
//! ADMITTED → FETCH_META → FETCH_RECORDING → STORE_AUDIO
//!          → TRANSCRIBE → ANALYZE → GATE → DELIVER → DELIVERED
//!                                      ↘           ↘
//!                                       DISCARDED   FAILED
//! ```

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Admitted,
    FetchMeta,
    FetchRecording,
    StoreAudio,
    Transcribe,
    Analyze,
    Gate,
    Deliver,
    Delivered,
    Discarded,
    Failed,
}

impl Stage {
    pub const INITIAL: Stage = Stage::Admitted;

    /// `terminal = true` ⇒ stage ∈ {DELIVERED, FAILED, DISCARDED}.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Delivered | Stage::Failed | Stage::Discarded)
    }

    /// The stage reached by a normal (non-error, non-skip) advance from
    /// `self`. Returns `None` for terminal stages, which have no successor.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Admitted => Some(Stage::FetchMeta),
            Stage::FetchMeta => Some(Stage::FetchRecording),
            Stage::FetchRecording => Some(Stage::StoreAudio),
            Stage::StoreAudio => Some(Stage::Transcribe),
            Stage::Transcribe => Some(Stage::Analyze),
            Stage::Analyze => Some(Stage::Gate),
            Stage::Gate => Some(Stage::Deliver),
            Stage::Deliver => Some(Stage::Delivered),
            Stage::Delivered | Stage::Discarded | Stage::Failed => None,
        }
    }

    /// Whether `to` is a legal direct transition from `self` under normal
    /// advancement, a skip-to-ANALYZE shortcut, or a terminal exit. Used
    /// by the Request Store's compare-and-swap to reject stale writers.
    /// The caller is responsible for only advancing once the
    /// corresponding artifact is persisted; this only checks shape.
    pub fn can_transition_to(self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.next() == Some(to) {
            return true;
        }
        // FETCH_META → ANALYZE: recording absent, skip straight to
        // analysis with an empty transcript.
        if self == Stage::FetchMeta && to == Stage::Analyze {
            return true;
        }
        // STORE_AUDIO → ANALYZE: transcription disabled, or the
        // recognizer rejected the format, or a second timeout — skip
        // with the transcript left absent.
        if self == Stage::StoreAudio && to == Stage::Analyze {
            return true;
        }
        // Any non-terminal stage can fail out or be discarded.
        to == Stage::Failed || to == Stage::Discarded
    }
}
