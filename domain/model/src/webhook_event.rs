//! `WebhookEvent`: the append-only audit record of every inbound
//! webhook, independent of whether it produced a `Request`.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::TenantId;
use crate::ids::WebhookEventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceTag {
    Phone,
    Form,
    Chat,
    Calendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WebhookProcessingStatus {
    Received,
    Processing,
    Completed,
    Failed,
    Discarded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    /// `None` until tenant resolution succeeds.
    pub tenant_id: Option<TenantId>,
    pub source: SourceTag,
    pub event_type: String,
    #[serde(with = "raw_payload_base64")]
    pub raw_payload: Vec<u8>,
    pub signature_verified: bool,
    pub status: WebhookProcessingStatus,
    pub retry_count: u32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    pub fn received(
        source: SourceTag,
        event_type: impl Into<String>,
        raw_payload: Vec<u8>,
        signature_verified: bool,
        tenant_id: Option<TenantId>,
    ) -> Self {
        Self {
            id: WebhookEventId::new(),
            tenant_id,
            source,
            event_type: event_type.into(),
            raw_payload,
            signature_verified,
            status: WebhookProcessingStatus::Received,
            retry_count: 0,
            received_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Raw bytes serialize as base64 on the JSON boundary so the payload
/// round-trips byte-identically without assuming it is valid UTF-8.
mod raw_payload_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
