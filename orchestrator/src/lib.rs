//! The state machine driver for ingesting a lead through every pipeline
//! stage. `advance` performs the work for the Request's current stage and
//! persists exactly one transition — acquiring the advance-lease first,
//! releasing it on every exit path, and turning the stage's outcome
//! into a transition purely from the outcome's `ErrorClass`.

mod backoff;
mod gate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadline_analyzer::Analyzer;
use leadline_blob_store::BlobStore;
use leadline_config::RetryConfig;
use leadline_crm_adapters::CrmAdapterRegistry;
use leadline_crm_adapters::CrmOutcome;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use leadline_model::AdvanceLease;
use leadline_model::AnalysisResult;
use leadline_model::CallRecording;
use leadline_model::Request;
use leadline_model::RequestError;
use leadline_model::Stage;
use leadline_model::Tenant;
use leadline_model::TranscriptionStatus;
use leadline_model::ids::CallRecordingId;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use leadline_otel::NoopRequestTelemetry;
use leadline_otel::RequestTelemetry;
use leadline_provider_client::ProviderClient;
use leadline_provider_client::ProviderCredentials;
use leadline_provider_client::SecretResolver;
use leadline_store_call_recording::CallRecordingStore;
use leadline_store_request::RequestPatch;
use leadline_store_request::RequestStore;
use leadline_store_tenant::TenantRegistry;
use leadline_transcriber::Transcriber;
use leadline_transcriber::TranscriptionOptions;
use tracing::info;
use tracing::warn;

/// Every external collaborator a stage may need, held as trait objects
/// so the orchestrator is agnostic to in-memory vs. production wiring.
pub struct Collaborators {
    pub tenant_registry: Arc<dyn TenantRegistry>,
    pub request_store: Arc<dyn RequestStore>,
    pub provider_client: Arc<dyn ProviderClient>,
    pub secret_resolver: Arc<dyn SecretResolver>,
    pub blob_store: Arc<dyn BlobStore>,
    pub transcriber: Arc<dyn Transcriber>,
    pub analyzer: Arc<dyn Analyzer>,
    pub crm_adapters: Arc<CrmAdapterRegistry>,
    pub call_recordings: Arc<dyn CallRecordingStore>,
    pub telemetry: Arc<dyn RequestTelemetry>,
}

impl Collaborators {
    /// Convenience for wiring that doesn't care about telemetry (tests,
    /// and any deployment with no metrics backend wired up yet).
    pub fn noop_telemetry() -> Arc<dyn RequestTelemetry> {
        Arc::new(NoopRequestTelemetry)
    }
}

struct StageAdvance {
    to: Stage,
    patch: RequestPatch,
}

impl StageAdvance {
    fn to(to: Stage) -> Self {
        Self {
            to,
            patch: RequestPatch::default(),
        }
    }
}

pub struct Orchestrator {
    collaborators: Collaborators,
    retry: RetryConfig,
    lease_duration: Duration,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, retry: RetryConfig, lease_duration: Duration) -> Self {
        Self {
            collaborators,
            retry,
            lease_duration,
        }
    }

    /// Advances `request_id` by exactly one stage transition, or returns
    /// it unchanged if it is terminal or its retry isn't due yet. `Err`
    /// is reserved for conditions the caller (the scheduler) should act
    /// on itself — lease contention, or the store being unreachable —
    /// never for a stage's own failure, which is always absorbed into
    /// the Request and returned as `Ok`.
    pub async fn advance(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        worker_id: &str,
    ) -> Result<Request, PipelineError> {
        let now = Utc::now();
        let request = self.collaborators.request_store.get(tenant_id, request_id).await?;

        if request.terminal {
            return Ok(request);
        }
        if let Some(next_attempt_at) = request.next_attempt_at {
            if now < next_attempt_at {
                return Ok(request);
            }
        }
        if !request.lease.is_expired(now) && !request.lease.is_held_by(worker_id, now) {
            return Err(PipelineError::transient(
                "lease_held",
                "another worker holds the advance-lease",
            ));
        }

        if request.cancel_requested {
            return self
                .exit_without_attempt(
                    tenant_id,
                    request_id,
                    request.stage,
                    Stage::Failed,
                    PipelineError::fatal("cancelled", "operator cancellation requested"),
                )
                .await;
        }
        if request.is_past_deadline(now) {
            return self
                .exit_without_attempt(
                    tenant_id,
                    request_id,
                    request.stage,
                    Stage::Failed,
                    PipelineError::deadline("request exceeded its overall deadline"),
                )
                .await;
        }

        let tenant = self.collaborators.tenant_registry.get(tenant_id).await?;
        if !tenant.is_usable() {
            return self
                .exit_without_attempt(
                    tenant_id,
                    request_id,
                    request.stage,
                    Stage::Failed,
                    PipelineError::fatal("tenant_disabled", "tenant is no longer active"),
                )
                .await;
        }

        let lease = AdvanceLease {
            owner: Some(worker_id.to_string()),
            expires_at: Some(now + self.lease_duration),
        };
        let request = self
            .collaborators
            .request_store
            .record_attempt(
                tenant_id,
                request_id,
                request.stage,
                RequestPatch {
                    lease: Some(lease),
                    ..Default::default()
                },
                false,
            )
            .await?;

        let stage = request.stage;
        match self.perform_stage(&tenant, &request).await {
            Ok(advance) => {
                info!(%request_id, from = stage.as_ref(), to = advance.to.as_ref(), "stage advanced");
                self.collaborators
                    .request_store
                    .update_stage(tenant_id, request_id, stage, advance.to, advance.patch, Some(stage))
                    .await
            }
            Err(error) => self.handle_error(tenant_id, request_id, stage, &request, error).await,
        }
    }

    async fn perform_stage(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        match request.stage {
            Stage::Admitted => self.fetch_meta(tenant, request).await,
            Stage::FetchMeta => self.fetch_recording_url(tenant, request).await,
            Stage::FetchRecording => self.store_audio(tenant, request).await,
            Stage::StoreAudio => self.transcribe(tenant, request).await,
            Stage::Transcribe => self.analyze(tenant, request).await,
            Stage::Analyze => self.evaluate_gate_stage(request),
            Stage::Gate => self.route_gate(tenant, request),
            Stage::Deliver => self.deliver(tenant, request).await,
            Stage::Delivered | Stage::Discarded | Stage::Failed => Err(PipelineError::fatal(
                "invalid_state",
                "advance() was called on a terminal stage",
            )),
        }
    }

    async fn resolve_credentials(&self, tenant: &Tenant) -> Result<ProviderCredentials, PipelineError> {
        let handle = self
            .collaborators
            .tenant_registry
            .credentials(tenant.id, "provider")
            .await?;
        self.collaborators.secret_resolver.resolve_provider_credentials(&handle).await
    }

    fn call_id(request: &Request) -> Result<String, PipelineError> {
        request
            .call_id
            .as_ref()
            .map(|c| c.0.clone())
            .ok_or_else(|| PipelineError::fatal("missing_call_id", "request has no provider call id"))
    }

    async fn fetch_meta(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        let credentials = self.resolve_credentials(tenant).await?;
        let call_id = Self::call_id(request)?;
        let metadata = self.collaborators.provider_client.get_call_details(&credentials, &call_id).await?;
        Ok(StageAdvance {
            to: Stage::FetchMeta,
            patch: RequestPatch {
                call_metadata: Some(metadata),
                ..Default::default()
            },
        })
    }

    async fn fetch_recording_url(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        let credentials = self.resolve_credentials(tenant).await?;
        let call_id = Self::call_id(request)?;
        let recording_url = self
            .collaborators
            .provider_client
            .get_recording_url(&credentials, &call_id)
            .await?;
        match recording_url {
            Some(url) => Ok(StageAdvance {
                to: Stage::FetchRecording,
                patch: RequestPatch {
                    recording_url: Some(url),
                    ..Default::default()
                },
            }),
            // No recording for this call: skip transcription entirely
            // and analyze on metadata alone.
            None => Ok(StageAdvance::to(Stage::Analyze)),
        }
    }

    async fn store_audio(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        let credentials = self.resolve_credentials(tenant).await?;
        let url = request
            .recording_url
            .as_deref()
            .ok_or_else(|| PipelineError::fatal("missing_recording_url", "fetch_recording reached with no recording url"))?;
        let (bytes, content_type) = self.collaborators.provider_client.download_recording(&credentials, url).await?;
        let call_id = Self::call_id(request).unwrap_or_else(|_| "unknown".to_string());
        let key = format!("calls/{call_id}.{}", extension_for_content_type(&content_type));
        let size_bytes = bytes.len() as u64;
        let blob_uri = self
            .collaborators
            .blob_store
            .put(tenant.id, request.id, &key, bytes, &content_type)
            .await?;
        self.collaborators
            .call_recordings
            .create(CallRecording {
                id: CallRecordingId::new(),
                tenant_id: tenant.id,
                request_id: request.id,
                blob_uri: blob_uri.clone(),
                size_bytes,
                duration_seconds: None,
                format: content_type,
                transcription_status: TranscriptionStatus::Pending,
            })
            .await?;
        Ok(StageAdvance {
            to: Stage::StoreAudio,
            patch: RequestPatch {
                blob_uri: Some(blob_uri),
                ..Default::default()
            },
        })
    }

    /// Best-effort: a missing `CallRecording` row (e.g. in tests that
    /// construct a `Request` directly without going through
    /// `store_audio`) never blocks the transcription stage itself.
    async fn mark_transcription_status(&self, tenant: &Tenant, request: &Request, status: TranscriptionStatus) {
        if let Ok(recording) = self
            .collaborators
            .call_recordings
            .get_by_request(tenant.id, request.id)
            .await
        {
            let _ = self
                .collaborators
                .call_recordings
                .update_transcription_status(tenant.id, recording.id, status)
                .await;
        }
    }

    async fn transcribe(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        if !tenant.workflow.transcription.enabled {
            self.mark_transcription_status(tenant, request, TranscriptionStatus::Skipped).await;
            return Ok(StageAdvance::to(Stage::Analyze));
        }
        let blob_uri = request
            .blob_uri
            .as_deref()
            .ok_or_else(|| PipelineError::fatal("missing_blob_uri", "store_audio reached with no blob uri"))?;
        let options = TranscriptionOptions {
            language: tenant.workflow.transcription.language.clone(),
            diarization: tenant.workflow.transcription.diarization,
        };
        match self
            .collaborators
            .transcriber
            .transcribe(blob_uri, options, Duration::from_secs(120))
            .await
        {
            Ok(result) => {
                self.mark_transcription_status(tenant, request, TranscriptionStatus::Completed).await;
                Ok(StageAdvance {
                    to: Stage::Transcribe,
                    patch: RequestPatch {
                        transcript: Some(result.text),
                        ..Default::default()
                    },
                })
            }
            Err(error) if error.class == ErrorClass::Skip => {
                self.mark_transcription_status(tenant, request, TranscriptionStatus::Skipped).await;
                Ok(StageAdvance::to(Stage::Analyze))
            }
            Err(error) if error.class == ErrorClass::Deadline => {
                // Retry once on a transcription timeout; a second
                // timeout skips instead of failing the whole Request.
                if request.attempt_count(Stage::StoreAudio) == 0 {
                    Err(PipelineError::transient("transcription_timeout", error.message))
                } else {
                    warn!(request_id = %request.id, "second transcription timeout, skipping with no transcript");
                    self.mark_transcription_status(tenant, request, TranscriptionStatus::Skipped).await;
                    Ok(StageAdvance::to(Stage::Analyze))
                }
            }
            Err(error) => {
                self.mark_transcription_status(tenant, request, TranscriptionStatus::Failed).await;
                Err(error)
            }
        }
    }

    async fn analyze(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        let call_metadata = request.call_metadata.clone().unwrap_or(serde_json::Value::Null);
        let transcript = request.transcript.clone().unwrap_or_default();
        let result = self
            .collaborators
            .analyzer
            .analyze(&transcript, &call_metadata, &tenant.workflow)
            .await?;
        Ok(StageAdvance {
            to: Stage::Analyze,
            patch: RequestPatch {
                analysis: Some(result),
                ..Default::default()
            },
        })
    }

    fn evaluate_gate_stage(&self, request: &Request) -> Result<StageAdvance, PipelineError> {
        let analysis = request
            .analysis
            .as_ref()
            .ok_or_else(|| PipelineError::fatal("missing_analysis", "analyze stage reached with no analysis result"))?;
        Ok(StageAdvance {
            to: Stage::Gate,
            patch: RequestPatch {
                lead_score: Some(analysis.score),
                ..Default::default()
            },
        })
    }

    fn route_gate(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        let analysis = request
            .analysis
            .as_ref()
            .ok_or_else(|| PipelineError::fatal("missing_analysis", "gate stage reached with no analysis result"))?;
        let call_metadata = request.call_metadata.clone().unwrap_or(serde_json::Value::Null);
        match gate::evaluate(analysis, &call_metadata, &tenant.workflow) {
            gate::GateDecision::Proceed => Ok(StageAdvance::to(Stage::Deliver)),
            gate::GateDecision::Discard { reason } => {
                Err(PipelineError::discard(reason, format!("gate decision: {reason}")))
            }
        }
    }

    async fn deliver(&self, tenant: &Tenant, request: &Request) -> Result<StageAdvance, PipelineError> {
        let analysis = request
            .analysis
            .as_ref()
            .ok_or_else(|| PipelineError::fatal("missing_analysis", "deliver stage reached with no analysis result"))?;

        if !tenant.workflow.crm.enabled || analysis.score < tenant.workflow.crm.push_when_score_at_least {
            return Ok(StageAdvance {
                to: Stage::Delivered,
                patch: RequestPatch {
                    terminal: Some(true),
                    ..Default::default()
                },
            });
        }

        let adapter = self
            .collaborators
            .crm_adapters
            .get(&tenant.workflow.crm.provider)
            .ok_or_else(|| {
                PipelineError::fatal(
                    "crm_provider_not_registered",
                    format!("no CRM adapter registered for provider {}", tenant.workflow.crm.provider),
                )
            })?;
        let fields = map_fields(analysis, &tenant.workflow.crm.field_mapping);
        let started = std::time::Instant::now();
        let result = adapter
            .create_or_update_lead(tenant.id, &fields, &request.id.to_string())
            .await;
        self.collaborators.telemetry.on_attempt(
            "crm.create_or_update_lead",
            1,
            result.as_ref().err(),
            started.elapsed(),
        );
        if let Err(error) = &result {
            self.collaborators
                .telemetry
                .on_exhausted("crm.create_or_update_lead", 1, error);
        }
        let outcome = result?;
        let external_id = match outcome {
            CrmOutcome::Created { external_id } | CrmOutcome::Updated { external_id } => external_id,
        };
        Ok(StageAdvance {
            to: Stage::Delivered,
            patch: RequestPatch {
                external_call_id: Some(external_id),
                terminal: Some(true),
                ..Default::default()
            },
        })
    }

    async fn handle_error(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        stage: Stage,
        request: &Request,
        error: PipelineError,
    ) -> Result<Request, PipelineError> {
        match error.class {
            ErrorClass::Fatal | ErrorClass::Deadline | ErrorClass::Poisoned | ErrorClass::Skip => {
                self.terminal_patch(tenant_id, request_id, stage, Stage::Failed, error).await
            }
            ErrorClass::Discard => self.terminal_patch(tenant_id, request_id, stage, Stage::Discarded, error).await,
            ErrorClass::Transient => {
                let attempt = request.attempt_count(stage);
                if attempt + 1 >= self.retry.max_attempts {
                    let poisoned = PipelineError::poisoned(format!(
                        "exhausted {} attempts at stage {}: {}",
                        attempt + 1,
                        stage.as_ref(),
                        error.message
                    ));
                    return self.terminal_patch(tenant_id, request_id, stage, Stage::Failed, poisoned).await;
                }
                let delay = backoff::delay_for_attempt(&self.retry, attempt);
                let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                let patch = RequestPatch {
                    error: Some(request_error_from(&error)),
                    next_attempt_at: Some(Some(next_attempt_at)),
                    lease: Some(AdvanceLease::default()),
                    ..Default::default()
                };
                warn!(%request_id, stage = stage.as_ref(), attempt, ?delay, %error, "stage failed transiently, retry scheduled");
                self.collaborators
                    .request_store
                    .record_attempt(tenant_id, request_id, stage, patch, true)
                    .await
            }
        }
    }

    /// Exits the Request without bumping its attempt counter — used for
    /// preconditions checked before any stage work was attempted
    /// (operator cancellation, overall deadline, tenant disablement).
    async fn exit_without_attempt(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        from: Stage,
        to: Stage,
        error: PipelineError,
    ) -> Result<Request, PipelineError> {
        let patch = RequestPatch {
            error: Some(request_error_from(&error)),
            terminal: Some(true),
            lease: Some(AdvanceLease::default()),
            ..Default::default()
        };
        self.collaborators
            .request_store
            .update_stage(tenant_id, request_id, from, to, patch, None)
            .await
    }

    async fn terminal_patch(
        &self,
        tenant_id: TenantId,
        request_id: RequestId,
        from: Stage,
        to: Stage,
        error: PipelineError,
    ) -> Result<Request, PipelineError> {
        let patch = RequestPatch {
            error: Some(request_error_from(&error)),
            terminal: Some(true),
            lease: Some(AdvanceLease::default()),
            ..Default::default()
        };
        self.collaborators
            .request_store
            .update_stage(tenant_id, request_id, from, to, patch, Some(from))
            .await
    }
}

fn request_error_from(error: &PipelineError) -> RequestError {
    RequestError {
        class: error.class.to_string(),
        code: error.code.to_string(),
        message: error.message.clone(),
        occurred_at: Utc::now(),
    }
}

fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

/// Renames `AnalysisResult`'s canonical fields to the tenant's CRM field
/// names, applied per tenant before dispatch. A field absent from the
/// mapping keeps its canonical name.
fn map_fields(analysis: &AnalysisResult, mapping: &HashMap<String, String>) -> serde_json::Value {
    let canonical = serde_json::json!({
        "intent": analysis.intent,
        "project_type": analysis.project_type,
        "timeline": analysis.timeline,
        "budget": analysis.budget,
        "sentiment": analysis.sentiment,
        "score": analysis.score,
        "spam_likelihood": analysis.spam_likelihood,
        "key_details": analysis.key_details,
        "appointment_requested": analysis.appointment_requested,
        "followup_required": analysis.followup_required,
    });
    let object = canonical.as_object().cloned().unwrap_or_default();
    let mut mapped = serde_json::Map::with_capacity(object.len());
    for (key, value) in object {
        let vendor_key = mapping.get(&key).cloned().unwrap_or(key);
        mapped.insert(vendor_key, value);
    }
    serde_json::Value::Object(mapped)
}
