//! Exponential backoff retry executor for a single provider call.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use leadline_config::RetryConfig;
use leadline_error::PipelineError;
use leadline_otel::NoopRequestTelemetry;
use leadline_otel::RequestTelemetry;
use rand::Rng;
use tracing::warn;

pub struct RetryExecutor {
    config: RetryConfig,
    telemetry: Arc<dyn RequestTelemetry>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            telemetry: Arc::new(NoopRequestTelemetry),
        }
    }

    pub fn with_telemetry(config: RetryConfig, telemetry: Arc<dyn RequestTelemetry>) -> Self {
        Self { config, telemetry }
    }

    /// Runs `operation` until it succeeds, returns a non-retryable
    /// error, the attempt budget is exhausted (`poisoned`), or the
    /// overall deadline passes (`deadline`). `operation_name` identifies
    /// the call for telemetry (e.g. `"provider.get_call_details"`).
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let deadline = Instant::now() + self.config.overall_deadline;
        let mut attempt: u32 = 1;

        loop {
            let started = Instant::now();
            match operation().await {
                Ok(value) => {
                    self.telemetry
                        .on_attempt(operation_name, attempt, None, started.elapsed());
                    return Ok(value);
                }
                Err(error) => {
                    self.telemetry
                        .on_attempt(operation_name, attempt, Some(&error), started.elapsed());
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    if attempt >= self.config.max_attempts {
                        let exhausted = PipelineError::poisoned(format!(
                            "exhausted {attempt} attempts: {error}"
                        ));
                        self.telemetry.on_exhausted(operation_name, attempt, &exhausted);
                        return Err(exhausted);
                    }
                    let delay = self.delay_for(attempt);
                    if Instant::now() + delay >= deadline {
                        return Err(PipelineError::deadline(format!(
                            "retry deadline exceeded after {attempt} attempts: {error}"
                        )));
                    }
                    warn!(attempt, ?delay, %error, "retrying after transient error");
                    self.telemetry.on_retry(operation_name, attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64()
            * self.config.multiplier.powi(attempt as i32 - 1);
        let base = base.min(self.config.max_delay.as_secs_f64());
        let jitter_span = base * self.config.jitter_ratio;
        let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}
