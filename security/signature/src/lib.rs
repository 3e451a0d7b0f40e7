//! Webhook signature verification.
//!
//! Stateless: the caller resolves the tenant's webhook secret through the
//! Tenant Registry and passes it in on every call. No network, no clock
//! drift compensation beyond the tolerance the caller configures.

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use hmac::Hmac;
use hmac::Mac;
use leadline_error::ErrorClass;
use leadline_error::PipelineError;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a single inbound webhook request against a tenant's secret.
#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier {
    clock_skew_tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(clock_skew_tolerance: Duration) -> Self {
        Self {
            clock_skew_tolerance,
        }
    }

    /// Verifies `signature_header` (hex-encoded HMAC-SHA256) over the
    /// canonical message `timestamp + "." + raw` using `secret`, then
    /// checks `timestamp_header` (Unix seconds) falls within the
    /// configured clock-skew tolerance of now.
    ///
    /// Returns `Ok(())` on success. Every rejection is `fatal` (no retry
    /// helps a bad signature) with one of three codes: `"malformed"` for
    /// a missing/non-hex header, `"stale_timestamp"` for a timestamp
    /// outside tolerance, `"signature_mismatch"` otherwise.
    pub fn verify(
        &self,
        secret: &[u8],
        timestamp_header: &str,
        signature_header: &str,
        raw_body: &[u8],
    ) -> Result<(), PipelineError> {
        let timestamp: i64 = timestamp_header
            .trim()
            .parse()
            .map_err(|_| malformed("timestamp header is not a Unix-seconds integer"))?;

        self.check_freshness(timestamp)?;

        let expected = hex::decode(signature_header.trim())
            .map_err(|_| malformed("signature header is not hex-encoded"))?;

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| PipelineError::fatal("auth", "webhook secret has invalid length"))?;
        mac.update(timestamp_header.trim().as_bytes());
        mac.update(b".");
        mac.update(raw_body);
        let computed = mac.finalize().into_bytes();

        if computed.ct_eq(&expected).unwrap_u8() == 1 {
            Ok(())
        } else {
            Err(PipelineError::new(
                ErrorClass::Fatal,
                "signature_mismatch",
                "HMAC-SHA256 signature did not match",
            ))
        }
    }

    fn check_freshness(&self, timestamp: i64) -> Result<(), PipelineError> {
        let now: i64 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| PipelineError::fatal("clock", "system clock before the Unix epoch"))?
            .as_secs() as i64;
        let skew = now.saturating_sub(timestamp).unsigned_abs();
        if skew > self.clock_skew_tolerance.as_secs() {
            return Err(PipelineError::new(
                ErrorClass::Fatal,
                "stale_timestamp",
                format!(
                    "timestamp skew {skew}s exceeds tolerance {}s",
                    self.clock_skew_tolerance.as_secs()
                ),
            ));
        }
        Ok(())
    }
}

fn malformed(message: &str) -> PipelineError {
    PipelineError::new(ErrorClass::Fatal, "malformed", message)
}
