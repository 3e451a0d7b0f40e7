//! Stage-error classification shared by every pipeline component.
//!
//! Every external-I/O stage (provider fetch, blob write, transcription,
//! analysis, CRM delivery) resolves its outcome to exactly one of these
//! classes. The orchestrator decides the next `Request` transition purely
//! from the class, never from the underlying cause.

use strum::AsRefStr;
use strum::EnumIter;

/// Metadata attached to each [`ErrorClass`].
#[derive(Debug, Clone, Copy)]
pub struct ClassMeta {
    /// Whether the orchestrator should schedule a retry for this class.
    pub retryable: bool,
    /// Whether a worker observing this class should emit a `warn`-level log
    /// (as opposed to the routine `info` used for expected outcomes like
    /// `Discard`).
    pub log_as_warning: bool,
}

macro_rules! define_classes {
    ($(
        $(#[$attr:meta])*
        $name:ident => { retryable: $retry:expr, log_as_warning: $warn:expr }
    ),* $(,)?) => {
        /// The six error classes of the pipeline's error taxonomy.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumIter)]
        pub enum ErrorClass {
            $($(#[$attr])* $name,)*
        }

        impl ErrorClass {
            /// Returns the metadata for this class.
            pub const fn meta(&self) -> ClassMeta {
                match self {
                    $(Self::$name => ClassMeta {
                        retryable: $retry,
                        log_as_warning: $warn,
                    },)*
                }
            }
        }
    };
}

define_classes! {
    /// Auth failure, schema violation, tenant disabled, unsupported input.
    /// Transitions the Request to `FAILED` immediately.
    Fatal => { retryable: false, log_as_warning: true },
    /// Provider returned not-found, or the event is intentionally
    /// out-of-scope. Transitions the Request to `DISCARDED`.
    Discard => { retryable: false, log_as_warning: false },
    /// Stage-specific non-fatal absence (e.g. unsupported audio format).
    /// The stage advances without writing its artifact.
    Skip => { retryable: false, log_as_warning: false },
    /// Network error, 5xx, timeout, rate-limit. Retried per the stage's
    /// retry policy.
    Transient => { retryable: true, log_as_warning: false },
    /// The Request's overall deadline was reached.
    /// Transitions to `FAILED` with `deadline_exceeded`.
    Deadline => { retryable: false, log_as_warning: true },
    /// The retry budget for this stage was exhausted.
    /// Transitions to `FAILED` with `max_attempts_exceeded`.
    Poisoned => { retryable: false, log_as_warning: true },
}

impl ErrorClass {
    /// Whether the orchestrator should schedule another attempt.
    pub const fn is_retryable(&self) -> bool {
        self.meta().retryable
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}
