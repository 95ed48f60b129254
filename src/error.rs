//! Error types for docmark.
//!
//! Each core component owns one error enum, mirroring the component boundary:
//!
//! * [`ClassificationError`]: the input file cannot be classified. Never
//!   returned from `enqueue`; it becomes the recorded error of a job that is
//!   born `Failed`.
//! * [`CryptoError`]: vault failures. Always surfaced immediately, never
//!   retried.
//! * [`ProviderError`]: one failed backend attempt, already classified as
//!   retryable or fatal.
//! * [`OrchestratorError`]: illegal job operations.
//!
//! [`ErrorKind`] is the stable, serialisable code that front ends match on.
//! No variant ever carries an API key, passphrase or derived key.

use crate::queue::{JobEvent, JobId, JobState, Phase};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ── Classification ───────────────────────────────────────────────────────

/// The input classifier could not decide a document kind.
#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    /// File is missing, unreadable, or a `.pdf` without the `%PDF` signature.
    #[error("Cannot read '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// Extension outside {pdf, doc, docx}.
    #[error("Unsupported input '{path}'\nSupported types: .pdf, .doc, .docx")]
    UnsupportedKind { path: PathBuf },
}

impl ClassificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassificationError::Unreadable { .. } => ErrorKind::Unreadable,
            ClassificationError::UnsupportedKind { .. } => ErrorKind::UnsupportedKind,
        }
    }
}

// ── Vault ────────────────────────────────────────────────────────────────

/// Errors from the credential vault.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication failed. Deliberately covers both a wrong passphrase and
    /// any corruption of the envelope.
    #[error("Wrong passphrase or corrupt vault data")]
    WrongPassphraseOrCorruptData,

    /// Profile list could not be (de)serialised.
    #[error("Vault serialisation failed: {0}")]
    SerializationFailed(String),

    /// Key derivation or cipher setup failed (invalid KDF parameters).
    #[error("Vault cipher initialisation failed: {0}")]
    CipherInit(String),

    #[error("Passphrase must not be empty")]
    EmptyPassphrase,

    /// Two profiles share a name; nothing was written.
    #[error("Duplicate profile name '{name}'\nProfile names must be unique within a vault.")]
    DuplicateProfileName { name: String },

    #[error("Invalid profile '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },

    /// The session is locked (never unlocked, explicitly locked, or idle timeout).
    #[error("Vault is locked\nUnlock it again with the passphrase.")]
    Locked,

    #[error("No profile named '{name}' in the vault")]
    UnknownProfile { name: String },

    #[error("No enabled provider profile in the vault")]
    NoEnabledProfile,

    #[error("Vault file '{path}' could not be accessed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::Locked => ErrorKind::VaultLocked,
            CryptoError::UnknownProfile { .. } | CryptoError::NoEnabledProfile => {
                ErrorKind::NoActiveProfile
            }
            _ => ErrorKind::Vault,
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

/// One failed backend attempt.
///
/// `detail` strings are truncated response bodies with the API key redacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// HTTP 429. `retry_after_ms` mirrors a `Retry-After` header when present.
    #[error("Rate limited by provider")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Provider server error (HTTP {status}): {detail}")]
    ServerError { status: u16, detail: String },

    /// Timeout, refused or reset connection.
    #[error("Network failure: {detail}")]
    NetworkFailure { detail: String },

    #[error("Provider rejected credentials (HTTP {status})\nCheck the API key stored in the profile.")]
    AuthFailure { status: u16 },

    #[error("Provider rejected the request (HTTP {status}): {detail}")]
    BadRequest { status: u16, detail: String },

    #[error("Unparseable provider response: {detail}")]
    UnparseableResponse { detail: String },
}

impl ProviderError {
    /// Rate limits, 5xx and transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::ServerError { .. }
                | ProviderError::NetworkFailure { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::ServerError { .. } => ErrorKind::ServerError,
            ProviderError::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            ProviderError::AuthFailure { .. } => ErrorKind::AuthFailure,
            ProviderError::BadRequest { .. } => ErrorKind::BadRequest,
            ProviderError::UnparseableResponse { .. } => ErrorKind::UnparseableResponse,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// The event is not in the transition table for the job's current state.
    /// The job is left unchanged.
    #[error("Job {job}: '{event}' is not allowed while {from}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        event: JobEvent,
    },

    /// A phase used up every attempt on retryable errors.
    #[error("{phase} gave up after {attempts} attempts (last error: {last})")]
    RetriesExhausted {
        phase: Phase,
        attempts: u32,
        last: ErrorKind,
    },

    #[error("Unknown job {0}")]
    UnknownJob(JobId),

    /// Retry requested for a job whose failure was fatal; use a forced retry.
    #[error("Job {job} failed with a non-retryable error ({kind}); use a forced retry to override")]
    NotRetryable { job: JobId, kind: ErrorKind },
}

// ── Host capabilities ────────────────────────────────────────────────────

/// Failure reported by a host-supplied extractor or exporter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
    pub retryable: bool,
}

impl CapabilityError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<ProviderError> for CapabilityError {
    fn from(e: ProviderError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

// ── Config ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

// ── Error kinds ──────────────────────────────────────────────────────────

/// Stable error code attached to every job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unreadable,
    UnsupportedKind,
    Extraction,
    RateLimited,
    ServerError,
    NetworkFailure,
    AuthFailure,
    BadRequest,
    UnparseableResponse,
    Vault,
    VaultLocked,
    NoActiveProfile,
    Export,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unreadable => "unreadable",
            ErrorKind::UnsupportedKind => "unsupported_kind",
            ErrorKind::Extraction => "extraction",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::UnparseableResponse => "unparseable_response",
            ErrorKind::Vault => "vault",
            ErrorKind::VaultLocked => "vault_locked",
            ErrorKind::NoActiveProfile => "no_active_profile",
            ErrorKind::Export => "export",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Replace every occurrence of `secret` in `text` and cap its length.
///
/// Provider error bodies sometimes echo the request headers back; this keeps
/// the key out of anything that reaches a log or a job record.
pub(crate) fn redact(text: &str, secret: &str) -> String {
    const MAX_CHARS: usize = 800;
    let cleaned = if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "[REDACTED]")
    };
    if cleaned.chars().count() <= MAX_CHARS {
        return cleaned;
    }
    let mut out: String = cleaned.chars().take(MAX_CHARS).collect();
    out.push_str("…(truncated)");
    out
}
