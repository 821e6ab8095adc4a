//! Error types for FeatureLens.
//!
//! Library crates use [`FeatureLensError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::{ContentResearch, EmbeddingKind};

/// Top-level error type for all FeatureLens operations.
#[derive(Debug, thiserror::Error)]
pub enum FeatureLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level network failure (connection refused, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// URL failed the allow-list, scheme, or duplicate check. A skip, not a fault.
    #[error("rejected {url}: {reason}")]
    ValidationRejected { url: String, reason: String },

    /// Fetch timed out after exhausting its attempts.
    #[error("timed out fetching {url} after {attempts} attempt(s)")]
    ScrapingTimeout { url: String, attempts: u32 },

    /// Server refused access. Permanent for the URL within a cycle.
    #[error("access denied for {url} (HTTP {status})")]
    AccessDenied { url: String, status: u16 },

    /// Any other non-2xx response.
    #[error("{url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// 2xx response with no usable body.
    #[error("{url}: empty response body")]
    EmptyBody { url: String },

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The extraction capability answered, but not in the requested schema.
    #[error("extraction schema error: {0}")]
    ExtractionSchema(String),

    /// The extraction capability failed (transport, timeout, provider error).
    #[error("extraction error: {0}")]
    Extraction(String),

    /// The embedding capability failed for one slot.
    #[error("embedding unavailable for {slot}: {message}")]
    EmbeddingUnavailable { slot: EmbeddingKind, message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Persisting a finished cycle failed. The in-memory result is still attached.
    #[error("failed to persist research for {feature_id}: {message}")]
    StoreWrite {
        feature_id: String,
        message: String,
        research: Box<ContentResearch>,
    },

    /// Another research cycle is already running for this feature.
    #[error("research cycle already in progress for {feature_id}")]
    CycleInProgress { feature_id: String },

    /// The feature source has no record for the requested id.
    #[error("feature not found: {feature_id}")]
    FeatureNotFound { feature_id: String },

    /// The cycle observed its cancellation signal.
    #[error("research cancelled")]
    Cancelled,

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid state transition, bad input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FeatureLensError>;

impl FeatureLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a rejection for `url`.
    pub fn rejected(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationRejected {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a fetch that failed with this error may be attempted again.
    ///
    /// Only timeout-class failures qualify. Status responses and other
    /// transport errors are final for the attempt sequence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ScrapingTimeout { .. })
    }

    /// Whether the failure should be remembered as permanent for the URL.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}
