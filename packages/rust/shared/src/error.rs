//! Error types for PageLens.
//!
//! Library crates use [`PageLensError`] via `thiserror` for infrastructure
//! failures (config, storage, I/O). Each pipeline stage has its own small
//! error enum; those are recorded as data on the task instead of aborting it,
//! so only [`QnaError`] reaches callers as a [`PageLensError`].
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for PageLens infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum PageLensError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP client construction or transport error.
    #[error("network error: {0}")]
    Network(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, unknown task, invalid state).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// A task id that the store does not know about.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A follow-up question that could not be answered.
    #[error(transparent)]
    Qna(#[from] QnaError),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PageLensError>;

impl PageLensError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Categorized failure kind persisted alongside an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchTimeout,
    FetchUnreachable,
    FetchBlocked,
    ExtractionEmpty,
    ExtractionMalformedResponse,
    ExtractionServiceUnavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchTimeout => "fetch_timeout",
            Self::FetchUnreachable => "fetch_unreachable",
            Self::FetchBlocked => "fetch_blocked",
            Self::ExtractionEmpty => "extraction_empty",
            Self::ExtractionMalformedResponse => "extraction_malformed_response",
            Self::ExtractionServiceUnavailable => "extraction_service_unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page Fetcher failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetch timed out: {0}")]
    Timeout(String),

    #[error("page unreachable: {0}")]
    Unreachable(String),

    #[error("fetch blocked: {0}")]
    Blocked(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::FetchTimeout,
            Self::Unreachable(_) => FailureKind::FetchUnreachable,
            Self::Blocked(_) => FailureKind::FetchBlocked,
        }
    }
}

/// Extraction Engine failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no usable content: {0}")]
    Empty(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ExtractionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Empty(_) => FailureKind::ExtractionEmpty,
            Self::MalformedResponse(_) => FailureKind::ExtractionMalformedResponse,
            Self::ServiceUnavailable(_) => FailureKind::ExtractionServiceUnavailable,
        }
    }
}

/// Analysis Generator failure. Never fails the URL result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis incomplete: {0}")]
    Incomplete(String),

    #[error("model service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Comparison Engine failure. Never fails the task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComparisonError {
    #[error("malformed comparison response: {0}")]
    MalformedResponse(String),

    #[error("model service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// QnA Engine failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QnaError {
    #[error("no successful results to answer from")]
    NoData,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("malformed answer response: {0}")]
    MalformedResponse(String),

    #[error("model service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PageLensError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PageLensError::validation("unknown domain 'xyz'");
        assert!(err.to_string().contains("unknown domain"));
    }

    #[test]
    fn stage_errors_carry_kind_and_message() {
        let err = FetchError::Timeout("https://a.example after 30s".into());
        assert_eq!(err.kind(), FailureKind::FetchTimeout);
        assert_eq!(err.to_string(), "fetch timed out: https://a.example after 30s");

        let err = ExtractionError::MalformedResponse("expected a JSON object".into());
        assert_eq!(err.kind().as_str(), "extraction_malformed_response");
        assert!(err.to_string().starts_with("malformed model response"));
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::FetchBlocked).unwrap();
        assert_eq!(json, r#""fetch_blocked""#);
    }
}
