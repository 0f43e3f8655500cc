//! Error types for the edgequake-convert library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`]: **Surfaced**: the request cannot be served (unknown
//!   conversion kind, no files, every strategy failed). Returned as
//!   `Err(ConvertError)` from [`crate::convert::Converter`].
//!
//! * [`StrategyError`]: **Per attempt**: one strategy could not run or
//!   failed, but the chain may still succeed with the next candidate.
//!   Recorded in [`crate::output::StrategyAttempt`] and only surfaced as the
//!   `last_error` of [`ConvertError::ConversionFailed`] once the chain is
//!   exhausted.
//!
//! [`StatusClass`] maps every surfaced error onto the HTTP-style status a
//! request handler should answer with.

use crate::kind::ConversionKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned across the public API.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Client errors ─────────────────────────────────────────────────────
    /// The conversion-kind token is not one we know.
    #[error("Unsupported conversion type '{token}'")]
    UnsupportedConversionKind { token: String },

    /// No file (or an unnamed file) was supplied where one is required.
    #[error("No file uploaded for '{kind}'")]
    MissingInput { kind: ConversionKind },

    /// A single-input kind received several files.
    #[error("'{kind}' accepts exactly one file, got {count}")]
    TooManyInputs { kind: ConversionKind, count: usize },

    /// A parameter the kind requires was not provided.
    #[error("'{kind}' requires the '{name}' parameter")]
    MissingParameter {
        kind: ConversionKind,
        name: &'static str,
    },

    /// A parameter was provided but cannot be used.
    #[error("Invalid value '{value}' for '{name}': {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// The uploaded bytes are not what the kind expects.
    #[error("File '{name}' is not a valid {expected}")]
    InvalidInput { name: String, expected: &'static str },

    /// Total upload size exceeds the configured ceiling.
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// A stored file was requested that does not exist (or never could).
    #[error("File '{name}' not found")]
    NotFound { name: String },

    // ── Server errors ─────────────────────────────────────────────────────
    /// Every strategy in the chain was skipped or failed.
    #[error("Conversion '{kind}' failed after {attempted} attempt(s): {last_error}")]
    ConversionFailed {
        kind: ConversionKind,
        attempted: usize,
        last_error: StrategyError,
    },

    /// Reading or writing the Storage Area failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The Sweeper could not delete an expired file. Logged, never returned
    /// to a request.
    #[error("Failed to delete '{path}': {source}")]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Storage {
            path: path.into(),
            source,
        }
    }

    /// The status class a request handler should respond with.
    pub fn status_class(&self) -> StatusClass {
        match self {
            ConvertError::UnsupportedConversionKind { .. }
            | ConvertError::MissingInput { .. }
            | ConvertError::TooManyInputs { .. }
            | ConvertError::MissingParameter { .. }
            | ConvertError::InvalidParameter { .. }
            | ConvertError::InvalidInput { .. } => StatusClass::BadRequest,
            ConvertError::PayloadTooLarge { .. } => StatusClass::PayloadTooLarge,
            ConvertError::NotFound { .. } => StatusClass::NotFound,
            ConvertError::ConversionFailed { .. }
            | ConvertError::Storage { .. }
            | ConvertError::CleanupFailed { .. }
            | ConvertError::InvalidConfig(_)
            | ConvertError::Internal(_) => StatusClass::ServerError,
        }
    }

    /// `true` for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_class() != StatusClass::ServerError
    }
}

/// A non-fatal error for a single strategy attempt.
///
/// The chain records it and moves on to the next candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyError {
    /// The strategy's host precondition does not hold (missing binary,
    /// missing library, unsupported option). A skip, not a failure.
    #[error("{strategy}: unavailable ({reason})")]
    Unavailable { strategy: String, reason: String },

    /// The strategy ran and failed.
    #[error("{strategy}: {detail}")]
    Failed { strategy: String, detail: String },

    /// The strategy did not finish within the per-attempt timeout.
    #[error("{strategy}: timed out after {secs}s")]
    Timeout { strategy: String, secs: u64 },
}

impl StrategyError {
    pub fn failed(strategy: impl Into<String>, detail: impl ToString) -> Self {
        StrategyError::Failed {
            strategy: strategy.into(),
            detail: detail.to_string(),
        }
    }

    pub fn unavailable(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        StrategyError::Unavailable {
            strategy: strategy.into(),
            reason: reason.into(),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, StrategyError::Unavailable { .. })
    }
}

/// HTTP-style status class of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Ok,
    BadRequest,
    PayloadTooLarge,
    NotFound,
    ServerError,
}

impl StatusClass {
    pub fn http_status(self) -> u16 {
        match self {
            StatusClass::Ok => 200,
            StatusClass::BadRequest => 400,
            StatusClass::PayloadTooLarge => 413,
            StatusClass::NotFound => 404,
            StatusClass::ServerError => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_kind_is_bad_request() {
        let e = ConvertError::UnsupportedConversionKind {
            token: "pdf-to-pptx".into(),
        };
        assert_eq!(e.status_class(), StatusClass::BadRequest);
        assert_eq!(e.status_class().http_status(), 400);
        assert!(e.to_string().contains("pdf-to-pptx"));
    }

    #[test]
    fn conversion_failed_is_server_error_and_keeps_cause() {
        let e = ConvertError::ConversionFailed {
            kind: ConversionKind::WordToPdf,
            attempted: 2,
            last_error: StrategyError::failed("html-render", "document.xml missing"),
        };
        assert_eq!(e.status_class(), StatusClass::ServerError);
        assert!(!e.is_client_error());
        let msg = e.to_string();
        assert!(msg.contains("word-to-pdf"), "got: {msg}");
        assert!(msg.contains("document.xml missing"), "got: {msg}");
    }

    #[test]
    fn payload_too_large_maps_to_413() {
        let e = ConvertError::PayloadTooLarge {
            size: 60,
            limit: 50,
        };
        assert_eq!(e.status_class().http_status(), 413);
        assert!(e.is_client_error());
    }

    #[test]
    fn timeout_display() {
        let e = StrategyError::Timeout {
            strategy: "libreoffice".into(),
            secs: 120,
        };
        assert!(e.to_string().contains("120s"));
        assert!(!e.is_skip());
    }

    #[test]
    fn unavailable_is_skip() {
        let e = StrategyError::unavailable("unoconv", "not installed");
        assert!(e.is_skip());
        assert!(e.to_string().contains("not installed"));
    }
}
