//! Result types: the per-request [`ConversionOutcome`], its attempt log, and
//! the [`ConversionResponse`] body a request handler sends back.

use crate::error::{ConvertError, StatusClass, StrategyError};
use crate::kind::ConversionKind;
use crate::storage::{RequestId, StoredFile};
use serde::{Deserialize, Serialize};

/// What happened to one candidate of a strategy chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Precondition unmet; not attempted.
    Skipped { reason: String },
    Failed { error: StrategyError },
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    #[serde(flatten)]
    pub status: AttemptStatus,
    /// Zero for skipped candidates.
    pub duration_ms: u64,
}

impl StrategyAttempt {
    pub fn was_attempted(&self) -> bool {
        !matches!(self.status, AttemptStatus::Skipped { .. })
    }
}

/// A successful dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub request_id: RequestId,
    pub kind: ConversionKind,
    /// The single output file, already renamed into the Storage Area.
    pub output: StoredFile,
    /// Name of the strategy that produced `output`.
    pub strategy: String,
    /// Every candidate considered, in chain order, up to the winner.
    pub attempts: Vec<StrategyAttempt>,
    pub duration_ms: u64,
}

impl ConversionOutcome {
    pub fn file_name(&self) -> String {
        self.output.file_name()
    }
}

/// JSON body for the request handler, plus the status to send it with.
///
/// Success: `{"message", "download_url", "filename"}`. Failure: `{"error"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Success {
        message: String,
        download_url: String,
        filename: String,
    },
    Failure {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResponse {
    pub status: StatusClass,
    pub body: ResponseBody,
}

impl ConversionResponse {
    /// Map a dispatch result onto the collaborator contract.
    ///
    /// `public_base_url` must not end with `/`.
    pub fn from_result(
        result: &Result<ConversionOutcome, ConvertError>,
        public_base_url: &str,
    ) -> Self {
        match result {
            Ok(outcome) => {
                let filename = outcome.file_name();
                ConversionResponse {
                    status: StatusClass::Ok,
                    body: ResponseBody::Success {
                        message: "Conversion successful".to_string(),
                        download_url: format!("{public_base_url}/download/{filename}"),
                        filename,
                    },
                }
            }
            Err(e) => ConversionResponse {
                status: e.status_class(),
                body: ResponseBody::Failure {
                    error: e.to_string(),
                },
            },
        }
    }

    pub fn http_status(&self) -> u16 {
        self.status.http_status()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_else(|_| "{}".to_string())
    }
}
