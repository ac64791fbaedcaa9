use reqwest::StatusCode;
use thiserror::Error;

use crate::types::Payload;

/// Failures surfaced by a fetch controller. Cloneable so settled failures
/// can live in the replay cache alongside successful outcomes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("no url declared and none supplied to trigger")]
    MissingUrl,
    /// Response received with a non-success status; the decoded body rides
    /// along as the error payload.
    #[error("request settled with status {status}")]
    Status { status: StatusCode, payload: Payload },
    /// No response obtained at all.
    #[error("transport failure: {message}")]
    Transport { message: String },
}

impl FetchError {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            FetchError::Status { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
