use std::{fmt, str::FromStr, sync::Arc};

use reqwest::{
    header::{HeaderMap, HeaderValue, IntoHeaderName},
    Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchError;

/// Strategy used to parse a response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    #[default]
    Json,
    Text,
    Bytes,
}

impl DecodeMode {
    /// Decode `body` according to the mode. A failure does not propagate:
    /// a malformed-but-received body is still a settled outcome, carried as
    /// [`Payload::Undecodable`].
    pub fn decode(self, body: &[u8]) -> Payload {
        match self {
            DecodeMode::Json => match serde_json::from_slice(body) {
                Ok(value) => Payload::Json(value),
                Err(err) => Payload::Undecodable(DecodeError {
                    mode: self,
                    reason: err.to_string(),
                }),
            },
            DecodeMode::Text => match String::from_utf8(body.to_vec()) {
                Ok(text) => Payload::Text(text),
                Err(err) => Payload::Undecodable(DecodeError {
                    mode: self,
                    reason: err.to_string(),
                }),
            },
            DecodeMode::Bytes => Payload::Bytes(body.to_vec()),
        }
    }
}

impl FromStr for DecodeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "json" => Ok(DecodeMode::Json),
            "text" => Ok(DecodeMode::Text),
            "bytes" => Ok(DecodeMode::Bytes),
            other => Err(format!("unknown decode mode '{other}'")),
        }
    }
}

/// Why a body failed to decode under a given [`DecodeMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub mode: DecodeMode,
    pub reason: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body is not valid {:?}: {}", self.mode, self.reason)
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
    /// Decoding failed; the failure itself is the payload.
    Undecodable(DecodeError),
}

/// Status line, final URL, and headers of a received response. The body is
/// consumed during decoding and travels in the payload instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub url: Url,
    pub headers: HeaderMap,
}

impl ResponseParts {
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Fetch-style request init: method, headers, optional body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl IntoHeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Request options supplied either directly or as a thunk.
///
/// A `Deferred` thunk runs at the moment a request is issued, never at
/// declaration time, so side effects such as reading a fresh token happen at
/// call time. It is evaluated exactly once per issuance.
#[derive(Clone)]
pub enum OptionsSource {
    Literal(RequestOptions),
    Deferred(Arc<dyn Fn() -> RequestOptions + Send + Sync>),
}

impl OptionsSource {
    pub fn deferred(thunk: impl Fn() -> RequestOptions + Send + Sync + 'static) -> Self {
        OptionsSource::Deferred(Arc::new(thunk))
    }

    pub fn resolve(&self) -> RequestOptions {
        match self {
            OptionsSource::Literal(options) => options.clone(),
            OptionsSource::Deferred(thunk) => thunk(),
        }
    }
}

impl Default for OptionsSource {
    fn default() -> Self {
        OptionsSource::Literal(RequestOptions::default())
    }
}

impl From<RequestOptions> for OptionsSource {
    fn from(options: RequestOptions) -> Self {
        OptionsSource::Literal(options)
    }
}

impl fmt::Debug for OptionsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsSource::Literal(options) => f.debug_tuple("Literal").field(options).finish(),
            OptionsSource::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// The declared request descriptor: what would be fetched. Snapshots carry
/// it without evaluating a deferred options thunk.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: Option<String>,
    pub options: OptionsSource,
}

/// Externally observed request state.
///
/// `loading` is `None` before any request has started. After any settled
/// request exactly one of `data`/`error` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchState {
    pub loading: Option<bool>,
    pub data: Option<Payload>,
    pub error: Option<FetchError>,
    pub response: Option<ResponseParts>,
}

impl FetchState {
    pub fn is_settled(&self) -> bool {
        self.loading == Some(false)
    }
}

/// One observed transition: the declaration in force and the state that
/// accompanies it.
#[derive(Debug, Clone)]
pub struct FetchSnapshot {
    pub request: FetchRequest,
    pub state: FetchState,
}
