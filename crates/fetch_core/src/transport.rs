use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::types::{RequestOptions, ResponseParts};

/// Raw outcome of one transport call.
///
/// `execute` resolves once the response head has been received; the body
/// bytes carry their own result so a connection dropped mid-body stays a
/// body-decoding problem rather than a transport failure.
#[derive(Debug)]
pub struct TransportResponse {
    pub parts: ResponseParts,
    pub body: Result<Vec<u8>>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse>;
}

/// Default transport over a shared [`reqwest::Client`].
#[derive(Default)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, url: &str, options: &RequestOptions) -> Result<TransportResponse> {
        let mut request = self
            .http
            .request(options.method.clone(), url)
            .headers(options.headers.clone());
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let parts = ResponseParts {
            status: response.status(),
            url: response.url().clone(),
            headers: response.headers().clone(),
        };
        let body = response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .context("failed to read response body");

        Ok(TransportResponse { parts, body })
    }
}
