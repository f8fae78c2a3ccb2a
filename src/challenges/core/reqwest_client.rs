//! Reqwest-based implementation of the `UpstreamHttpClient` trait.
//!
//! Provides a thin adapter around `reqwest::Client` that converts between the
//! shared response representations used by the relay and the concrete
//! transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use http::HeaderMap;
use reqwest::Client;
use url::Url;

use super::{ChatResponse, ScriptResponse, TransportError, UpstreamHttpClient};

/// Reqwest-backed HTTP client shared by the challenge fetch and the chat call.
#[derive(Debug, Clone)]
pub struct ReqwestUpstreamClient {
    client: Client,
    timeout: Duration,
}

impl ReqwestUpstreamClient {
    /// Creates a cookie-keeping client. `timeout` bounds connection setup, the
    /// whole script fetch and the wait for chat response headers; streamed
    /// chat bodies are not time-limited.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl UpstreamHttpClient for ReqwestUpstreamClient {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<ScriptResponse, TransportError> {
        let response = self
            .client
            .get(url.as_str())
            .headers(headers.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        Ok(ScriptResponse { status, body })
    }

    async fn post_json(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> Result<ChatResponse, TransportError> {
        let request = self
            .client
            .post(url.as_str())
            .headers(headers.clone())
            .body(body)
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|err| TransportError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();

        Ok(ChatResponse {
            status,
            headers,
            body,
        })
    }
}
