//! Transport abstraction used for both outbound calls of the relay.
//!
//! The challenge-script GET is small and buffered; the chat POST hands back
//! the live body so the decoder can stream it.

use std::collections::HashMap;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use super::types::{ChatResponse, ScriptResponse};

/// Contract that abstracts the underlying HTTP transport.
///
/// Implementations should keep cookies between calls so the session looks
/// consistent to the vendor.
#[async_trait]
pub trait UpstreamHttpClient: Send + Sync {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<ScriptResponse, TransportError>;

    async fn post_json(
        &self,
        url: &Url,
        headers: &HeaderMap,
        body: Vec<u8>,
    ) -> Result<ChatResponse, TransportError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to convert header '{0}'")]
    InvalidHeader(String),
}

/// Converts a generated header set into an `http` header map.
pub fn convert_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
