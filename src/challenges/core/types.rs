//! Response representations shared by the transport seam and the relay.

use std::fmt;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::HeaderMap;

use super::transport::TransportError;

/// Live response body; errors are `io::Error` so the stream plugs straight
/// into `tokio_util::io::StreamReader`.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Fully buffered challenge-script response.
#[derive(Debug, Clone)]
pub struct ScriptResponse {
    pub status: u16,
    pub body: String,
}

impl ScriptResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Chat response whose body has not been read yet.
pub struct ChatResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl ChatResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body into a string, used for error responses only.
    pub async fn text(mut self) -> Result<String, TransportError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk.map_err(|err| TransportError::Transport(err.to_string()))?;
            buffer.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn text_concatenates_chunks() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"<title>Attention")),
            Ok(Bytes::from_static(b" Required!</title>")),
        ])
        .boxed();
        let response = ChatResponse {
            status: 403,
            headers: HeaderMap::new(),
            body,
        };
        assert!(!response.is_success());
        assert_eq!(
            response.text().await.unwrap(),
            "<title>Attention Required!</title>"
        );
    }
}
