//! Minimal transport seam decoupling adapters from the concrete HTTP client.
//!
//! The core only ever issues JSON POST requests whose responses are consumed
//! as byte streams (Server-Sent Events), so the trait surface is exactly
//! that. A [`reqwest`]-backed implementation lives in [`self::reqwest`];
//! tests substitute in-memory transports.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::LLMError;

/// JSON POST request shared across adapters.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request carrying a serialized JSON body.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsunagi_llm::http::HttpRequest;
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body,
            timeout: None,
        }
    }

    /// Replaces the request headers after construction.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Response whose body arrives as a stream of byte chunks.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Transport abstraction satisfied by the concrete HTTP client.
///
/// Implementations map network failures to [`LLMError::Transport`]; HTTP
/// error statuses are returned as regular responses so adapters can parse
/// the vendor error body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and returns the streaming response.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Serializes a body to JSON, attaches headers, and issues the request.
///
/// Centralizes serialization so adapters share one error path.
///
/// # Errors
///
/// Returns [`LLMError::Validation`] when serialization fails, otherwise
/// whatever the transport reports.
pub async fn post_json_stream<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
) -> Result<HttpStreamResponse, LLMError> {
    let payload = serde_json::to_vec(body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })?;
    let request = HttpRequest::post_json(url, payload).with_headers(headers);
    transport.send_stream(request).await
}

/// Collects a streaming body into a UTF-8 string.
///
/// Used to read vendor error bodies when a stream request comes back with a
/// non-success status.
pub async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    use futures_util::StreamExt;

    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to decode stream error body: {err}"),
    })
}

pub mod reqwest;

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use serde::ser;

    use super::*;

    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("send_stream should not be called");
        }
    }

    /// Body type that intentionally fails serialization.
    struct NonSerializableBody;

    impl Serialize for NonSerializableBody {
        fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            Err(ser::Error::custom("intentional serialization failure"))
        }
    }

    #[tokio::test]
    async fn serialization_failure_surfaces_before_any_network_call() {
        let result = post_json_stream(
            &PanicTransport,
            "http://example.com",
            HashMap::new(),
            &NonSerializableBody,
        )
        .await;
        match result {
            Err(LLMError::Validation { message }) => {
                assert!(message.contains("failed to serialize request"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_stream_text_joins_chunks() {
        let body: HttpBodyStream = Box::pin(stream::iter(vec![
            Ok(b"hello ".to_vec()),
            Ok(b"world".to_vec()),
        ]));
        let text = collect_stream_text(body, "test").await.expect("text");
        assert_eq!(text, "hello world");
    }
}
