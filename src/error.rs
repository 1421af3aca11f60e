use std::time::Duration;

use thiserror::Error;

use crate::types::AssistantMessage;

/// Aggregates every failure mode exposed by the unified call surface.
///
/// Errors split into two delivery channels: failures detected before dispatch
/// (`ApiMismatch`, `UnregisteredApi`, validation/auth problems) are returned
/// synchronously from [`crate::dispatch::stream`] and
/// [`crate::dispatch::complete`], while failures inside an open stream arrive
/// as the terminal [`crate::types::StreamEvent::Error`] event and as the
/// rejection of [`crate::stream::StreamHandle::result`].
#[derive(Debug, Error)]
pub enum LLMError {
    /// A model was routed to a provider registered under a different API.
    ///
    /// Always detected before any network interaction; never retried.
    #[error("mismatched api: {actual} expected {expected}")]
    ApiMismatch {
        /// API identifier the provider function was registered under.
        expected: String,
        /// API identifier declared by the model.
        actual: String,
    },
    /// No provider is registered for the model's API identifier.
    #[error("no api provider registered for {api}")]
    UnregisteredApi { api: String },
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Indicates that the provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Transport or vendor failure while a stream was open.
    ///
    /// Carries the partial message accumulated up to the failure point so
    /// callers can salvage or log whatever content already arrived.
    #[error("stream error: {message}")]
    Stream {
        message: String,
        /// Content accumulated before the failure, if a stream was open.
        partial: Option<Box<AssistantMessage>>,
    },
    /// Caller-initiated cancellation observed mid-stream.
    ///
    /// Distinguished from [`LLMError::Stream`] so callers can tell their own
    /// intent apart from vendor or network failure.
    #[error("request aborted: {message}")]
    Aborted {
        message: String,
        /// Content accumulated before the abort, if a stream was open.
        partial: Option<Box<AssistantMessage>>,
    },
    /// A tool call's accumulated argument payload failed the strict parse at
    /// block close. Mid-stream fragments are allowed to be invalid JSON; the
    /// finished block is not.
    #[error("malformed tool arguments for {name}: {message}")]
    MalformedToolArguments { name: String, message: String },
    /// Wraps provider-defined errors that cannot be normalized.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// API identifier of the provider, such as `kimi-messages`.
        provider: &'static str,
        /// Human-readable error message returned by the provider.
        message: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsunagi_llm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsunagi_llm::error::LLMError;
    ///
    /// let err = LLMError::provider("kimi-messages", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Provider { provider: "kimi-messages", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Stream`] without attached partial content.
    pub fn stream<T: Into<String>>(message: T) -> Self {
        Self::Stream {
            message: message.into(),
            partial: None,
        }
    }

    /// Returns the partial message attached to a terminal stream failure.
    ///
    /// `None` for errors raised before a stream was open.
    pub fn partial(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Stream { partial, .. } | Self::Aborted { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}
