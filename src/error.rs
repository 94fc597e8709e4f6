use std::sync::Arc;

/// Session-level error type used across all modules.
///
/// Every variant is `Clone` so errors can ride inside broadcast stream
/// events; wrapped causes are reference-counted for the same reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// The request was cancelled by the caller (or the transport reported a
    /// user-driven cancellation). Terminates the session via `abort` -> `end`,
    /// never via `error`.
    #[error("request was aborted")]
    Aborted,
    /// The model hit its length limit while the caller required structured
    /// output. Returning the truncated payload would silently hand back
    /// unparseable data, so accumulation stops here.
    #[error("length limit reached before structured output completed")]
    LengthFinishReason,
    /// A content filter ended the response while the caller required
    /// structured output.
    #[error("content filter triggered before structured output completed")]
    ContentFilterFinishReason,
    /// The upstream payload is not decodable (top-level SSE data that is not
    /// valid chunk JSON, or structured content that fails its final parse).
    #[error("invalid stream payload: {0}")]
    Payload(String),
    /// A "complete" snapshot is missing a field the finished shape requires.
    /// Indicates an invariant violation from the upstream provider.
    #[error("choice {index} is missing `{field}`")]
    MissingField { index: usize, field: String },
    /// The transport ended before any completion was assembled.
    #[error("stream ended without producing a chat completion")]
    EmptyStream,
    /// A second consumer tried to drain an event stream that is already
    /// being iterated.
    #[error("event stream is already being consumed; use tee() to split it into two cursors")]
    AlreadyConsumed,
    /// Anything unexpected, with the original error preserved as the cause.
    #[error("stream error: {message}")]
    Other {
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl StreamError {
    /// Wrap an arbitrary error, preserving it as the source.
    pub fn wrap<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StreamError::Other {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        StreamError::Other {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error represents user-initiated cancellation rather than
    /// a failure.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, StreamError::Aborted)
    }
}

/// Error reported by the transport boundary (the host HTTP layer's chunk
/// iterator). The core never performs the HTTP call itself; it only
/// classifies what the transport hands back.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Native cancellation-style failure. Interpreted as a user abort,
    /// not a generic error.
    #[error("transport read was cancelled")]
    Cancelled,
    /// Any other transport failure (connection reset, body error, ...).
    #[error("transport failure: {0}")]
    Failed(String),
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => StreamError::Aborted,
            TransportError::Failed(message) => StreamError::Other {
                message,
                source: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_cancellation_maps_to_abort() {
        let err: StreamError = TransportError::Cancelled.into();
        assert!(err.is_abort());
    }

    #[test]
    fn wrapped_error_preserves_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset");
        let err = StreamError::wrap(inner);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn missing_field_names_choice_and_field() {
        let err = StreamError::MissingField {
            index: 2,
            field: "finish_reason".to_string(),
        };
        assert_eq!(err.to_string(), "choice 2 is missing `finish_reason`");
    }
}
