use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Missing credentials, unknown model, rejected request. Not retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure before any text arrived.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        retryable: bool,
        cause: Option<String>,
    },

    /// The stream outlived the hard ceiling.
    #[error("Stream exceeded {limit_secs}s without finishing")]
    Timeout { limit_secs: u64, partial_text: String },

    /// The server emitted an error event.
    #[error("Server error: {message}")]
    Server { message: String, partial_text: String },
}

impl StreamError {
    pub fn transport(message: impl Into<String>, cause: Option<String>) -> Self {
        StreamError::Transport {
            message: message.into(),
            retryable: true,
            cause,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Transport { retryable: true, .. })
    }

    /// Text generated before the failure, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            StreamError::Timeout { partial_text, .. } | StreamError::Server { partial_text, .. }
                if !partial_text.is_empty() =>
            {
                Some(partial_text)
            }
            _ => None,
        }
    }
}
