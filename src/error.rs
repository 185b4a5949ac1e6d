use thiserror::Error;

/// Everything that can go wrong between the chat view and its collaborators.
///
/// None of these are fatal: callers turn them into notifications and reset
/// their loading/playing flags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("nothing to send or speak")]
    EmptyInput,
    #[error("sign in required")]
    AuthRequired,
    #[error("upstream returned retryable status {status}")]
    TransientFailure { status: u16 },
    #[error("{0}")]
    SynthesisFailure(String),
    #[error("{0}")]
    PlaybackFailure(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BackendFailure(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendFailure(message.into())
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::SynthesisFailure(message.into())
    }

    pub fn playback(message: impl Into<String>) -> Self {
        Self::PlaybackFailure(message.into())
    }

    /// 429 and 5xx are worth one more attempt.
    pub fn is_transient_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::backend(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::backend(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
