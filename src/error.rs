use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssistantError>;

/// Errors raised at the boundary between the assistant client and its backend.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("ticket unavailable: {0}")]
    TicketUnavailable(String),

    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AssistantError {
    pub fn storage(msg: impl Into<String>) -> Self {
        AssistantError::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AssistantError::Config(msg.into())
    }

    pub fn ticket(msg: impl Into<String>) -> Self {
        AssistantError::TicketUnavailable(msg.into())
    }
}
