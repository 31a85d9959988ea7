use thiserror::Error;

/// Failure delivering a payload to one recipient. The relay logs and skips
/// these; they never reach the sender or the other recipients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

impl SendFailure {
    pub fn metric_label(&self) -> &'static str {
        match self {
            SendFailure::QueueFull => "queue_full",
            SendFailure::Closed => "closed",
            SendFailure::Transport(_) => "transport",
        }
    }
}

/// A fault reported by the transport on an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection error: {message}")]
pub struct ConnectionError {
    message: String,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
