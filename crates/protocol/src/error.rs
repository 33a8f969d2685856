use thiserror::Error;

/// Failures reported by a protocol client.
#[derive(Debug, Error)]
pub enum Error {
    /// No stored device identity for the requested account.
    #[error("no device session stored for {account}")]
    DeviceNotFound { account: String },

    #[error("client is not connected")]
    NotConnected,

    #[error("invalid address '{value}': {reason}")]
    InvalidJid { value: String, reason: String },

    #[error("protocol request timed out: {operation}")]
    Timeout { operation: String },

    /// The remote side rejected the request.
    #[error("{operation} failed: {message}")]
    Rejected { operation: String, message: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_jid(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJid {
            value: value.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

