use thiserror::Error;

/// Caller-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    /// The protocol client refused or failed the request.
    Protocol,
    Persistence,
    Forbidden,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("instance {identifier} not found")]
    NotFound { identifier: String },

    /// Known to the store but without a live session.
    #[error("instance '{name}' is not connected")]
    NotConnected { name: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error(transparent)]
    Protocol(#[from] chatgate_protocol::Error),

    #[error(transparent)]
    Store(#[from] chatgate_store::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::NotConnected { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::Store(chatgate_store::Error::Duplicate { .. }) => {
                ErrorKind::Conflict
            },
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Protocol(chatgate_protocol::Error::InvalidJid { .. }) => ErrorKind::Validation,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Store(_) => ErrorKind::Persistence,
            Self::Message { .. } => ErrorKind::Internal,
        }
    }
}

impl chatgate_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatgate_common::impl_context!();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_classify_as_conflict() {
        let err = Error::from(chatgate_store::Error::Duplicate {
            name: "sales".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn unknown_and_disconnected_are_both_not_found() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        let err = Error::NotConnected {
            name: "sales".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "instance 'sales' is not connected");
    }

    #[test]
    fn context_wraps_into_an_internal_message() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("failed to render QR code").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().starts_with("failed to render QR code: "));
    }

    #[test]
    fn protocol_failures_are_upstream_errors() {
        let err = Error::from(chatgate_protocol::Error::rejected("send", "boom"));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
