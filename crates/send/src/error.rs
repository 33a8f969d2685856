use {chatgate_instances::ErrorKind, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    /// Instance lookup failed or the instance has no session.
    #[error(transparent)]
    Instance(#[from] chatgate_instances::Error),

    #[error("invalid recipient '{recipient}': {source}")]
    Recipient {
        recipient: String,
        #[source]
        source: chatgate_protocol::Error,
    },

    #[error("invalid quoted message: {message}")]
    InvalidQuote { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("failed to fetch group info for {jid}: {source}")]
    GroupInfo {
        jid: String,
        #[source]
        source: chatgate_protocol::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to fetch {url}: HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("refusing to fetch from {host}: it resolves to private address {ip}")]
    Blocked { host: String, ip: std::net::IpAddr },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("media upload failed: {0}")]
    Upload(#[source] chatgate_protocol::Error),

    #[error(transparent)]
    Protocol(#[from] chatgate_protocol::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_quote(message: impl Into<String>) -> Self {
        Self::InvalidQuote {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Fetch failures are blamed on the caller-supplied URL.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Instance(e) => e.kind(),
            Self::Recipient { .. }
            | Self::InvalidQuote { .. }
            | Self::Validation { .. }
            | Self::Fetch { .. }
            | Self::FetchStatus { .. }
            | Self::Blocked { .. }
            | Self::TooLarge { .. } => ErrorKind::Validation,
            Self::Protocol(chatgate_protocol::Error::InvalidJid { .. }) => ErrorKind::Validation,
            Self::GroupInfo { .. } | Self::Upload(_) | Self::Protocol(_) => ErrorKind::Protocol,
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
