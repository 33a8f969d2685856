//! JSON error payloads for the HTTP surface.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    chatgate_instances::ErrorKind,
    serde_json::json,
    tracing::warn,
};

/// A failed request: `{"statusCode", "error", "message": [..]}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: Vec<String>,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: vec![message.into()],
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: Vec::new(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Prefix the detail with a caller-facing summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.message.insert(0, summary.into());
        self
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Protocol => StatusCode::BAD_GATEWAY,
        ErrorKind::Persistence | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
    }
}

impl From<chatgate_instances::Error> for ApiError {
    fn from(e: chatgate_instances::Error) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl From<chatgate_send::Error> for ApiError {
    fn from(e: chatgate_send::Error) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), message = ?self.message, "request failed");
        }
        let reason = self.status.canonical_reason().unwrap_or("Unknown Error");
        let body = if self.message.is_empty() {
            json!({ "statusCode": self.status.as_u16(), "error": reason })
        } else {
            json!({
                "statusCode": self.status.as_u16(),
                "error": reason,
                "message": self.message,
            })
        };
        (self.status, Json(body)).into_response()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Protocol), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::Persistence),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
    }

    #[test]
    fn instance_errors_keep_their_message() {
        let err = ApiError::from(chatgate_instances::Error::conflict("name taken"));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, vec!["name taken".to_string()]);
    }

    #[test]
    fn summary_goes_first() {
        let err = ApiError::bad_request("detail").with_summary("Unable to create instance");
        assert_eq!(err.message, vec![
            "Unable to create instance".to_string(),
            "detail".to_string()
        ]);
    }
}
