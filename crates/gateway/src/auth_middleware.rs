//! `apikey` guards.
//!
//! The global token opens every route. An instance's access key opens only
//! the routes under that instance. Send routes additionally require the
//! instance's live session to be logged in.

use std::collections::HashMap;

use {
    axum::{
        extract::{Path, Request, State},
        http::HeaderMap,
        middleware::Next,
        response::{IntoResponse, Response},
    },
    secrecy::ExposeSecret,
    tracing::{debug, warn},
};

use crate::{error::ApiError, state::AppState};

/// Header carrying the caller's key.
pub const API_KEY_HEADER: &str = "apikey";

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_global(state: &AppState, key: Option<&str>) -> bool {
    match &state.global_token {
        Some(token) => key.is_some_and(|k| k == token.expose_secret().as_str()),
        None => true,
    }
}

/// Admin routes: only the global token.
pub async fn require_global_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_global(&state, api_key(request.headers())) {
        return next.run(request).await;
    }
    warn!(path = %request.uri().path(), "invalid global apikey");
    ApiError::unauthorized().into_response()
}

/// Instance routes: the global token or the access key of `{instance}`.
pub async fn require_instance_key(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let key = api_key(request.headers());
    let Some(key) = key else {
        warn!(path = %request.uri().path(), "missing apikey");
        return ApiError::unauthorized().into_response();
    };
    if state.global_token.is_some() && is_global(&state, Some(key)) {
        return next.run(request).await;
    }

    let Some(identifier) = params.get("instance") else {
        return ApiError::unauthorized().into_response();
    };
    let record = match state.registry().context().store.read(identifier).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return ApiError::bad_request(format!("Invalid instance: {identifier}"))
                .into_response();
        },
        Err(e) => return ApiError::from(chatgate_instances::Error::from(e)).into_response(),
    };

    if record.access_key.as_deref() == Some(key) {
        return next.run(request).await;
    }
    warn!(instance = %record.name, "invalid instance apikey");
    ApiError::unauthorized().into_response()
}

/// Send routes: the instance must have a live, logged-in session.
pub async fn require_logged_in(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identifier) = params.get("instance") else {
        return ApiError::bad_request("instance is required").into_response();
    };
    match state.registry().get(identifier).await {
        Ok(instance) if instance.is_logged_in() => next.run(request).await,
        Ok(instance) => {
            debug!(instance = %instance.name(), "send refused, session not logged in");
            ApiError::forbidden(format!("Instance {identifier} not connected.")).into_response()
        },
        Err(chatgate_instances::Error::NotConnected { .. }) => {
            ApiError::forbidden(format!("Instance {identifier} not connected.")).into_response()
        },
        Err(e) => ApiError::from(e).into_response(),
    }
}
