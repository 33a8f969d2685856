//! Administrative instance routes and the per-instance session routes.

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
    },
    chatgate_instances::CreateInstance,
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use crate::{error::ApiError, extract::Body, state::AppState};

type ApiResult<T> = Result<T, ApiError>;

/// `POST /instance`
pub async fn create(
    State(state): State<AppState>,
    Body(request): Body<CreateInstance>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .instances
        .create(request)
        .await
        .map_err(|e| ApiError::from(e).with_summary("Unable to create instance"))?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /instance`
pub async fn find_all(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.instances.find_all().await?))
}

/// `GET /instance/{instance}`
pub async fn find(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.instances.find(&instance).await?))
}

/// `DELETE /instance/{instance}`
pub async fn delete(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.instances.delete(&instance).await?))
}

/// `GET /instance/{instance}/whatsapp/connect`
///
/// Starts pairing and answers with the first code, or the bare link state
/// when the session is already logged in.
pub async fn connect(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> ApiResult<impl IntoResponse> {
    info!(instance = %instance, "connection requested");
    let qr = state
        .instances
        .new_connection(&instance)
        .await
        .map_err(|e| ApiError::from(e).with_summary("The connection could not be completed."))?;
    Ok(Json(qr))
}

/// `PATCH /instance/{instance}/whatsapp/logout`
pub async fn logout(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .instances
        .logout(&instance)
        .await
        .map_err(|e| ApiError::from(e).with_summary("Unable to log out the instance."))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct GroupName {
    pub name: String,
}

/// `PATCH /instance/{instance}/whatsapp/group-name`
pub async fn group_name(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(body): Body<GroupName>,
) -> ApiResult<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    state
        .instances
        .update_group_name(&instance, &body.name)
        .await
        .map_err(|e| ApiError::from(e).with_summary("Unable to update name"))?;
    Ok(Json(json!({ "name": body.name })))
}

#[derive(Debug, Deserialize)]
pub struct Number {
    pub number: String,
}

/// `PATCH /instance/{instance}/whatsapp/number`
pub async fn number(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(body): Body<Number>,
) -> ApiResult<impl IntoResponse> {
    state.instances.update_number(&instance, &body.number).await?;
    Ok(Json(json!({ "number": body.number.trim() })))
}

#[derive(Debug, Deserialize)]
pub struct Numbers {
    pub numbers: Vec<String>,
}

/// `POST /instance/{instance}/chat/on-whatsapp`
pub async fn on_whatsapp(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(body): Body<Numbers>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .instances
            .is_on_whatsapp(&instance, &body.numbers)
            .await?,
    ))
}
