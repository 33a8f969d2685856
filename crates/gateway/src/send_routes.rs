//! `/instance/{instance}/send/*` handlers.
//!
//! JSON bodies deserialize straight into the send contracts. The `-file`
//! variants take a multipart form: plain text fields for the options and
//! the upload itself in the `attachment` part.

use std::collections::HashMap;

use {
    axum::{
        Json,
        extract::{Multipart, Path, Query, State},
        http::StatusCode,
        response::IntoResponse,
    },
    chatgate_send::{
        AudioMessage, ContactMessage, EditMessage, LinkMessage, ListMessage, LocationMessage,
        MediaFile, MediaFileMessage, MediaMessage, MessageId, PollMessage, Presence, PtvMessage,
        ReactionMessage, TextMessage,
    },
    serde::Deserialize,
    serde_json::{Map, Value, json},
    tracing::debug,
};

use crate::{error::ApiError, extract::Body, state::AppState};

type ApiResult<T> = Result<T, ApiError>;

/// Maximum multipart upload size, also the route-level body limit.
pub const MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Name of the multipart part carrying the file.
pub const ATTACHMENT_FIELD: &str = "attachment";

fn created(id: MessageId) -> impl IntoResponse {
    (StatusCode::CREATED, Json(id))
}

/// `POST /instance/{instance}/send/text`
pub async fn text(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<TextMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.text(&instance, request).await?))
}

/// `POST /instance/{instance}/send/link-preview`
pub async fn link(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<LinkMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.link(&instance, request).await?))
}

/// `POST /instance/{instance}/send/media`
pub async fn media(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<MediaMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.media(&instance, request).await?))
}

/// `POST /instance/{instance}/send/audio`
pub async fn audio(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<AudioMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.audio(&instance, request).await?))
}

/// `POST /instance/{instance}/send/ptv`
pub async fn ptv(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<PtvMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.ptv(&instance, request).await?))
}

/// `POST /instance/{instance}/send/media-file`
pub async fn media_file(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (request, file) = read_form(multipart, None).await?;
    Ok(created(
        state.send.media_file(&instance, request, file).await?,
    ))
}

/// `POST /instance/{instance}/send/audio-file`
pub async fn audio_file(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (mut request, file) = read_form(multipart, None).await?;
    voice_presence_only(&mut request);
    Ok(created(
        state.send.audio_file(&instance, request, file).await?,
    ))
}

/// `POST /instance/{instance}/send/ptv-file`
pub async fn ptv_file(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (mut request, file) = read_form(multipart, Some("ptv")).await?;
    voice_presence_only(&mut request);
    Ok(created(state.send.ptv_file(&instance, request, file).await?))
}

/// `POST /instance/{instance}/send/location`
pub async fn location(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<LocationMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.location(&instance, request).await?))
}

/// `POST /instance/{instance}/send/contact`
pub async fn contact(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<ContactMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.contact(&instance, request).await?))
}

/// `POST /instance/{instance}/send/list`
pub async fn list(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<ListMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.list(&instance, request).await?))
}

/// `POST /instance/{instance}/send/poll`
pub async fn poll(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<PollMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.poll(&instance, request).await?))
}

/// `PATCH /instance/{instance}/send/reaction`
pub async fn reaction(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Body(request): Body<ReactionMessage>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.send.reaction(&instance, request).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditQuery {
    #[serde(default)]
    pub message_id: Option<String>,
}

/// `PATCH /instance/{instance}/send/edit?messageId=...`
pub async fn edit(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Query(query): Query<EditQuery>,
    Body(request): Body<EditMessage>,
) -> ApiResult<impl IntoResponse> {
    let Some(message_id) = query
        .message_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Err(ApiError::bad_request(
            "Query 'messageId' empty or not defined.",
        ));
    };
    Ok(created(
        state.send.edit(&instance, message_id, request).await?,
    ))
}

/// Voice notes only show the recording indicator, never "typing".
fn voice_presence_only(request: &mut MediaFileMessage) {
    if request.options.presence != Presence::Recording {
        request.options.presence = Presence::None;
    }
}

async fn read_form(
    mut multipart: Multipart,
    media_type: Option<&str>,
) -> ApiResult<(MediaFileMessage, MediaFile)> {
    let mut fields = HashMap::new();
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == ATTACHMENT_FIELD {
            let mimetype = field.content_type().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            file = Some(MediaFile {
                data,
                mimetype,
                file_name,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            fields.insert(name, value);
        }
    }

    let Some(file) = file else {
        return Err(ApiError::bad_request(format!(
            "multipart field '{ATTACHMENT_FIELD}' is required"
        )));
    };
    debug!(
        fields = fields.len(),
        size = file.data.len(),
        "multipart send form read"
    );
    Ok((form_request(&fields, media_type)?, file))
}

/// Assemble the JSON send contract from flat form fields. `media_type`
/// fills in `mediatype` for routes whose kind is fixed by the path.
fn form_request(
    fields: &HashMap<String, String>,
    media_type: Option<&str>,
) -> ApiResult<MediaFileMessage> {
    let field = |name: &str| {
        fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let mut options = Map::new();
    if let Some(id) = field("messageId") {
        options.insert("messageId".into(), json!(id));
    }
    if let Some(delay) = field("delay") {
        let delay: u64 = delay
            .parse()
            .map_err(|_| ApiError::bad_request("delay must be a non-negative integer"))?;
        options.insert("delay".into(), json!(delay));
    }
    if let Some(presence) = field("presence") {
        options.insert("presence".into(), json!(presence));
    }
    if let Some(attributes) = field("externalAttributes") {
        // Free text is kept as a string when it is not JSON.
        let value = serde_json::from_str::<Value>(attributes)
            .unwrap_or_else(|_| Value::String(attributes.to_string()));
        options.insert("externalAttributes".into(), value);
    }
    if let Some(hidden) = field("groupHiddenMention") {
        options.insert(
            "groupMention".into(),
            json!({ "hiddenMention": parse_flag(hidden) }),
        );
    }

    let mut body = Map::new();
    body.insert(
        "recipient".into(),
        json!(field("recipient").unwrap_or_default()),
    );
    body.insert("options".into(), Value::Object(options));
    if let Some(media_type) = field("mediatype").or(media_type) {
        let mut media = Map::new();
        media.insert("mediatype".into(), json!(media_type));
        if let Some(caption) = field("caption") {
            media.insert("caption".into(), json!(caption));
        }
        if let Some(filename) = field("filename") {
            media.insert("filename".into(), json!(filename));
        }
        if let Some(gif) = field("isGif") {
            media.insert("isGif".into(), json!(parse_flag(gif)));
        }
        body.insert("mediaMessage".into(), Value::Object(media));
    }

    serde_json::from_value(Value::Object(body)).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
