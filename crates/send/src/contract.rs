//! Request and response shapes of the send endpoints.

use {
    bytes::Bytes,
    chatgate_protocol::{ChatPresence, ChatPresenceMedia, MediaKind},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Typing indicator shown while a delayed send waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    None,
    Composing,
    Recording,
}

impl Presence {
    /// Presence to emit before the delay, `None` when no indicator is wanted.
    pub fn indicator(self) -> Option<(ChatPresence, ChatPresenceMedia)> {
        match self {
            Self::None => None,
            Self::Composing => Some((ChatPresence::Composing, ChatPresenceMedia::Text)),
            Self::Recording => Some((ChatPresence::Composing, ChatPresenceMedia::Audio)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMention {
    #[serde(default)]
    pub hidden_mention: bool,
}

/// Per-request send options shared by every message shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Caller-chosen id for the outgoing message.
    pub message_id: Option<String>,
    /// Milliseconds to wait before sending.
    pub delay: u64,
    pub presence: Presence,
    /// Raw quote block; validated when the context is built.
    pub quoted_message: Option<Value>,
    pub group_mention: GroupMention,
    /// Echoed untouched in the outcome event.
    pub external_attributes: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub text_message: Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub link_message: Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Sticker,
    Document,
    Audio,
    Ptv,
}

impl MediaType {
    /// Blob class the upload is encrypted for.
    pub fn upload_kind(self) -> MediaKind {
        match self {
            Self::Image | Self::Sticker => MediaKind::Image,
            Self::Video | Self::Ptv => MediaKind::Video,
            Self::Audio => MediaKind::Audio,
            Self::Document => MediaKind::Document,
        }
    }
}

/// Descriptive attributes of a media message, shared by the URL and
/// upload variants.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttributes {
    #[serde(rename = "mediatype")]
    pub media_type: MediaType,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, rename = "isGif")]
    pub gif_playback: bool,
}

impl MediaAttributes {
    pub fn of(media_type: MediaType) -> Self {
        Self {
            media_type,
            caption: None,
            filename: None,
            gif_playback: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMedia {
    pub url: String,
    #[serde(flatten)]
    pub attributes: MediaAttributes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub media_message: UrlMedia,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlAudio {
    pub url: String,
}

/// Voice note sent from a URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub audio_message: UrlAudio,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPtv {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Round video note sent from a URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtvMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub ptv_message: UrlPtv,
}

/// JSON attributes accompanying an uploaded file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub media_message: Option<MediaAttributes>,
}

/// Raw bytes of an uploaded file.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub data: Bytes,
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub location_message: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub full_name: String,
    /// Digits only, used as the `waid`.
    pub raw_number: String,
    /// Display form of the number.
    pub phone_number: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub contact_message: Vec<Contact>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub row_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub title: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub button_text: String,
    #[serde(default)]
    pub footer_text: Option<String>,
    pub sections: Vec<Section>,
}

/// Interactive list. Kept for API compatibility; recent protocol versions
/// reject it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub list_message: List,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub name: String,
    pub options: Vec<String>,
    /// `0` means a single choice.
    #[serde(default)]
    pub selectable_options_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollMessage {
    pub recipient: String,
    #[serde(default)]
    pub options: Options,
    pub poll_message: Poll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKeyInput {
    pub chat_id: String,
    pub message_id: String,
    #[serde(default)]
    pub from_me: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    /// Empty removes an earlier reaction.
    #[serde(default)]
    pub reaction: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionMessage {
    pub recipient: String,
    pub message_key: MessageKeyInput,
    pub reaction_message: Reaction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub recipient: String,
    pub edit_message: Edit,
}

/// Returned as soon as a send is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageId {
    pub message_id: String,
}
