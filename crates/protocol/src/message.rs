//! Outbound message model.
//!
//! Mirrors the protocol's JSON message shape: exactly one content field is
//! set per message, with optional [`ContextInfo`] carried inside it.

use serde::{Deserialize, Serialize};

use crate::jid::Jid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptv_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_message: Option<LocationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_message: Option<ContactMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts_array_message: Option<ContactsArrayMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_message: Option<ListMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2: Option<FutureProofMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_creation_message_v3: Option<PollCreationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_message: Option<ReactionMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_message: Option<ProtocolMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<FutureProofMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_context_info: Option<MessageContextInfo>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }

    /// Context block of whichever content field is set.
    pub fn context_info(&self) -> Option<&ContextInfo> {
        if let Some(m) = &self.extended_text_message {
            return m.context_info.as_ref();
        }
        [
            &self.image_message,
            &self.video_message,
            &self.audio_message,
            &self.document_message,
            &self.sticker_message,
            &self.ptv_message,
        ]
        .into_iter()
        .flatten()
        .find_map(|m| m.context_info.as_ref())
        .or_else(|| {
            self.location_message
                .as_ref()
                .and_then(|m| m.context_info.as_ref())
        })
        .or_else(|| {
            self.contact_message
                .as_ref()
                .and_then(|m| m.context_info.as_ref())
        })
        .or_else(|| {
            self.contacts_array_message
                .as_ref()
                .and_then(|m| m.context_info.as_ref())
        })
        .or_else(|| {
            self.poll_creation_message_v3
                .as_ref()
                .and_then(|m| m.context_info.as_ref())
        })
    }
}

/// Reply linkage and mentions attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stanza_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<Box<Message>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_jid: Vec<String>,
}

impl ContextInfo {
    pub fn is_empty(&self) -> bool {
        self.stanza_id.is_none()
            && self.participant.is_none()
            && self.quoted_message.is_none()
            && self.mentioned_jid.is_empty()
    }

    /// `None` when nothing was resolved, so empty blocks never go on the wire.
    pub fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_type: Option<PreviewType>,
    /// Base64 JPEG thumbnail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpeg_thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreviewType {
    None,
    Video,
    Image,
}

/// Uploaded media descriptor, shared by image, video, audio, document,
/// sticker and ptv messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    pub url: String,
    pub direct_path: String,
    /// Base64 encoded keys and hashes from the upload.
    pub media_key: String,
    pub file_enc_sha256: String,
    pub file_sha256: String,
    pub file_length: u64,
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_playback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMessage {
    pub degrees_latitude: f64,
    pub degrees_longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMessage {
    pub display_name: String,
    pub vcard: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactsArrayMessage {
    pub display_name: String,
    pub contacts: Vec<ContactMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessage {
    pub title: String,
    pub description: String,
    pub button_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_text: Option<String>,
    pub list_type: ListType,
    pub sections: Vec<ListSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListType {
    #[default]
    SingleSelect,
    ProductList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRow {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub row_id: String,
}

/// Wrapper used by view-once and edit envelopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FutureProofMessage {
    pub message: Box<Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreationMessage {
    pub name: String,
    pub options: Vec<PollOption>,
    pub selectable_options_count: u32,
    /// Base64 poll encryption key.
    pub enc_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub option_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContextInfo {
    pub device_list_metadata_version: u32,
    /// Base64 secret shared with poll voters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_secret: Option<String>,
}

/// Identifies a previously sent or received message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionMessage {
    pub key: MessageKey,
    /// Empty text removes a previous reaction.
    pub text: String,
    pub sender_timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub key: MessageKey,
    #[serde(rename = "type")]
    pub kind: ProtocolMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Box<Message>>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessageKind {
    Revoke,
    MessageEdit,
}
