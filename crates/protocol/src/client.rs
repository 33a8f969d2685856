//! The protocol client capability consumed by the gateway.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use crate::{
    error::Result,
    jid::Jid,
    message::{FutureProofMessage, Message, MessageKey, ProtocolMessage, ProtocolMessageKind},
    occurrence::{Occurrence, QrEvent},
};

/// Blob class for uploads; decides the encryption info the protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// Result of a blob upload, referenced by the media message descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub direct_path: String,
    pub media_key: String,
    pub file_enc_sha256: String,
    pub file_sha256: String,
    pub file_length: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Caller-chosen message id; the client generates one when absent.
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipant {
    pub jid: Jid,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub jid: Jid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePictureInfo {
    pub url: String,
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub direct_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPresence {
    Composing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPresenceMedia {
    Text,
    Audio,
}

/// Answer for one number of an existence check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnWhatsApp {
    pub query: String,
    pub jid: Option<Jid>,
    pub exists: bool,
}

/// Live facts about the session's device, refreshed by the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    /// Present once the device is paired.
    pub id: Option<Jid>,
    pub push_name: Option<String>,
    pub last_successful_connect: Option<DateTime<Utc>>,
}

/// One protocol session bound to one device identity.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the link. With no paired device this starts pairing and codes
    /// arrive on [`ProtocolClient::qr_channel`].
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    fn device(&self) -> DeviceInfo;

    /// Pairing codes for an unpaired device. Must be requested before
    /// [`ProtocolClient::connect`].
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>>;

    /// Occurrence stream. Yields the receiver once; later calls get `None`.
    fn take_events(&self) -> Option<mpsc::Receiver<Occurrence>>;

    async fn send_message(
        &self,
        to: &Jid,
        message: Message,
        options: SendOptions,
    ) -> Result<SendResponse>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadResponse>;

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo>;

    async fn profile_picture_info(
        &self,
        jid: &Jid,
        existing_id: Option<&str>,
    ) -> Result<Option<ProfilePictureInfo>>;

    async fn subscribe_presence(&self, jid: &Jid) -> Result<()>;

    async fn send_chat_presence(
        &self,
        jid: &Jid,
        state: ChatPresence,
        media: ChatPresenceMedia,
    ) -> Result<()>;

    async fn set_group_name(&self, jid: &Jid, name: &str) -> Result<()>;

    async fn logout(&self) -> Result<()>;

    async fn is_on_whatsapp(&self, phones: &[String]) -> Result<Vec<OnWhatsApp>>;

    /// Wrap `content` as an edit of message `id` previously sent to `chat`.
    fn build_edit(&self, chat: &Jid, id: &str, content: Message) -> Message {
        Message {
            edited_message: Some(FutureProofMessage {
                message: Box::new(Message {
                    protocol_message: Some(ProtocolMessage {
                        key: MessageKey {
                            remote_jid: chat.clone(),
                            from_me: true,
                            id: id.to_string(),
                            participant: None,
                        },
                        kind: ProtocolMessageKind::MessageEdit,
                        edited_message: Some(Box::new(content)),
                        timestamp_ms: Utc::now().timestamp_millis(),
                    }),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }
    }
}

/// Produces sessions for instances.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// A client bound to a fresh, unpaired device identity.
    async fn new_session(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>>;

    /// A client bound to the stored device for `number`. Fails with
    /// [`crate::Error::DeviceNotFound`] when no device is stored.
    async fn load_session(&self, session_id: &str, number: &str)
    -> Result<Arc<dyn ProtocolClient>>;
}
