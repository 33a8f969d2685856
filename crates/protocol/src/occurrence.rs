//! Occurrences emitted by a protocol client session.
//!
//! Each occurrence has a [`OccurrenceKind`] (the protocol library's event
//! type name on the wire) and a JSON payload. Payload shapes the gateway
//! inspects have typed views below; everything else is relayed as-is.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
};

use crate::jid::Jid;

macro_rules! occurrence_kinds {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// Every occurrence type a protocol client can emit.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OccurrenceKind {
            $($variant),+
        }

        impl OccurrenceKind {
            pub const ALL: &'static [OccurrenceKind] = &[$(OccurrenceKind::$variant),+];

            /// Wire name used by the protocol bridge.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(OccurrenceKind::$variant => $wire),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some(OccurrenceKind::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

occurrence_kinds! {
    AppState => "AppState",
    AppStateSyncComplete => "AppStateSyncComplete",
    Archive => "Archive",
    Blocklist => "Blocklist",
    BusinessName => "BusinessName",
    CallAccept => "CallAccept",
    CallOffer => "CallOffer",
    CallOfferNotice => "CallOfferNotice",
    CallPreAccept => "CallPreAccept",
    CallRelayLatency => "CallRelayLatency",
    CallTerminate => "CallTerminate",
    CallTransport => "CallTransport",
    ChatPresence => "ChatPresence",
    ClearChat => "ClearChat",
    ClientOutdated => "ClientOutdated",
    ConnectFailure => "ConnectFailure",
    Connected => "Connected",
    Contact => "Contact",
    DeleteChat => "DeleteChat",
    DeleteForMe => "DeleteForMe",
    Disconnected => "Disconnected",
    GroupInfo => "GroupInfo",
    HistorySync => "HistorySync",
    IdentityChange => "IdentityChange",
    JoinedGroup => "JoinedGroup",
    KeepAliveRestored => "KeepAliveRestored",
    KeepAliveTimeout => "KeepAliveTimeout",
    LabelAssociationChat => "LabelAssociationChat",
    LabelAssociationMessage => "LabelAssociationMessage",
    LabelEdit => "LabelEdit",
    LoggedOut => "LoggedOut",
    ManualLoginReconnect => "ManualLoginReconnect",
    MarkChatAsRead => "MarkChatAsRead",
    MediaRetry => "MediaRetry",
    MediaRetryError => "MediaRetryError",
    Message => "Message",
    Mute => "Mute",
    NewsletterJoin => "NewsletterJoin",
    NewsletterLeave => "NewsletterLeave",
    NewsletterLiveUpdate => "NewsletterLiveUpdate",
    NewsletterMessageMeta => "NewsletterMessageMeta",
    NewsletterMuteChange => "NewsletterMuteChange",
    OfflineSyncCompleted => "OfflineSyncCompleted",
    OfflineSyncPreview => "OfflineSyncPreview",
    PairError => "PairError",
    PairSuccess => "PairSuccess",
    PermanentDisconnect => "PermanentDisconnect",
    Picture => "Picture",
    Pin => "Pin",
    Presence => "Presence",
    PrivacySettings => "PrivacySettings",
    PushName => "PushName",
    PushNameSetting => "PushNameSetting",
    Qr => "QR",
    QrScannedWithoutMultidevice => "QRScannedWithoutMultidevice",
    Receipt => "Receipt",
    Star => "Star",
    StreamError => "StreamError",
    StreamReplaced => "StreamReplaced",
    TemporaryBan => "TemporaryBan",
    UnarchiveChatsSetting => "UnarchiveChatsSetting",
    UndecryptableMessage => "UndecryptableMessage",
    UnknownCallEvent => "UnknownCallEvent",
    UserAbout => "UserAbout",
    UserStatusMute => "UserStatusMute",
}

impl std::fmt::Display for OccurrenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event from a protocol client session.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub kind: OccurrenceKind,
    pub data: Value,
}

impl Occurrence {
    pub fn new(kind: OccurrenceKind, data: Value) -> Self {
        Self { kind, data }
    }

    /// Occurrence with no payload.
    pub fn bare(kind: OccurrenceKind) -> Self {
        Self::new(kind, Value::Null)
    }

    /// Decode an occurrence from the bridge's wire name. Unknown names yield
    /// `None`.
    pub fn from_wire(name: &str, data: Value) -> Option<Self> {
        OccurrenceKind::from_name(name).map(|kind| Self::new(kind, data))
    }

    /// Typed view of the payload. Missing fields fall back to defaults.
    pub fn payload<T: DeserializeOwned + Default>(&self) -> T {
        if self.data.is_null() {
            return T::default();
        }
        serde_json::from_value(self.data.clone()).unwrap_or_default()
    }
}

// ── Typed payload views ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ConnectedPayload {
    #[serde(alias = "jid")]
    pub jid: Option<Jid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ConnectFailurePayload {
    pub reason: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LoggedOutPayload {
    pub on_connect: bool,
    pub reason: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PairPayload {
    #[serde(rename = "ID")]
    pub id: Option<Jid>,
    pub business_name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PicturePayload {
    #[serde(rename = "JID")]
    pub jid: Option<Jid>,
    pub author: Option<Jid>,
    pub timestamp: Option<DateTime<Utc>>,
    pub remove: bool,
    #[serde(rename = "PictureID")]
    pub picture_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StreamErrorPayload {
    pub code: String,
    pub raw: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TemporaryBanPayload {
    pub code: i64,
    /// Seconds until the ban expires.
    pub expire: i64,
}

/// Human text for a connect-failure / logout reason code.
pub fn failure_reason_text(code: i64) -> String {
    match code {
        401 => "logged out from another device".into(),
        402 => "account temporarily banned".into(),
        403 => "account banned from the network".into(),
        405 => "client is out of date".into(),
        406 => "primary device was logged out".into(),
        409 => "client user agent was rejected".into(),
        413 => "client is using an unsupported platform".into(),
        500 => "unknown logout reason".into(),
        503 => "service unavailable".into(),
        _ => format!("unknown error ({code})"),
    }
}

/// Human text for a temporary-ban code.
pub fn temporary_ban_text(code: i64) -> String {
    match code {
        101 => "you sent too many messages to people who don't have you in their address books".into(),
        102 => "too many people blocked you".into(),
        103 => "you created too many groups with people who don't have you in their address books".into(),
        104 => "you sent the same message to too many people".into(),
        106 => "you sent too many messages to a broadcast list".into(),
        _ => format!("you may have violated the terms of service (code {code})"),
    }
}

/// Item on the QR pairing channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QrEvent {
    /// A fresh code to show the user.
    Code { code: String },
    Success,
    Timeout,
    Error { message: String },
}
