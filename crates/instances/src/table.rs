//! Occurrence → routing key translation.
//!
//! Each mapped [`OccurrenceKind`] has a route: the routing key it is
//! published on and a transform producing the published payload plus the
//! state change it implies for the instance. Kinds without a route are
//! dropped.

use std::collections::HashMap;

use {
    chatgate_broker::events,
    chatgate_protocol::{
        Jid, Occurrence, OccurrenceKind,
        occurrence::{
            ConnectFailurePayload, ConnectedPayload, LoggedOutPayload, PairPayload,
            PicturePayload, StreamErrorPayload, TemporaryBanPayload, failure_reason_text,
            temporary_ban_text,
        },
    },
    chatgate_store::ConnectionStatus,
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::{Value, json},
};

/// Inputs a transform may read besides the occurrence.
#[derive(Debug, Clone)]
pub struct TranslateCtx {
    /// Link state before the occurrence is applied.
    pub connection: ConnectionStatus,
    pub now: DateTime<Utc>,
}

/// Instance-side consequence of an occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Session is up; the account is `jid` when the occurrence names it.
    Connected { jid: Option<Jid> },
    LoggedOut,
    /// Handshake refused; back to waiting.
    ConnectFailed,
    /// Link refused without a status change.
    Refused,
    Disconnected,
    /// Enrich the payload with the profile picture before publishing.
    FetchPicture { jid: Jid, picture_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub routing_key: &'static str,
    pub data: Value,
    pub effect: Effect,
}

impl Translation {
    fn publish(routing_key: &'static str, data: Value) -> Self {
        Self {
            routing_key,
            data,
            effect: Effect::None,
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }
}

pub type Transform = fn(&'static str, &Occurrence, &TranslateCtx) -> Translation;

#[derive(Clone, Copy)]
struct Route {
    routing_key: &'static str,
    transform: Transform,
}

/// Normalised link-state payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub status: ConnectionStatus,
    pub status_reason: i64,
    #[serde(rename = "Message", skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionUpdate {
    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Registered-handler dispatch table.
pub struct EventTable {
    routes: HashMap<OccurrenceKind, Route>,
}

impl EventTable {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Add or replace the route for `kind`.
    pub fn register(&mut self, kind: OccurrenceKind, routing_key: &'static str, transform: Transform) {
        self.routes.insert(kind, Route {
            routing_key,
            transform,
        });
    }

    /// Publish the payload unchanged on `routing_key`.
    pub fn relay(&mut self, kind: OccurrenceKind, routing_key: &'static str) {
        self.register(kind, routing_key, relay);
    }

    pub fn routing_key(&self, kind: OccurrenceKind) -> Option<&'static str> {
        self.routes.get(&kind).map(|r| r.routing_key)
    }

    pub fn is_mapped(&self, kind: OccurrenceKind) -> bool {
        self.routes.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// `None` for unmapped kinds. Mapped kinds always carry a payload; a
    /// bare occurrence publishes an empty object.
    pub fn translate(&self, occurrence: &Occurrence, ctx: &TranslateCtx) -> Option<Translation> {
        let route = self.routes.get(&occurrence.kind)?;
        let mut translation = (route.transform)(route.routing_key, occurrence, ctx);
        if translation.data.is_null() {
            translation.data = json!({});
        }
        Some(translation)
    }
}

impl Default for EventTable {
    fn default() -> Self {
        use OccurrenceKind as K;

        let mut table = Self::empty();
        for (kind, key) in [
            (K::AppState, events::APP_STATE),
            (K::AppStateSyncComplete, events::APP_STATE_SYNC_COMPLETE),
            (K::Archive, events::ARCHIVE_CHAT),
            (K::Blocklist, events::BLOCK_LIST),
            (K::BusinessName, events::BUSINESS_NAME),
            (K::CallAccept, events::CALL_ACCEPT),
            (K::CallOffer, events::CALL_OFFER),
            (K::CallOfferNotice, events::CALL_OFFER_NOTICE),
            (K::CallPreAccept, events::CALL_PRE_ACCEPT),
            (K::CallRelayLatency, events::CALL_RELAY_LATENCY),
            (K::CallTerminate, events::CALL_TERMINATE),
            (K::CallTransport, events::CALL_TRANSPORT),
            (K::ChatPresence, events::CHAT_PRESENCE),
            (K::ClearChat, events::CHAT_CLEAR),
            (K::Contact, events::CONTACT),
            (K::DeleteChat, events::CHAT_DELETE),
            (K::DeleteForMe, events::DELETE_FOR_ME),
            (K::GroupInfo, events::GROUP_INFO),
            (K::IdentityChange, events::IDENTITY_CHANGE),
            (K::LabelAssociationChat, events::LABEL_ASSOCIATION_CHAT),
            (K::LabelAssociationMessage, events::LABEL_ASSOCIATION_MESSAGE),
            (K::LabelEdit, events::LABEL_EDIT),
            (K::MarkChatAsRead, events::MARK_CHAT_READ),
            (K::MediaRetry, events::MEDIA_RETRY),
            (K::MediaRetryError, events::MEDIA_RETRY_ERROR),
            (K::Mute, events::CHAT_MUTE),
            (K::OfflineSyncCompleted, events::OFFLINE_SYNC_COMPLETED),
            (K::OfflineSyncPreview, events::OFFLINE_SYNC_PREVIEW),
            (K::Pin, events::PINNED_CHAT),
            (K::Presence, events::PRESENCE),
            (K::PrivacySettings, events::PRIVACY_SETTINGS),
            (K::PushName, events::PUSH_NAME),
            (K::PushNameSetting, events::PUSH_NAME_SELF),
            (K::Star, events::MESSAGE_STAR),
            (K::UnarchiveChatsSetting, events::UNARCHIVE_CHAT_SETTINGS),
            (K::UndecryptableMessage, events::UNDECRYPTABLE_MESSAGE),
            (K::UnknownCallEvent, events::UNKNOWN_CALL),
            (K::UserStatusMute, events::USER_STATUS_MUTE),
        ] {
            table.relay(kind, key);
        }

        table.register(K::ClientOutdated, events::CLIENT_OUTDATED, client_outdated);
        table.register(K::ConnectFailure, events::CONNECT_FAILURE, connect_failure);
        table.register(K::Connected, events::CONNECTED, connected);
        table.register(K::Disconnected, events::DISCONNECTED, disconnected);
        table.register(K::HistorySync, events::HISTORY_SYNC, history_sync);
        table.register(K::KeepAliveRestored, events::KEEP_ALIVE_RESTORED, keep_alive);
        table.register(K::KeepAliveTimeout, events::KEEP_ALIVE_TIMEOUT, keep_alive);
        table.register(K::LoggedOut, events::LOGGED_OUT, logged_out);
        table.register(K::Message, events::NEW_MESSAGE, message);
        table.register(K::PairError, events::DEVICE_PAIRING, pair_error);
        table.register(K::PairSuccess, events::DEVICE_PAIRING, pair_success);
        table.register(K::Picture, events::PICTURE, picture);
        table.register(K::Receipt, events::RECEIPT, receipt);
        table.register(K::StreamError, events::CONNECTION_STREAM, stream_error);
        table.register(K::StreamReplaced, events::CONNECTION_STREAM, stream_replaced);
        table.register(K::TemporaryBan, events::TEMPORARY_BAN, temporary_ban);
        table
    }
}

// ── Transforms ──────────────────────────────────────────────────────────────

fn relay(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    Translation::publish(key, occ.data.clone())
}

fn client_outdated(key: &'static str, _: &Occurrence, ctx: &TranslateCtx) -> Translation {
    let update = ConnectionUpdate {
        status: ConnectionStatus::Refused,
        status_reason: 409,
        message: "client user agent was rejected".into(),
        timestamp: ctx.now,
    };
    Translation::publish(key, update.to_value()).with_effect(Effect::Refused)
}

fn connect_failure(key: &'static str, occ: &Occurrence, ctx: &TranslateCtx) -> Translation {
    let p: ConnectFailurePayload = occ.payload();
    let update = ConnectionUpdate {
        status: ConnectionStatus::Refused,
        status_reason: p.reason,
        message: if p.message.is_empty() {
            failure_reason_text(p.reason)
        } else {
            p.message
        },
        timestamp: ctx.now,
    };
    Translation::publish(key, update.to_value()).with_effect(Effect::ConnectFailed)
}

fn connected(key: &'static str, occ: &Occurrence, ctx: &TranslateCtx) -> Translation {
    let p: ConnectedPayload = occ.payload();
    let update = ConnectionUpdate {
        status: ConnectionStatus::Open,
        status_reason: 200,
        message: "connected successfully".into(),
        timestamp: ctx.now,
    };
    Translation::publish(key, update.to_value()).with_effect(Effect::Connected { jid: p.jid })
}

fn disconnected(key: &'static str, _: &Occurrence, ctx: &TranslateCtx) -> Translation {
    let update = ConnectionUpdate {
        status: ctx.connection,
        status_reason: 401,
        message: String::new(),
        timestamp: ctx.now,
    };
    Translation::publish(key, update.to_value()).with_effect(Effect::Disconnected)
}

fn history_sync(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let data = occ.data.get("Data").cloned().unwrap_or_else(|| occ.data.clone());
    Translation::publish(key, data)
}

fn keep_alive(key: &'static str, occ: &Occurrence, ctx: &TranslateCtx) -> Translation {
    let kind = match occ.kind {
        OccurrenceKind::KeepAliveRestored => "restored",
        _ => "timeout",
    };
    Translation::publish(key, json!({ "Type": kind, "Timestamp": ctx.now }))
}

fn logged_out(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let p: LoggedOutPayload = occ.payload();
    Translation::publish(
        key,
        json!({
            "OnConnect": false,
            "Reason": p.reason,
            "Description": failure_reason_text(p.reason),
        }),
    )
    .with_effect(Effect::LoggedOut)
}

fn message(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let mut data = occ.data.clone();
    let chat = data
        .pointer("/Info/Chat")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(obj) = data.as_object_mut() {
        obj.remove("RawMessage");
    }
    let key = if chat == chatgate_protocol::jid::STATUS_BROADCAST {
        events::STATUS_BROADCAST
    } else {
        key
    };
    Translation::publish(key, data)
}

fn pair_error(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let p: PairPayload = occ.payload();
    Translation::publish(
        key,
        json!({
            "Type": "error",
            "ID": p.id,
            "BusinessName": p.business_name,
            "Error": p.error,
        }),
    )
    .with_effect(Effect::Refused)
}

fn pair_success(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let p: PairPayload = occ.payload();
    Translation::publish(
        key,
        json!({
            "Type": "success",
            "ID": p.id,
            "BusinessName": p.business_name,
        }),
    )
}

fn picture(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let p: PicturePayload = occ.payload();
    let data = json!({
        "JID": p.jid,
        "Author": p.author,
        "Timestamp": p.timestamp,
        "Remove": p.remove,
        "PictureID": p.picture_id,
    });
    let effect = match p.jid {
        Some(jid) if !p.remove => Effect::FetchPicture {
            jid,
            picture_id: p.picture_id,
        },
        _ => Effect::None,
    };
    Translation::publish(key, data).with_effect(effect)
}

fn receipt(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let mut data = occ.data.clone();
    if let Some(obj) = data.as_object_mut() {
        let empty = obj
            .get("Type")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty);
        if empty {
            obj.insert("Type".into(), json!("delivery-ack"));
        }
    }
    Translation::publish(key, data)
}

fn stream_error(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let p: StreamErrorPayload = occ.payload();
    Translation::publish(key, json!({ "Type": "error", "Code": p.code, "Info": p.raw }))
}

fn stream_replaced(key: &'static str, _: &Occurrence, _: &TranslateCtx) -> Translation {
    Translation::publish(
        key,
        json!({
            "Type": "replaced",
            "Code": "another client connected with the same session",
            "Info": { "Content": "conflict" },
        }),
    )
}

fn temporary_ban(key: &'static str, occ: &Occurrence, _: &TranslateCtx) -> Translation {
    let p: TemporaryBanPayload = occ.payload();
    Translation::publish(
        key,
        json!({
            "Code": p.code,
            "Expire": p.expire,
            "Message": temporary_ban_text(p.code),
        }),
    )
}
