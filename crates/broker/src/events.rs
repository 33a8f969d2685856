//! Routing keys published on the gateway exchange.

pub const APP_STATE: &str = "app.state";
pub const APP_STATE_SYNC_COMPLETE: &str = "app.state:sync-complete";
pub const APP_STATUS: &str = "app.status";
pub const ARCHIVE_CHAT: &str = "archive.chat";
pub const BLOCK_LIST: &str = "block.list";
pub const BUSINESS_NAME: &str = "profile.pushName:business";
pub const CALL_ACCEPT: &str = "call.accept";
pub const CALL_OFFER: &str = "call.offer";
pub const CALL_OFFER_NOTICE: &str = "call.offer:notice";
pub const CALL_PRE_ACCEPT: &str = "call.pre:accept";
pub const CALL_RELAY_LATENCY: &str = "call.relay:latency";
pub const CALL_TERMINATE: &str = "call.terminate";
pub const CALL_TRANSPORT: &str = "call.transport";
pub const CHAT_CLEAR: &str = "chat.clear";
pub const CHAT_DELETE: &str = "chat.delete";
pub const CHAT_MUTE: &str = "chat.mute";
pub const CHAT_PRESENCE: &str = "chat.presence";
pub const CLIENT_OUTDATED: &str = "client.outdated";
pub const CONNECT_FAILURE: &str = "connect.failure";
pub const CONNECTED: &str = "whatsapp.connected";
pub const CONNECTION_STREAM: &str = "connection.stream";
pub const CONTACT: &str = "contact.upsert";
pub const DELETE_FOR_ME: &str = "delete.for:me";
pub const DEVICE_PAIRING: &str = "device.paring";
pub const DISCONNECTED: &str = "websocket.disconnected";
pub const GROUP_INFO: &str = "group.info";
pub const HISTORY_SYNC: &str = "history.sync";
pub const IDENTITY_CHANGE: &str = "identity.change";
pub const INSTANCE_ERROR: &str = "instance.error";
pub const INSTANCE_STATUS: &str = "instance.status";
pub const KEEP_ALIVE_RESTORED: &str = "keep.alive:restored";
pub const KEEP_ALIVE_TIMEOUT: &str = "keep.alive:timeout";
pub const LABEL_ASSOCIATION_CHAT: &str = "label.association:chat";
pub const LABEL_ASSOCIATION_MESSAGE: &str = "label.association:message";
pub const LABEL_EDIT: &str = "label.edit";
pub const LOGGED_OUT: &str = "logged.out";
pub const MARK_CHAT_READ: &str = "mark.chat:read";
pub const MEDIA_RETRY: &str = "media.retry";
pub const MEDIA_RETRY_ERROR: &str = "media.retry:error";
pub const MESSAGE_STAR: &str = "message.star";
pub const NEW_MESSAGE: &str = "new.message";
pub const OFFLINE_SYNC_COMPLETED: &str = "offline.sync:completed";
pub const OFFLINE_SYNC_PREVIEW: &str = "offline.sync:preview";
pub const PICTURE: &str = "profile.picture";
pub const PINNED_CHAT: &str = "pinned.chat";
pub const PRESENCE: &str = "presence.update";
pub const PRIVACY_SETTINGS: &str = "privacy.settings";
pub const PUSH_NAME: &str = "profile.pushName";
pub const PUSH_NAME_SELF: &str = "profile.pushName:self";
pub const QR_CODE: &str = "qrcode.update";
pub const RECEIPT: &str = "message.update";
pub const SEND_MESSAGE: &str = "send.message";
pub const STATUS_BROADCAST: &str = "status.broadcast";
pub const TEMPORARY_BAN: &str = "temporary.ban";
pub const UNARCHIVE_CHAT_SETTINGS: &str = "chat.settings:archived";
pub const UNDECRYPTABLE_MESSAGE: &str = "undecryptable.message";
pub const UNKNOWN_CALL: &str = "unknown.call";
pub const USER_STATUS_MUTE: &str = "user.status:mute";

/// Every routing key bound to each consumer queue at startup.
pub const ALL: &[&str] = &[
    APP_STATE,
    APP_STATE_SYNC_COMPLETE,
    APP_STATUS,
    ARCHIVE_CHAT,
    BLOCK_LIST,
    BUSINESS_NAME,
    CALL_ACCEPT,
    CALL_OFFER,
    CALL_OFFER_NOTICE,
    CALL_PRE_ACCEPT,
    CALL_RELAY_LATENCY,
    CALL_TERMINATE,
    CALL_TRANSPORT,
    CHAT_CLEAR,
    CHAT_DELETE,
    CHAT_MUTE,
    CHAT_PRESENCE,
    CLIENT_OUTDATED,
    CONNECT_FAILURE,
    CONNECTED,
    CONNECTION_STREAM,
    CONTACT,
    DELETE_FOR_ME,
    DEVICE_PAIRING,
    DISCONNECTED,
    GROUP_INFO,
    HISTORY_SYNC,
    IDENTITY_CHANGE,
    INSTANCE_ERROR,
    INSTANCE_STATUS,
    KEEP_ALIVE_RESTORED,
    KEEP_ALIVE_TIMEOUT,
    LABEL_ASSOCIATION_CHAT,
    LABEL_ASSOCIATION_MESSAGE,
    LABEL_EDIT,
    LOGGED_OUT,
    MARK_CHAT_READ,
    MEDIA_RETRY,
    MEDIA_RETRY_ERROR,
    MESSAGE_STAR,
    NEW_MESSAGE,
    OFFLINE_SYNC_COMPLETED,
    OFFLINE_SYNC_PREVIEW,
    PICTURE,
    PINNED_CHAT,
    PRESENCE,
    PRIVACY_SETTINGS,
    PUSH_NAME,
    PUSH_NAME_SELF,
    QR_CODE,
    RECEIPT,
    SEND_MESSAGE,
    STATUS_BROADCAST,
    TEMPORARY_BAN,
    UNARCHIVE_CHAT_SETTINGS,
    UNDECRYPTABLE_MESSAGE,
    UNKNOWN_CALL,
    USER_STATUS_MUTE,
];
