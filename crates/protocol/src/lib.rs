//! Protocol client capability: addressing, the outbound message model, the
//! occurrence catalogue and the client/factory traits a session backend
//! implements.

pub mod client;
pub mod error;
pub mod jid;
pub mod message;
pub mod occurrence;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    client::{
        ChatPresence, ChatPresenceMedia, ClientFactory, DeviceInfo, GroupInfo, GroupParticipant,
        MediaKind, OnWhatsApp, ProfilePictureInfo, ProtocolClient, SendOptions, SendResponse,
        UploadResponse,
    },
    error::{Error, Result},
    jid::{Jid, format_jid, formatted_br_number},
    message::{ContextInfo, Message},
    occurrence::{Occurrence, OccurrenceKind, QrEvent},
};
