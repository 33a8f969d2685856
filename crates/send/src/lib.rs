//! Send pipeline: request contracts, context resolution, media and link
//! preview fetching, message composition and the typing-simulated dispatch.

pub mod compose;
pub mod context;
pub mod contract;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod preview;
pub mod service;

pub use {
    contract::{
        AudioMessage, Contact, ContactMessage, EditMessage, LinkMessage, ListMessage,
        LocationMessage, MediaAttributes, MediaFile, MediaFileMessage, MediaMessage, MediaType,
        MessageId, Options, PollMessage, Presence, PtvMessage, ReactionMessage, TextMessage,
    },
    error::{Error, Result},
    fetch::Fetcher,
    service::{SendService, SendSettings},
};
