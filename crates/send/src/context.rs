//! Reply linkage and hidden group mentions attached to outgoing messages.

use {
    chatgate_protocol::{ContextInfo, Jid, Message, ProtocolClient},
    serde::Deserialize,
    serde_json::Value,
    tracing::debug,
};

use crate::{
    contract::Options,
    error::{Error, Result},
};

/// A validated quote block.
#[derive(Debug, Clone, PartialEq)]
pub struct Quoted {
    pub message_id: String,
    pub sender: String,
    pub message: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuoted {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    message: Option<Message>,
}

impl Quoted {
    /// Parse the caller's quote block. `null` means no quote; anything else
    /// must carry a message id, a sender and the quoted payload.
    pub fn parse(raw: Option<&Value>) -> Result<Option<Self>> {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let parsed: RawQuoted = serde_json::from_value(raw.clone())
            .map_err(|e| Error::invalid_quote(e.to_string()))?;

        let message_id = parsed
            .message_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_quote("messageId is required"))?;
        let sender = parsed
            .sender
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::invalid_quote("sender is required"))?;
        let message = parsed
            .message
            .ok_or_else(|| Error::invalid_quote("message is required"))?;

        Ok(Some(Self {
            message_id,
            sender,
            message,
        }))
    }
}

/// Build the context block for a message to `to`.
///
/// Group members are fetched only when a hidden mention was requested and
/// `to` is a group. Returns `None` when there is nothing to attach.
pub async fn build_context(
    client: &dyn ProtocolClient,
    to: &Jid,
    options: &Options,
) -> Result<Option<ContextInfo>> {
    let mut ctx = ContextInfo::default();

    if let Some(quoted) = Quoted::parse(options.quoted_message.as_ref())? {
        ctx.stanza_id = Some(quoted.message_id);
        ctx.participant = Some(quoted.sender);
        ctx.quoted_message = Some(Box::new(quoted.message));
    }

    if options.group_mention.hidden_mention && to.is_group() {
        let info = client
            .group_info(to)
            .await
            .map_err(|source| Error::GroupInfo {
                jid: to.to_string(),
                source,
            })?;
        debug!(group = %to, members = info.participants.len(), "mentioning group members");
        ctx.mentioned_jid = info
            .participants
            .iter()
            .map(|p| p.jid.to_string())
            .collect();
    }

    Ok(ctx.non_empty())
}
