//! Typing-simulated delivery.
//!
//! The caller gets the message id back immediately. Presence, delay and
//! the protocol send run on a detached task, which publishes exactly one
//! outcome event when the send resolves.

use std::{sync::Arc, time::Duration};

use {
    chatgate_broker::{EventPublisher, events},
    chatgate_protocol::{
        ChatPresence, ChatPresenceMedia, Jid, Message, ProtocolClient, SendOptions,
    },
    chatgate_store::InstanceRecord,
    chrono::{DateTime, Utc},
    serde_json::{Value, json},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::contract::{Options, Presence};

/// Everything the detached task needs.
pub struct Outbound {
    pub instance: InstanceRecord,
    pub client: Arc<dyn ProtocolClient>,
    pub to: Jid,
    pub message: Message,
    pub delay: Duration,
    pub presence: Presence,
    pub external_attributes: Option<Value>,
}

impl Outbound {
    pub fn new(
        instance: InstanceRecord,
        client: Arc<dyn ProtocolClient>,
        to: Jid,
        message: Message,
        options: &Options,
    ) -> Self {
        Self {
            instance,
            client,
            to,
            message,
            delay: Duration::from_millis(options.delay),
            presence: options.presence,
            external_attributes: options.external_attributes.clone(),
        }
    }
}

/// The caller's id when non-empty, otherwise a fresh one.
pub fn message_id(options: &Options) -> String {
    options
        .message_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Schedule `outbound` and return its message id without waiting.
pub fn dispatch(publisher: &EventPublisher, outbound: Outbound, id: String) -> String {
    let publisher = publisher.clone();
    let task_id = id.clone();
    tokio::spawn(async move {
        deliver(&publisher, outbound, task_id).await;
    });
    id
}

/// Presence start, delay, presence stop, send, outcome event. No retry.
pub async fn deliver(publisher: &EventPublisher, outbound: Outbound, id: String) {
    let Outbound {
        instance,
        client,
        to,
        message,
        delay,
        presence,
        external_attributes,
    } = outbound;

    if !delay.is_zero() {
        let indicator = presence.indicator();
        if let Some((state, media)) = indicator {
            if let Err(e) = client.subscribe_presence(&to).await {
                warn!(instance = %instance.name, to = %to, error = %e, "presence subscription failed");
            }
            if let Err(e) = client.send_chat_presence(&to, state, media).await {
                warn!(instance = %instance.name, to = %to, error = %e, "failed to send presence");
            }
        }

        tokio::time::sleep(delay).await;

        if indicator.is_some()
            && let Err(e) = client
                .send_chat_presence(&to, ChatPresence::Paused, ChatPresenceMedia::Text)
                .await
        {
            warn!(instance = %instance.name, to = %to, error = %e, "failed to send presence");
        }
    }

    let echo = serde_json::to_value(&message).unwrap_or_default();
    let sent = client
        .send_message(&to, message, SendOptions {
            id: Some(id.clone()),
        })
        .await;

    let (routing_key, mut data) = match sent {
        Ok(resp) => {
            info!(instance = %instance.name, message_id = %resp.id, to = %to, "message sent");
            (events::SEND_MESSAGE, outcome(&resp.id, resp.timestamp, echo, None))
        },
        Err(e) => {
            warn!(instance = %instance.name, message_id = %id, to = %to, error = %e, "send failed");
            let description = e.to_string();
            (
                events::INSTANCE_ERROR,
                outcome(&id, Utc::now(), echo, Some(description)),
            )
        },
    };
    if let Some(attrs) = external_attributes
        && let Some(obj) = data.as_object_mut()
    {
        obj.insert("externalAttributes".into(), attrs);
    }

    debug!(routing_key, message_id = %id, "publishing send outcome");
    publisher.publish(routing_key, &instance, data).await;
}

fn outcome(id: &str, timestamp: DateTime<Utc>, message: Value, error: Option<String>) -> Value {
    let error = match error {
        Some(description) => json!({ "isError": true, "description": description }),
        None => json!({ "isError": false }),
    };
    json!({
        "sent": {
            "messageId": id,
            "timestamp": timestamp,
            "message": message,
        },
        "error": error,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chatgate_broker::InMemoryBroker,
        chatgate_protocol::testing::{Call, FakeClient},
    };

    fn setup() -> (Arc<InMemoryBroker>, EventPublisher, Arc<FakeClient>) {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = EventPublisher::new(broker.clone());
        (broker, publisher, Arc::new(FakeClient::paired("553111111111")))
    }

    fn outbound(client: &Arc<FakeClient>, options: &Options) -> Outbound {
        Outbound::new(
            InstanceRecord::new("sales"),
            client.clone(),
            Jid::user("553187654321"),
            Message::text("hello"),
            options,
        )
    }

    #[tokio::test]
    async fn no_delay_skips_presence() {
        let (broker, publisher, client) = setup();
        let options = Options {
            presence: Presence::Composing,
            ..Default::default()
        };
        deliver(&publisher, outbound(&client, &options), "ID1".into()).await;

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::SendMessage { id: Some(id), .. } if id == "ID1"));

        let sent = broker.on(events::SEND_MESSAGE);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data["sent"]["messageId"], "ID1");
        assert_eq!(sent[0].data["sent"]["message"]["conversation"], "hello");
        assert_eq!(sent[0].data["error"]["isError"], false);
    }

    #[tokio::test]
    async fn presence_wraps_the_delay_in_order() {
        let (_, publisher, client) = setup();
        let options = Options {
            delay: 20,
            presence: Presence::Recording,
            ..Default::default()
        };
        deliver(&publisher, outbound(&client, &options), "ID2".into()).await;

        let to = Jid::user("553187654321");
        let calls = client.calls();
        assert_eq!(calls[0], Call::SubscribePresence(to.clone()));
        assert_eq!(calls[1], Call::ChatPresence {
            jid: to.clone(),
            state: ChatPresence::Composing,
            media: ChatPresenceMedia::Audio,
        });
        assert_eq!(calls[2], Call::ChatPresence {
            jid: to,
            state: ChatPresence::Paused,
            media: ChatPresenceMedia::Text,
        });
        assert!(matches!(calls[3], Call::SendMessage { .. }));
    }

    #[tokio::test]
    async fn delay_without_presence_only_sleeps() {
        let (_, publisher, client) = setup();
        let options = Options {
            delay: 5,
            ..Default::default()
        };
        deliver(&publisher, outbound(&client, &options), "ID3".into()).await;
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn failure_publishes_error_outcome() {
        let (broker, publisher, client) = setup();
        client.fail("send_message");
        let options = Options {
            external_attributes: Some(json!({ "ticket": 7 })),
            ..Default::default()
        };
        deliver(&publisher, outbound(&client, &options), "ID4".into()).await;

        assert_eq!(broker.count(events::SEND_MESSAGE), 0);
        let failed = broker.on(events::INSTANCE_ERROR);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].data["sent"]["messageId"], "ID4");
        assert_eq!(failed[0].data["error"]["isError"], true);
        assert_eq!(failed[0].data["externalAttributes"]["ticket"], 7);
    }

    #[test]
    fn caller_id_wins_over_generated() {
        let options = Options {
            message_id: Some("MINE".into()),
            ..Default::default()
        };
        assert_eq!(message_id(&options), "MINE");
        let blank = Options {
            message_id: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(message_id(&blank).len(), 36);
    }
}
