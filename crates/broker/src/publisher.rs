use std::sync::Arc;

use {
    chatgate_store::InstanceRecord,
    secrecy::Secret,
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    broker::{Broker, PublishMeta},
    envelope::Envelope,
};

/// Fire-and-forget event publishing on top of a [`Broker`].
///
/// Failures are logged and dropped; callers never wait on broker health.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    global_webhook: Option<String>,
    meta: PublishMeta,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            global_webhook: None,
            meta: PublishMeta::default(),
        }
    }

    pub fn with_global_webhook(mut self, url: Option<String>) -> Self {
        self.global_webhook = url.filter(|u| !u.is_empty());
        self
    }

    pub fn with_license_key(mut self, key: Option<Secret<String>>) -> Self {
        self.meta.license_key = key;
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn envelope(&self, event: &str, instance: &InstanceRecord, data: Value) -> Envelope {
        Envelope::new(event, instance, data).with_global_webhook(self.global_webhook.clone())
    }

    /// Declare the exchange, queues and bindings. Logged on failure.
    pub async fn declare_topology(&self, routing_keys: &[&str]) -> bool {
        match self.broker.declare_topology(routing_keys).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to declare broker topology");
                false
            },
        }
    }

    /// Publish `data` on `routing_key`. A `null` payload publishes nothing.
    pub async fn publish(&self, routing_key: &str, instance: &InstanceRecord, data: Value) {
        if data.is_null() {
            debug!(routing_key, "skipping publish of empty payload");
            return;
        }
        let envelope = self.envelope(routing_key, instance, data);
        if let Err(e) = self.broker.publish(routing_key, &envelope, &self.meta).await {
            warn!(
                routing_key,
                instance = %instance.name,
                error = %e,
                "failed to publish event"
            );
        }
    }

    /// Like [`EventPublisher::publish`] without waiting for the broker.
    pub fn publish_detached(&self, routing_key: &'static str, instance: InstanceRecord, data: Value) {
        let publisher = self.clone();
        tokio::spawn(async move {
            publisher.publish(routing_key, &instance, data).await;
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::memory::InMemoryBroker, serde_json::json};

    fn publisher() -> (Arc<InMemoryBroker>, EventPublisher) {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = EventPublisher::new(broker.clone())
            .with_global_webhook(Some("https://hooks.example.com".into()));
        (broker, publisher)
    }

    #[tokio::test]
    async fn publish_wraps_payload_in_envelope() {
        let (broker, publisher) = publisher();
        let rec = InstanceRecord::new("sales");
        publisher
            .publish("instance.status", &rec, json!({"status": "created"}))
            .await;

        let sent = broker.on("instance.status");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].instance.id, rec.id);
        assert!(sent[0].instance.access_key.is_none());
        assert_eq!(sent[0].global_webhook.as_deref(), Some("https://hooks.example.com"));
    }

    #[tokio::test]
    async fn broker_failures_are_swallowed() {
        let (broker, publisher) = publisher();
        broker.set_failing(true);
        publisher
            .publish("new.message", &InstanceRecord::new("a"), json!({}))
            .await;
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn null_payload_is_not_published() {
        let (broker, publisher) = publisher();
        publisher
            .publish("new.message", &InstanceRecord::new("a"), Value::Null)
            .await;
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn detached_publish_eventually_lands() {
        let (broker, publisher) = publisher();
        publisher.publish_detached("instance.status", InstanceRecord::new("a"), json!({"status": "deleted"}));
        for _ in 0..50 {
            if broker.count("instance.status") == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("detached publish never arrived");
    }
}
