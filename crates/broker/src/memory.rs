//! Broker kept in process memory. Used when no AMQP URL is configured and
//! by tests that assert on what was published.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    broker::{Broker, PublishMeta},
    envelope::Envelope,
    error::{Error, Result},
};

const DEFAULT_CAPACITY: usize = 1024;

/// Keeps the most recent envelopes, oldest dropped first.
pub struct InMemoryBroker {
    published: Mutex<VecDeque<(String, Envelope)>>,
    declared: Mutex<Vec<String>>,
    capacity: usize,
    failing: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            published: Mutex::new(VecDeque::new()),
            declared: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            failing: AtomicBool::new(false),
        }
    }

    fn published_guard(&self) -> MutexGuard<'_, VecDeque<(String, Envelope)>> {
        self.published.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `(routing_key, envelope)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published_guard().iter().cloned().collect()
    }

    /// Envelopes published on `routing_key`.
    pub fn on(&self, routing_key: &str) -> Vec<Envelope> {
        self.published_guard()
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, env)| env.clone())
            .collect()
    }

    pub fn count(&self, routing_key: &str) -> usize {
        self.published_guard()
            .iter()
            .filter(|(key, _)| key == routing_key)
            .count()
    }

    pub fn len(&self) -> usize {
        self.published_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published_guard().is_empty()
    }

    pub fn declared(&self) -> Vec<String> {
        self.declared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make every publish fail, as an unreachable broker would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_topology(&self, routing_keys: &[&str]) -> Result<()> {
        let mut declared = self.declared.lock().unwrap_or_else(|e| e.into_inner());
        for key in routing_keys {
            if !declared.iter().any(|k| k == key) {
                declared.push((*key).to_string());
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        envelope: &Envelope,
        _meta: &PublishMeta,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::message("broker unavailable"));
        }
        let mut published = self.published_guard();
        if published.len() == self.capacity {
            published.pop_front();
        }
        published.push_back((routing_key.to_string(), envelope.clone()));
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chatgate_store::InstanceRecord, serde_json::json};

    #[tokio::test]
    async fn declare_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.declare_topology(&["a", "b"]).await.unwrap();
        broker.declare_topology(&["b", "c"]).await.unwrap();
        assert_eq!(broker.declared(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn capacity_drops_oldest() {
        let broker = InMemoryBroker::with_capacity(2);
        let rec = InstanceRecord::new("sales");
        for i in 0..3 {
            let env = Envelope::new("new.message", &rec, json!({ "n": i }));
            broker
                .publish("new.message", &env, &PublishMeta::default())
                .await
                .unwrap();
        }
        let seen: Vec<_> = broker.on("new.message").iter().map(|e| e.data["n"].clone()).collect();
        assert_eq!(seen, vec![json!(1), json!(2)]);
    }
}
