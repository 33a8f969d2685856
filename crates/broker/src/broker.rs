use {async_trait::async_trait, secrecy::Secret};

use crate::{envelope::Envelope, error::Result};

/// Per-publish metadata that travels outside the JSON body.
#[derive(Debug, Clone, Default)]
pub struct PublishMeta {
    pub license_key: Option<Secret<String>>,
}

/// Transport for gateway events.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the exchange and the consumer queues and bind every routing
    /// key to every queue. Safe to call repeatedly.
    async fn declare_topology(&self, routing_keys: &[&str]) -> Result<()>;

    async fn publish(&self, routing_key: &str, envelope: &Envelope, meta: &PublishMeta)
    -> Result<()>;
}
