//! AMQP 0.9.1 transport.

use {
    async_trait::async_trait,
    lapin::{
        BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
        options::{BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
        types::{AMQPValue, FieldTable},
    },
    secrecy::ExposeSecret,
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::{
    broker::{Broker, PublishMeta},
    envelope::Envelope,
    error::Result,
};

const LICENSE_HEADER: &str = "x-license-key";

/// Topic exchange with one durable queue per consumer group.
pub struct AmqpBroker {
    connection: Connection,
    channel: Mutex<Option<Channel>>,
    exchange: String,
    queues: Vec<String>,
}

impl AmqpBroker {
    pub async fn connect(url: &str, exchange: impl Into<String>, groups: &[String]) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let exchange = exchange.into();
        let queues = groups
            .iter()
            .map(|g| queue_name(&exchange, g))
            .collect::<Vec<_>>();
        info!(exchange = %exchange, queues = queues.len(), "connected to broker");
        Ok(Self {
            connection,
            channel: Mutex::new(None),
            exchange,
            queues,
        })
    }

    /// A live channel, reopened when the previous one was closed by the server.
    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref()
            && channel.status().connected()
        {
            return Ok(channel.clone());
        }
        let channel = self.connection.create_channel().await?;
        *guard = Some(channel.clone());
        Ok(channel)
    }
}

/// Queue name for a consumer group: `<exchange>_<group>`.
pub fn queue_name(exchange: &str, group: &str) -> String {
    format!("{exchange}_{group}")
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_topology(&self, routing_keys: &[&str]) -> Result<()> {
        let channel = self.channel().await?;
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for queue in &self.queues {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            for key in routing_keys {
                channel
                    .queue_bind(
                        queue,
                        &self.exchange,
                        key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }
            debug!(queue = %queue, keys = routing_keys.len(), "queue bound");
        }
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        envelope: &Envelope,
        meta: &PublishMeta,
    ) -> Result<()> {
        let body = serde_json::to_vec(envelope)?;
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if let Some(key) = &meta.license_key {
            let mut headers = FieldTable::default();
            headers.insert(
                LICENSE_HEADER.into(),
                AMQPValue::LongString(key.expose_secret().clone().into()),
            );
            properties = properties.with_headers(headers);
        }

        let channel = self.channel().await?;
        channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;
        debug!(exchange = %self.exchange, routing_key, "event published");
        Ok(())
    }
}
