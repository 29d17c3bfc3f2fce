//! EventPublisher - emits domain events to the bus
//!
//! ## Responsibilities
//!
//! - Persistent-delivery JSON publish to the configured topic exchange
//! - Requires a prior successful connect; no retry on failure

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::OutboundEvent;

/// Publisher contract (seam for tests)
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Serialize and emit one event under the given routing key
    async fn publish(&self, routing_key: &str, event: &OutboundEvent) -> Result<()>;
}

/// AMQP publisher bound to one topic exchange
pub struct AmqpPublisher {
    exchange: String,
    channel: Mutex<Option<Channel>>,
}

impl AmqpPublisher {
    /// Create an unconnected publisher
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            channel: Mutex::new(None),
        }
    }

    /// Connect to the bus and declare the durable topic exchange.
    ///
    /// Must succeed before the first publish.
    pub async fn connect(&self, uri: &str) -> Result<()> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

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

        *self.channel.lock().await = Some(channel);

        tracing::info!(exchange = %self.exchange, "Publisher connected");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish(&self, routing_key: &str, event: &OutboundEvent) -> Result<()> {
        let guard = self.channel.lock().await;
        let channel = guard.as_ref().ok_or(Error::NotConnected)?;

        let body = serde_json::to_vec(event)?;

        channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // persistent, survives broker restart
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        tracing::info!(routing_key = %routing_key, "Event published");
        Ok(())
    }
}
