//! EventConsumer - inbound lifecycle event subscription
//!
//! ## Responsibilities
//!
//! - Durable topic queue subscription (manual ack, one message in flight)
//! - Handler dispatch by event_type (plain map of async closures)
//! - Poison-message cap: a payload that keeps failing is requeued at most
//!   MAX_DELIVERY_ATTEMPTS times, then nacked without requeue so a bound
//!   dead-letter exchange can capture it
//!
//! Unknown event types and malformed envelopes are logged, acknowledged and
//! dropped; they are never requeued.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::events::InboundEnvelope;

/// Requeue cap per failing payload before giving up on it
const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// Async handler for one event type, invoked with the envelope's `data`
pub type Handler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// How a dispatched message must be settled on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Acknowledge (handled, or deliberately dropped)
    Ack,
    /// Negatively acknowledge with requeue (handler failed, retry later)
    Requeue,
    /// Negatively acknowledge without requeue (retry cap reached)
    DeadLetter,
}

/// AMQP consumer bound to a durable queue
pub struct EventConsumer {
    exchange: String,
    queue: String,
    routing_keys: Vec<String>,
    handlers: HashMap<String, Handler>,
    channel: Option<Channel>,
    /// Failure count per payload hash (poison-message tracking)
    attempts: Mutex<HashMap<u64, u32>>,
}

impl EventConsumer {
    /// Create an unconnected consumer
    pub fn new(exchange: &str, queue: &str, routing_keys: &[String]) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_keys: routing_keys.to_vec(),
            handlers: HashMap::new(),
            channel: None,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for one event type
    pub fn register_handler(&mut self, event_type: &str, handler: Handler) {
        tracing::info!(event_type = %event_type, "Handler registered");
        self.handlers.insert(event_type.to_string(), handler);
    }

    /// Connect to the bus, declare the exchange and queue, bind routing keys.
    ///
    /// Failure here is fatal at startup; the process must not proceed.
    pub async fn connect(&mut self, uri: &str) -> Result<()> {
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

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for routing_key in &self.routing_keys {
            channel
                .queue_bind(
                    &self.queue,
                    &self.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        tracing::info!(
            exchange = %self.exchange,
            queue = %self.queue,
            routing_keys = ?self.routing_keys,
            "Consumer connected"
        );

        self.channel = Some(channel);
        Ok(())
    }

    /// Consume messages until the bus connection drops.
    ///
    /// Prefetch 1 serializes all lifecycle handling: two `camera.added` for
    /// the same id can never race each other here.
    pub async fn run(&self) -> Result<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or(crate::error::Error::NotConnected)?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                "vigileye",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue = %self.queue, "Consuming events");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;

            match self.dispatch(&delivery.data).await {
                DispatchOutcome::Ack => {
                    delivery.ack(BasicAckOptions::default()).await?;
                }
                DispatchOutcome::Requeue => {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await?;
                }
                DispatchOutcome::DeadLetter => {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Parse one message body and run its handler.
    ///
    /// Pure with respect to the bus: the caller settles the delivery based
    /// on the returned outcome.
    pub async fn dispatch(&self, body: &[u8]) -> DispatchOutcome {
        let envelope: InboundEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "Malformed inbound event, dropping");
                return DispatchOutcome::Ack;
            }
        };

        let handler = match self.handlers.get(&envelope.event_type) {
            Some(handler) => handler,
            None => {
                tracing::warn!(
                    event_type = %envelope.event_type,
                    "No handler for event type, dropping"
                );
                return DispatchOutcome::Ack;
            }
        };

        tracing::info!(event_type = %envelope.event_type, "Event received");

        match handler(envelope.data).await {
            Ok(()) => {
                self.attempts.lock().await.remove(&payload_hash(body));
                DispatchOutcome::Ack
            }
            Err(e) => {
                let key = payload_hash(body);
                let mut attempts = self.attempts.lock().await;
                let count = attempts.entry(key).or_insert(0);
                *count += 1;

                if *count >= MAX_DELIVERY_ATTEMPTS {
                    attempts.remove(&key);
                    tracing::error!(
                        event_type = %envelope.event_type,
                        error = %e,
                        attempts = MAX_DELIVERY_ATTEMPTS,
                        "Handler kept failing, dead-lettering message"
                    );
                    DispatchOutcome::DeadLetter
                } else {
                    tracing::error!(
                        event_type = %envelope.event_type,
                        error = %e,
                        attempt = *count,
                        "Handler failed, requeueing"
                    );
                    DispatchOutcome::Requeue
                }
            }
        }
    }
}

fn payload_hash(body: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    hasher.finish()
}
