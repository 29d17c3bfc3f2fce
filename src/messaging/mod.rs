//! Messaging - AMQP bus integration
//!
//! ## Responsibilities
//!
//! - Consumer: durable topic queue subscription and handler dispatch
//! - Publisher: persistent-delivery event emission to the topic exchange

mod consumer;
mod publisher;

pub use consumer::{DispatchOutcome, EventConsumer, Handler};
pub use publisher::{AmqpPublisher, EventPublisher};
