//! Event delivery module for the order pipeline.
//!
//! This module abstracts the message broker the outbox is drained to and the
//! consumer reads from. Brokers offer at-least-once semantics: a message is
//! redelivered until its subscriber acknowledges it.

use async_trait::async_trait;
use order_types::{truncate_text, ConfigSchema, ImplementationRegistry, OutboxEvent};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The broker cannot be reached.
	#[error("Broker unavailable: {0}")]
	Unavailable(String),
	/// The broker did not acknowledge within the configured bound.
	#[error("Publish timed out after {0:?}")]
	Timeout(Duration),
	/// The subscription does not know the delivery.
	#[error("Unknown delivery {0}")]
	UnknownDelivery(u64),
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
	/// Subscription-local handle used to ack or nack the message.
	pub delivery_id: u64,
	pub topic: String,
	/// Partition key; the order id for order events.
	pub key: String,
	pub payload: Vec<u8>,
	/// How many times this message was delivered before.
	pub redeliveries: u32,
}

/// Trait defining the interface for message brokers.
#[async_trait]
pub trait BrokerInterface: Send + Sync {
	/// Returns the configuration schema for this broker implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Publishes a message and returns once the broker acknowledged it.
	async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>)
		-> Result<(), DeliveryError>;

	/// Joins consumer group `group` on `topic`.
	async fn subscribe(
		&self,
		topic: &str,
		group: &str,
	) -> Result<Box<dyn SubscriptionInterface>, DeliveryError>;
}

/// A consumer group membership.
#[async_trait]
pub trait SubscriptionInterface: Send {
	/// Waits for the next message. Returns `None` once the broker is gone.
	async fn next(&mut self) -> Option<BrokerMessage>;

	/// Confirms a message; it will not be delivered again.
	async fn ack(&mut self, delivery_id: u64) -> Result<(), DeliveryError>;

	/// Rejects a message; it is delivered again after `requeue_after`.
	async fn nack(&mut self, delivery_id: u64, requeue_after: Duration)
		-> Result<(), DeliveryError>;
}

/// Type alias for broker factory functions.
pub type BrokerFactory = fn(&toml::Value) -> Result<Box<dyn BrokerInterface>, DeliveryError>;

/// Registry trait for broker implementations.
pub trait BrokerRegistry: ImplementationRegistry<Factory = BrokerFactory> {}

/// Get all registered broker implementations.
pub fn get_all_implementations() -> Vec<(&'static str, BrokerFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}

/// Service publishing outbox events to one topic.
pub struct DeliveryService {
	broker: Box<dyn BrokerInterface>,
	topic: String,
	publish_timeout: Duration,
}

impl DeliveryService {
	pub fn new(broker: Box<dyn BrokerInterface>, topic: String, publish_timeout: Duration) -> Self {
		Self {
			broker,
			topic,
			publish_timeout,
		}
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	/// Publishes an outbox event keyed by its order id.
	///
	/// Fails with `Timeout` if the broker does not acknowledge in time; the
	/// message may still have been delivered in that case.
	pub async fn publish(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
		let payload =
			serde_json::to_vec(event).map_err(|e| DeliveryError::Serialization(e.to_string()))?;
		let key = event.order_id.to_string();

		tokio::time::timeout(
			self.publish_timeout,
			self.broker.publish(&self.topic, &key, payload),
		)
		.await
		.map_err(|_| DeliveryError::Timeout(self.publish_timeout))??;

		debug!(event_id = event.id, topic = %self.topic, "Broker acknowledged event");
		Ok(())
	}

	/// Joins `group` on the service topic.
	pub async fn subscribe(
		&self,
		group: &str,
	) -> Result<Box<dyn SubscriptionInterface>, DeliveryError> {
		self.broker.subscribe(&self.topic, group).await
	}
}

/// Decodes a message payload back into the outbox event it carries.
pub fn decode_event(message: &BrokerMessage) -> Result<OutboxEvent, DeliveryError> {
	serde_json::from_slice(&message.payload).map_err(|e| {
		DeliveryError::Serialization(format!(
			"{} (payload: {})",
			e,
			truncate_text(&String::from_utf8_lossy(&message.payload), 64)
		))
	})
}

