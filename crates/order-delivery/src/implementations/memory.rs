//! In-memory message broker.
//!
//! Topics keep every published message. A consumer group joining a topic
//! first receives the retained messages, then everything published after it
//! joined. Rejected messages are redelivered to the same group after their
//! requeue delay. The broker can be switched unavailable to simulate an
//! outage.

use crate::{BrokerInterface, BrokerMessage, DeliveryError, SubscriptionInterface};
use async_trait::async_trait;
use order_types::{ConfigSchema, Schema, SchemaError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Clone)]
struct Envelope {
	key: String,
	payload: Vec<u8>,
	redeliveries: u32,
}

#[derive(Default)]
struct Topic {
	log: Vec<Envelope>,
	groups: HashMap<String, mpsc::UnboundedSender<Envelope>>,
}

/// In-memory broker implementation.
#[derive(Clone, Default)]
pub struct MemoryBroker {
	topics: Arc<Mutex<HashMap<String, Topic>>>,
	unavailable: Arc<AtomicBool>,
}

impl MemoryBroker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Simulates an outage (`false`) or its end (`true`).
	pub fn set_available(&self, available: bool) {
		self.unavailable.store(!available, Ordering::SeqCst);
	}

	/// Payloads published to `topic`, in publish order.
	pub async fn published(&self, topic: &str) -> Vec<Vec<u8>> {
		let topics = self.topics.lock().await;
		topics
			.get(topic)
			.map(|t| t.log.iter().map(|e| e.payload.clone()).collect())
			.unwrap_or_default()
	}
}

#[async_trait]
impl BrokerInterface for MemoryBroker {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryBrokerSchema)
	}

	async fn publish(
		&self,
		topic: &str,
		key: &str,
		payload: Vec<u8>,
	) -> Result<(), DeliveryError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(DeliveryError::Unavailable("memory broker is down".into()));
		}

		let envelope = Envelope {
			key: key.to_string(),
			payload,
			redeliveries: 0,
		};
		let mut topics = self.topics.lock().await;
		let topic_state = topics.entry(topic.to_string()).or_default();
		topic_state.log.push(envelope.clone());
		topic_state.groups.retain(|group, sender| {
			let alive = sender.send(envelope.clone()).is_ok();
			if !alive {
				debug!(group = %group, "Dropping consumer group without subscriber");
			}
			alive
		});
		Ok(())
	}

	async fn subscribe(
		&self,
		topic: &str,
		group: &str,
	) -> Result<Box<dyn SubscriptionInterface>, DeliveryError> {
		if self.unavailable.load(Ordering::SeqCst) {
			return Err(DeliveryError::Unavailable("memory broker is down".into()));
		}

		let (sender, receiver) = mpsc::unbounded_channel();
		let mut topics = self.topics.lock().await;
		let topic_state = topics.entry(topic.to_string()).or_default();
		for envelope in &topic_state.log {
			// The receiver is alive, so the send cannot fail
			let _ = sender.send(envelope.clone());
		}
		topic_state
			.groups
			.insert(group.to_string(), sender.clone());

		Ok(Box::new(MemorySubscription {
			topic: topic.to_string(),
			receiver,
			requeue: sender,
			in_flight: HashMap::new(),
			last_delivery_id: 0,
		}))
	}
}

/// Subscription handed out by [`MemoryBroker`].
pub struct MemorySubscription {
	topic: String,
	receiver: mpsc::UnboundedReceiver<Envelope>,
	requeue: mpsc::UnboundedSender<Envelope>,
	in_flight: HashMap<u64, Envelope>,
	last_delivery_id: u64,
}

#[async_trait]
impl SubscriptionInterface for MemorySubscription {
	async fn next(&mut self) -> Option<BrokerMessage> {
		let envelope = self.receiver.recv().await?;
		self.last_delivery_id += 1;
		let message = BrokerMessage {
			delivery_id: self.last_delivery_id,
			topic: self.topic.clone(),
			key: envelope.key.clone(),
			payload: envelope.payload.clone(),
			redeliveries: envelope.redeliveries,
		};
		self.in_flight.insert(self.last_delivery_id, envelope);
		Some(message)
	}

	async fn ack(&mut self, delivery_id: u64) -> Result<(), DeliveryError> {
		self.in_flight
			.remove(&delivery_id)
			.map(|_| ())
			.ok_or(DeliveryError::UnknownDelivery(delivery_id))
	}

	async fn nack(
		&mut self,
		delivery_id: u64,
		requeue_after: Duration,
	) -> Result<(), DeliveryError> {
		let mut envelope = self
			.in_flight
			.remove(&delivery_id)
			.ok_or(DeliveryError::UnknownDelivery(delivery_id))?;
		envelope.redeliveries += 1;

		let sender = self.requeue.clone();
		tokio::spawn(async move {
			tokio::time::sleep(requeue_after).await;
			let _ = sender.send(envelope);
		});
		Ok(())
	}
}

/// Configuration schema for MemoryBroker.
pub struct MemoryBrokerSchema;

impl ConfigSchema for MemoryBrokerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory broker from configuration.
pub fn create_broker(config: &toml::Value) -> Result<Box<dyn BrokerInterface>, DeliveryError> {
	MemoryBrokerSchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryBroker::new()))
}

/// Registry for the memory broker implementation.
pub struct Registry;

impl order_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::BrokerFactory;

	fn factory() -> Self::Factory {
		create_broker
	}
}

impl crate::BrokerRegistry for Registry {}
