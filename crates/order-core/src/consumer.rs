//! Idempotent event consumer.
//!
//! Turns published order events into customer notifications. The broker
//! delivers at least once, so every event id is checked against the
//! processed-event table first and recorded there only after its side effect
//! was accepted by the sink. A crash between the two replays the side effect,
//! which is the accepted cost of at-least-once delivery.
//!
//! Events of one order are applied in publish order. When an event fails it
//! is requeued, and later messages of the same order are held back until the
//! redelivered event succeeds. Other orders keep flowing.

use crate::OrderError;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use order_config::{BrokerConfig, ConsumerConfig};
use order_delivery::{decode_event, BrokerMessage, DeliveryService, SubscriptionInterface};
use order_notify::{Notification, NotificationService, SinkError};
use order_store::StoreService;
use order_types::{EventId, EventKind, OrderId, OrderStatus, OutboxEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

/// Consumer group and retry tuning.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
	pub group: String,
	/// Delay before the broker redelivers a message that could not be handled.
	pub requeue_delay: Duration,
	pub sink_initial_interval: Duration,
	/// Budget for in-process sink retries of a single message.
	pub sink_max_elapsed: Duration,
}

impl ConsumerSettings {
	pub fn from_config(broker: &BrokerConfig, consumer: &ConsumerConfig) -> Self {
		Self {
			group: broker.consumer_group.clone(),
			requeue_delay: Duration::from_millis(consumer.requeue_delay_ms),
			sink_initial_interval: Duration::from_millis(consumer.sink_initial_interval_ms),
			sink_max_elapsed: Duration::from_millis(consumer.sink_max_elapsed_ms),
		}
	}
}

/// What `handle` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
	/// Side effect performed (or none needed) and the event recorded.
	Processed,
	/// The event had been processed before; nothing was done.
	Duplicate,
}

/// Orders whose stream is stopped behind a failed event.
#[derive(Default)]
struct Backlog {
	/// Failed event each blocked order is waiting on.
	blocking: HashMap<OrderId, EventId>,
	/// Unacknowledged messages queued behind it, in delivery order.
	held: HashMap<OrderId, VecDeque<(BrokerMessage, OutboxEvent)>>,
}

impl Backlog {
	fn next_held(&mut self, order_id: OrderId) -> Option<(BrokerMessage, OutboxEvent)> {
		let queue = self.held.get_mut(&order_id)?;
		let next = queue.pop_front();
		if queue.is_empty() {
			self.held.remove(&order_id);
		}
		next
	}
}

pub struct EventConsumer {
	store: Arc<StoreService>,
	delivery: Arc<DeliveryService>,
	notifications: Arc<NotificationService>,
	settings: ConsumerSettings,
	backlog: Mutex<Backlog>,
}

impl EventConsumer {
	pub fn new(
		store: Arc<StoreService>,
		delivery: Arc<DeliveryService>,
		notifications: Arc<NotificationService>,
		settings: ConsumerSettings,
	) -> Self {
		Self {
			store,
			delivery,
			notifications,
			settings,
			backlog: Mutex::new(Backlog::default()),
		}
	}

	/// Applies the side effect of `event` exactly once per event id.
	#[instrument(skip_all, fields(event_id = event.id, order_id = event.order_id, kind = %event.kind))]
	pub async fn handle(&self, event: &OutboxEvent) -> Result<Handled, OrderError> {
		if self.store.is_processed(event.id).await? {
			debug!("Skipping already processed event");
			return Ok(Handled::Duplicate);
		}

		if let Some(notification) = self.notification_for(event) {
			self.send_with_retry(&notification).await?;
			info!(
				kind = %notification.kind,
				recipient = %notification.recipient,
				"Notification sent"
			);
		}

		if !self.store.record_processed(event.id, Utc::now()).await? {
			debug!("Event was recorded concurrently");
		}
		Ok(Handled::Processed)
	}

	/// Handles one delivery and settles it with the broker.
	///
	/// Undecodable messages are acknowledged and dropped since redelivery
	/// cannot fix them. Handling failures are negatively acknowledged so the
	/// broker redelivers after the requeue delay; until then, messages of the
	/// same order are held without being acknowledged.
	pub async fn process_message(
		&self,
		subscription: &mut dyn SubscriptionInterface,
		message: BrokerMessage,
	) -> Result<(), OrderError> {
		let event = match decode_event(&message) {
			Ok(event) => event,
			Err(e) => {
				warn!(
					delivery_id = message.delivery_id,
					key = %message.key,
					error = %e,
					"Dropping undecodable message"
				);
				subscription.ack(message.delivery_id).await?;
				return Ok(());
			},
		};

		let order_id = event.order_id;
		{
			let mut backlog = self.backlog.lock().await;
			if let Some(&waiting_on) = backlog.blocking.get(&order_id) {
				if waiting_on != event.id {
					debug!(
						event_id = event.id,
						order_id = order_id,
						waiting_on = waiting_on,
						"Holding event behind failed event of the same order"
					);
					backlog
						.held
						.entry(order_id)
						.or_default()
						.push_back((message, event));
					return Ok(());
				}
			}
		}

		let mut next = Some((message, event));
		while let Some((message, event)) = next.take() {
			let applied = self.settle(subscription, &message, &event).await?;
			let mut backlog = self.backlog.lock().await;
			if applied {
				backlog.blocking.remove(&order_id);
				next = backlog.next_held(order_id);
			} else {
				backlog.blocking.insert(order_id, event.id);
			}
		}
		Ok(())
	}

	/// Number of messages currently held behind a failed event.
	pub async fn held_len(&self) -> usize {
		self.backlog.lock().await.held.values().map(VecDeque::len).sum()
	}

	/// Acks the message if its event was applied, nacks it otherwise.
	async fn settle(
		&self,
		subscription: &mut dyn SubscriptionInterface,
		message: &BrokerMessage,
		event: &OutboxEvent,
	) -> Result<bool, OrderError> {
		match self.handle(event).await {
			Ok(_) => {
				subscription.ack(message.delivery_id).await?;
				Ok(true)
			},
			Err(e) => {
				warn!(
					event_id = event.id,
					redeliveries = message.redeliveries,
					error = %e,
					"Event handling failed, requeueing"
				);
				subscription
					.nack(message.delivery_id, self.settings.requeue_delay)
					.await?;
				Ok(false)
			},
		}
	}

	/// Hands held messages back to the broker when the consumer stops.
	async fn release_backlog(&self, subscription: &mut dyn SubscriptionInterface) {
		let mut backlog = self.backlog.lock().await;
		backlog.blocking.clear();
		for (order_id, queue) in backlog.held.drain() {
			for (message, _) in queue {
				if let Err(e) = subscription.nack(message.delivery_id, Duration::ZERO).await {
					warn!(order_id = order_id, error = %e, "Failed to release held message");
				}
			}
		}
	}

	/// Consumes the topic until `shutdown` flips or the subscription ends.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OrderError> {
		let mut subscription = self.delivery.subscribe(&self.settings.group).await?;
		info!(group = %self.settings.group, topic = %self.delivery.topic(), "Event consumer started");

		loop {
			let message = tokio::select! {
				message = subscription.next() => message,
				_ = shutdown.changed() => break,
			};
			let Some(message) = message else {
				warn!("Subscription closed");
				break;
			};
			if let Err(e) = self.process_message(subscription.as_mut(), message).await {
				warn!(error = %e, "Failed to settle message with broker");
			}
		}
		self.release_backlog(subscription.as_mut()).await;
		info!("Event consumer stopped");
		Ok(())
	}

	fn notification_for(&self, event: &OutboxEvent) -> Option<Notification> {
		let order = &event.payload.order;
		match event.kind {
			EventKind::OrderCreated => Some(self.notifications.confirmation(event.id, order)),
			EventKind::OrderCancelled => Some(self.notifications.cancellation(event.id, order)),
			EventKind::StatusChanged => match event.payload.transition.map(|t| t.to) {
				Some(status @ (OrderStatus::Shipped | OrderStatus::Delivered)) => {
					Some(self.notifications.status_update(event.id, order, status))
				},
				_ => None,
			},
			EventKind::OrderUpdated => None,
		}
	}

	async fn send_with_retry(&self, notification: &Notification) -> Result<(), SinkError> {
		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.settings.sink_initial_interval)
			.with_max_elapsed_time(Some(self.settings.sink_max_elapsed))
			.build();
		let notifications = &self.notifications;

		backoff::future::retry(policy, move || async move {
			notifications.send(notification).await.map_err(|e| {
				if e.is_permanent() {
					backoff::Error::permanent(e)
				} else {
					warn!(error = %e, "Notification sink unavailable, retrying");
					backoff::Error::transient(e)
				}
			})
		})
		.await
	}
}
