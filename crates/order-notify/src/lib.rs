//! Notification module for the order pipeline.
//!
//! The event consumer renders customer notifications from order events and
//! hands them to a sink. Sinks may fail transiently (`Unavailable`) or
//! permanently (`Rejected`); the consumer retries only the former in-process.
//! Sinks must tolerate receiving the same notification more than once.

use async_trait::async_trait;
use order_types::{ConfigSchema, EventId, ImplementationRegistry, Order, OrderId, OrderStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod render;

/// Re-export implementations
pub mod implementations {
	pub mod log;
	pub mod memory;
}

/// Errors that can occur when handing a notification to a sink.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
	/// The sink refused the message and will refuse it again.
	#[error("Notification rejected: {0}")]
	Rejected(String),
	/// The sink could not take the message right now.
	#[error("Notification sink unavailable: {0}")]
	Unavailable(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl SinkError {
	/// Whether retrying the same notification cannot succeed.
	pub fn is_permanent(&self) -> bool {
		!matches!(self, SinkError::Unavailable(_))
	}
}

/// Kinds of customer notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	/// Sent when an order is created.
	OrderConfirmation,
	/// Sent when an order ships or is delivered.
	StatusUpdate,
	/// Sent when an order is cancelled.
	Cancellation,
}

impl fmt::Display for NotificationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			NotificationKind::OrderConfirmation => "order_confirmation",
			NotificationKind::StatusUpdate => "status_update",
			NotificationKind::Cancellation => "cancellation",
		};
		f.write_str(name)
	}
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	pub kind: NotificationKind,
	/// Event the notification was rendered from, usable for sink-side
	/// deduplication.
	pub event_id: EventId,
	pub order_id: OrderId,
	pub from: String,
	pub recipient: String,
	pub subject: String,
	pub body: String,
}

/// Trait defining the interface for notification sinks.
#[async_trait]
pub trait NotificationInterface: Send + Sync {
	/// Returns the configuration schema for this sink.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Hands a notification over. `Ok` means the sink accepted it.
	async fn send(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Type alias for sink factory functions.
pub type NotificationFactory =
	fn(&toml::Value) -> Result<Box<dyn NotificationInterface>, SinkError>;

/// Registry trait for notification sink implementations.
pub trait NotificationRegistry: ImplementationRegistry<Factory = NotificationFactory> {}

/// Get all registered notification sink implementations.
pub fn get_all_implementations() -> Vec<(&'static str, NotificationFactory)> {
	use implementations::{log, memory};

	vec![
		(log::Registry::NAME, log::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Renders notifications and hands them to the configured sink.
pub struct NotificationService {
	sink: Box<dyn NotificationInterface>,
	from_address: String,
}

impl NotificationService {
	pub fn new(sink: Box<dyn NotificationInterface>, from_address: String) -> Self {
		Self { sink, from_address }
	}

	/// Order confirmation for a newly created order.
	pub fn confirmation(&self, event_id: EventId, order: &Order) -> Notification {
		render::confirmation(&self.from_address, event_id, order)
	}

	/// Shipping or delivery update.
	pub fn status_update(
		&self,
		event_id: EventId,
		order: &Order,
		status: OrderStatus,
	) -> Notification {
		render::status_update(&self.from_address, event_id, order, status)
	}

	pub fn cancellation(&self, event_id: EventId, order: &Order) -> Notification {
		render::cancellation(&self.from_address, event_id, order)
	}

	pub async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
		self.sink.send(notification).await
	}
}
