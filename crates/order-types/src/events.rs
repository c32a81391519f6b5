//! Outbox event types.
//!
//! An `OutboxEvent` is recorded in the same store transaction as the order
//! mutation it describes, drained to the broker by the publisher, and applied
//! by the consumer, which remembers each applied event as a
//! `ProcessedEventRecord`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Order, OrderId, OrderStatus};

/// Identifier of an outbox event, assigned monotonically by the store.
pub type EventId = u64;

/// What happened to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
	OrderCreated,
	OrderUpdated,
	StatusChanged,
	OrderCancelled,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			EventKind::OrderCreated => "OrderCreated",
			EventKind::OrderUpdated => "OrderUpdated",
			EventKind::StatusChanged => "StatusChanged",
			EventKind::OrderCancelled => "OrderCancelled",
		};
		f.write_str(name)
	}
}

/// Publication state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationStatus {
	/// Waiting for (another) publish attempt.
	Pending,
	/// Acknowledged by the broker.
	Published,
	/// Attempt ceiling reached; kept for manual or scheduled retry.
	Failed,
}

/// Old and new status of a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
	pub from: OrderStatus,
	pub to: OrderStatus,
}

/// Snapshot carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
	/// The order as committed by the transaction that emitted the event.
	pub order: Order,
	/// Set for `StatusChanged` and `OrderCancelled`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transition: Option<StatusTransition>,
}

/// An event the lifecycle asks the store to record alongside an order write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDraft {
	pub kind: EventKind,
	pub transition: Option<StatusTransition>,
}

impl EventDraft {
	pub fn new(kind: EventKind) -> Self {
		Self {
			kind,
			transition: None,
		}
	}

	pub fn with_transition(kind: EventKind, from: OrderStatus, to: OrderStatus) -> Self {
		Self {
			kind,
			transition: Some(StatusTransition { from, to }),
		}
	}
}

/// A durable outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
	pub id: EventId,
	pub order_id: OrderId,
	pub kind: EventKind,
	pub payload: EventPayload,
	pub status: PublicationStatus,
	pub created_at: DateTime<Utc>,
	/// Number of failed publish attempts so far.
	pub attempts: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	/// Earliest time the row may be attempted again. `None` on a FAILED row
	/// means it waits for a manual retry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub next_attempt_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
	/// Whether the publisher may attempt this row at `now`.
	pub fn is_due(&self, now: DateTime<Utc>) -> bool {
		match self.status {
			PublicationStatus::Published => false,
			PublicationStatus::Pending => self.next_attempt_at.is_none_or(|at| at <= now),
			PublicationStatus::Failed => self.next_attempt_at.is_some_and(|at| at <= now),
		}
	}
}

/// Marks an event as applied by the consumer. Never updated once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEventRecord {
	pub event_id: EventId,
	pub processed_at: DateTime<Utc>,
}
