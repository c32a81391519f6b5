//! Order state machine implementation.
//!
//! Orders move through `Created -> Confirmed -> Shipped -> Delivered`, and may
//! be cancelled while `Created` or `Confirmed`. Every change is written as a
//! read-modify-commit against the order's version, together with the outbox
//! event describing it.

use crate::OrderError;
use once_cell::sync::Lazy;
use order_store::StoreService;
use order_types::{EventDraft, EventKind, Order, OrderId, OrderStatus, OutboxEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Static transition table - each state maps to allowed next states
static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	let mut m = HashMap::new();
	m.insert(
		OrderStatus::Created,
		HashSet::from([OrderStatus::Confirmed, OrderStatus::Cancelled]),
	);
	m.insert(
		OrderStatus::Confirmed,
		HashSet::from([OrderStatus::Shipped, OrderStatus::Cancelled]),
	);
	m.insert(OrderStatus::Shipped, HashSet::from([OrderStatus::Delivered]));
	m.insert(OrderStatus::Delivered, HashSet::new()); // terminal
	m.insert(OrderStatus::Cancelled, HashSet::new()); // terminal
	m
});

/// Manages order state transitions and persistence
pub struct OrderStateMachine {
	store: Arc<StoreService>,
}

impl OrderStateMachine {
	pub fn new(store: Arc<StoreService>) -> Self {
		Self { store }
	}

	/// Checks if a state transition is valid
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		TRANSITIONS
			.get(&from)
			.is_some_and(|targets| targets.contains(&to))
	}

	/// Reads an order, applies `updater` and commits the result together with
	/// the event the updater returns.
	///
	/// The commit only succeeds if the order still has the version that was
	/// read. With `expected_version`, the read itself must also match it. An
	/// error from the updater aborts without writing anything.
	pub async fn update_order_with<F>(
		&self,
		order_id: OrderId,
		expected_version: Option<u64>,
		updater: F,
	) -> Result<(Order, OutboxEvent), OrderError>
	where
		F: FnOnce(&mut Order) -> Result<EventDraft, OrderError>,
	{
		let mut order = self.store.get_order(order_id).await?;
		let read_version = order.version;
		if let Some(expected) = expected_version {
			if expected != read_version {
				return Err(OrderError::Conflict(format!(
					"order {} is at version {}, expected {}",
					order_id, read_version, expected
				)));
			}
		}

		let event = updater(&mut order)?;
		let committed = self
			.store
			.update_order(order, read_version, event)
			.await?;
		Ok(committed)
	}

	/// Transitions an order to a new status with validation.
	///
	/// `check` runs against the current order before the transition is
	/// validated, so authorization failures take precedence. Entering
	/// `Cancelled` records an `OrderCancelled` event, any other status a
	/// `StatusChanged` event, both carrying the old and new status.
	pub async fn transition_order_status<C>(
		&self,
		order_id: OrderId,
		new_status: OrderStatus,
		check: C,
	) -> Result<(Order, OutboxEvent), OrderError>
	where
		C: FnOnce(&Order) -> Result<(), OrderError>,
	{
		self.update_order_with(order_id, None, |order| {
			check(order)?;
			let from = order.status;
			if !Self::is_valid_transition(from, new_status) {
				return Err(OrderError::InvalidTransition(format!(
					"order {} cannot move from {} to {}",
					order.id, from, new_status
				)));
			}
			order.status = new_status;

			let kind = if new_status == OrderStatus::Cancelled {
				EventKind::OrderCancelled
			} else {
				EventKind::StatusChanged
			};
			Ok(EventDraft::with_transition(kind, from, new_status))
		})
		.await
	}
}
