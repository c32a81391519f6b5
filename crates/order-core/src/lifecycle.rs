//! Order lifecycle operations.
//!
//! `OrderLifecycle` is what the API layer calls. Each mutating operation is a
//! single store commit of the order write plus its outbox event. After the
//! commit, cached views are invalidated and the publisher is woken; neither
//! step can fail the operation.

use crate::state::OrderStateMachine;
use crate::OrderError;
use order_cache::CacheLayer;
use order_pricing::PricingService;
use order_store::{NewOrderRecord, StoreService};
use order_types::{
	Caller, EventDraft, EventKind, NewOrder, Order, OrderFilter, OrderId, OrderPage, OrderPatch,
	OrderStatus, OutboxEvent, Pagination,
};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, instrument};
use validator::Validate;

/// Entry point for order operations invoked on behalf of a caller.
pub struct OrderLifecycle {
	store: Arc<StoreService>,
	cache: Arc<CacheLayer>,
	pricing: Arc<PricingService>,
	state_machine: OrderStateMachine,
	/// Wakes the publisher when new outbox rows exist.
	outbox_hint: Arc<Notify>,
	max_page_size: usize,
}

impl OrderLifecycle {
	pub fn new(
		store: Arc<StoreService>,
		cache: Arc<CacheLayer>,
		pricing: Arc<PricingService>,
		outbox_hint: Arc<Notify>,
		max_page_size: usize,
	) -> Self {
		Self {
			state_machine: OrderStateMachine::new(store.clone()),
			store,
			cache,
			pricing,
			outbox_hint,
			max_page_size,
		}
	}

	/// Places an order owned by the caller, in `Created` state.
	///
	/// The unit price is taken from the price source now and kept on the
	/// order. Unknown products and insufficient stock are validation errors.
	#[instrument(skip_all, fields(user_id = caller.id, product_id = %input.product_id))]
	pub async fn create_order(&self, caller: Caller, input: NewOrder) -> Result<Order, OrderError> {
		input.validate()?;

		let price = self.pricing.get_price(&input.product_id).await?;
		if let Some(stock) = price.stock {
			if stock < input.quantity {
				return Err(OrderError::Validation(format!(
					"Insufficient stock for {}: {} requested, {} available",
					input.product_id, input.quantity, stock
				)));
			}
		}

		let record = NewOrderRecord {
			user_id: caller.id,
			product_id: input.product_id,
			quantity: input.quantity,
			unit_price: price.unit_price,
			customer_email: input.customer_email,
			shipping_address: input.shipping_address,
		};
		let (order, event) = self
			.store
			.create_order(record, EventDraft::new(EventKind::OrderCreated))
			.await?;

		info!(order_id = order.id, total_price = %order.total_price, "Order created");
		self.after_commit(&order, &event).await;
		Ok(order)
	}

	/// Edits quantity and/or shipping address of a `Created` or `Confirmed`
	/// order. Allowed for admins and the owning customer.
	#[instrument(skip_all, fields(order_id = order_id, user_id = caller.id))]
	pub async fn update_order(
		&self,
		caller: Caller,
		order_id: OrderId,
		patch: OrderPatch,
	) -> Result<Order, OrderError> {
		patch.validate()?;
		if patch.is_empty() {
			return Err(OrderError::Validation("No fields to update".into()));
		}

		let (order, event) = self
			.state_machine
			.update_order_with(order_id, patch.expected_version, |order| {
				authorize(caller, order)?;
				if !order.status.is_editable() {
					return Err(OrderError::InvalidState(format!(
						"order {} is {} and can no longer be edited",
						order.id, order.status
					)));
				}
				if let Some(quantity) = patch.quantity {
					order.quantity = quantity;
					order.recompute_total();
				}
				if let Some(address) = patch.shipping_address {
					order.shipping_address = Some(address);
				}
				Ok(EventDraft::new(EventKind::OrderUpdated))
			})
			.await?;

		info!(order_id, version = order.version, "Order updated");
		self.after_commit(&order, &event).await;
		Ok(order)
	}

	/// Moves an order to `new_status`. Admin only.
	#[instrument(skip_all, fields(order_id = order_id, to = %new_status))]
	pub async fn change_status(
		&self,
		caller: Caller,
		order_id: OrderId,
		new_status: OrderStatus,
	) -> Result<Order, OrderError> {
		if !caller.is_admin() {
			return Err(OrderError::Authorization(
				"Only administrators can change order status".into(),
			));
		}

		let (order, event) = self
			.state_machine
			.transition_order_status(order_id, new_status, |_| Ok(()))
			.await?;

		info!(order_id, status = %order.status, "Order status changed");
		self.after_commit(&order, &event).await;
		Ok(order)
	}

	/// Cancels a `Created` or `Confirmed` order. Allowed for admins and the
	/// owning customer.
	#[instrument(skip_all, fields(order_id = order_id, user_id = caller.id))]
	pub async fn cancel_order(&self, caller: Caller, order_id: OrderId) -> Result<Order, OrderError> {
		let (order, event) = self
			.state_machine
			.transition_order_status(order_id, OrderStatus::Cancelled, |order| {
				authorize(caller, order)
			})
			.await?;

		info!(order_id, "Order cancelled");
		self.after_commit(&order, &event).await;
		Ok(order)
	}

	/// Returns an order visible to the caller.
	pub async fn get_order(&self, caller: Caller, order_id: OrderId) -> Result<Order, OrderError> {
		let order = self
			.cache
			.get_order(order_id, || async {
				self.store.get_order(order_id).await.map_err(OrderError::from)
			})
			.await?;
		authorize(caller, &order)?;
		Ok(order)
	}

	/// Lists orders visible to the caller, newest first.
	///
	/// Customers only ever see their own orders; a `user_id` filter from a
	/// customer is replaced by the caller's id.
	pub async fn list_orders(
		&self,
		caller: Caller,
		mut filter: OrderFilter,
		pagination: Pagination,
	) -> Result<OrderPage, OrderError> {
		if pagination.limit == 0 || pagination.limit > self.max_page_size {
			return Err(OrderError::Validation(format!(
				"limit must be between 1 and {}",
				self.max_page_size
			)));
		}
		if let (Some(min), Some(max)) = (filter.min_price, filter.max_price) {
			if min > max {
				return Err(OrderError::Validation(
					"min_price cannot exceed max_price".into(),
				));
			}
		}
		if !caller.is_admin() {
			filter.user_id = Some(caller.id);
		}

		self.cache
			.list_orders(&filter, pagination, || async {
				let (orders, total) = self.store.list_orders(&filter, pagination).await?;
				Ok::<_, OrderError>(OrderPage {
					orders,
					total,
					skip: pagination.skip,
					limit: pagination.limit,
				})
			})
			.await
	}

	/// Page size bound enforced by `list_orders`.
	pub fn max_page_size(&self) -> usize {
		self.max_page_size
	}

	async fn after_commit(&self, order: &Order, event: &OutboxEvent) {
		self.cache.invalidate_order(order.id).await;
		tracing::debug!(order_id = order.id, event_id = event.id, kind = %event.kind, "Outbox event recorded");
		self.outbox_hint.notify_one();
	}
}

fn authorize(caller: Caller, order: &Order) -> Result<(), OrderError> {
	if caller.may_access(order) {
		Ok(())
	} else {
		Err(OrderError::Authorization(format!(
			"user {} may not access order {}",
			caller.id, order.id
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{admin, customer, laptop_order, Harness};
	use order_store::FailPoint;
	use order_types::{EventKind, PublicationStatus};
	use rust_decimal::Decimal;

	#[tokio::test]
	async fn test_create_order_computes_total_and_queues_event() {
		let h = Harness::new();
		let order = h
			.lifecycle
			.create_order(customer(), laptop_order(2))
			.await
			.unwrap();

		assert_eq!(order.total_price, Decimal::from(1000));
		assert_eq!(order.status, OrderStatus::Created);
		assert_eq!(order.user_id, customer().id);

		let events = h.store.events_for_order(order.id).await.unwrap();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].kind, EventKind::OrderCreated);
		assert_eq!(events[0].status, PublicationStatus::Pending);
	}

	#[tokio::test]
	async fn test_create_order_validation() {
		let h = Harness::new();

		let mut zero = laptop_order(1);
		zero.quantity = 0;
		let unknown = NewOrder {
			product_id: "PHONE-404".into(),
			..laptop_order(1)
		};
		let too_many_phones = NewOrder {
			product_id: "PHONE-001".into(),
			..laptop_order(4)
		};
		for input in [zero, unknown, too_many_phones] {
			let err = h.lifecycle.create_order(customer(), input).await.unwrap_err();
			assert!(matches!(err, OrderError::Validation(_)), "{}", err);
		}
		assert_eq!(h.memory_store.outbox_len().await, 0);
	}

	#[tokio::test]
	async fn test_failed_outbox_write_rolls_back_order() {
		let h = Harness::new();
		h.memory_store.fail_next(FailPoint::BeforeOutboxWrite).await;

		let err = h
			.lifecycle
			.create_order(customer(), laptop_order(2))
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Persistence(_)));
		assert_eq!(h.memory_store.outbox_len().await, 0);

		let page = h
			.lifecycle
			.list_orders(admin(), OrderFilter::default(), Pagination::default())
			.await
			.unwrap();
		assert_eq!(page.total, 0);
	}

	#[tokio::test]
	async fn test_update_recomputes_total_from_captured_price() {
		let h = Harness::new();
		let order = h.create_laptop_order(2).await;

		let updated = h
			.lifecycle
			.update_order(
				customer(),
				order.id,
				OrderPatch {
					quantity: Some(3),
					shipping_address: Some("2 Side St".into()),
					expected_version: None,
				},
			)
			.await
			.unwrap();

		assert_eq!(updated.total_price, Decimal::from(1500));
		assert_eq!(updated.unit_price, order.unit_price);
		assert_eq!(updated.version, 2);
		let kinds: Vec<_> = h
			.store
			.events_for_order(order.id)
			.await
			.unwrap()
			.into_iter()
			.map(|e| e.kind)
			.collect();
		assert_eq!(kinds, vec![EventKind::OrderCreated, EventKind::OrderUpdated]);
	}

	#[tokio::test]
	async fn test_update_rules() {
		let h = Harness::new();
		let order = h.create_laptop_order(2).await;
		let patch = OrderPatch {
			quantity: Some(1),
			..Default::default()
		};

		let stranger = h
			.lifecycle
			.update_order(crate::test_support::other_customer(), order.id, patch.clone())
			.await
			.unwrap_err();
		assert!(matches!(stranger, OrderError::Authorization(_)));

		let empty = h
			.lifecycle
			.update_order(customer(), order.id, OrderPatch::default())
			.await
			.unwrap_err();
		assert!(matches!(empty, OrderError::Validation(_)));

		h.lifecycle
			.change_status(admin(), order.id, OrderStatus::Confirmed)
			.await
			.unwrap();
		h.lifecycle
			.change_status(admin(), order.id, OrderStatus::Shipped)
			.await
			.unwrap();
		let shipped = h
			.lifecycle
			.update_order(admin(), order.id, patch)
			.await
			.unwrap_err();
		assert!(matches!(shipped, OrderError::InvalidState(_)));

		// Only the creation and two status events exist
		assert_eq!(h.memory_store.outbox_len().await, 3);
	}

	#[tokio::test]
	async fn test_every_status_pair() {
		let h = Harness::new();
		let path = [
			OrderStatus::Confirmed,
			OrderStatus::Shipped,
			OrderStatus::Delivered,
		];

		for from in OrderStatus::all() {
			for to in OrderStatus::all() {
				let order = h.create_laptop_order(1).await;
				// Walk the order to `from`
				let walk: Vec<OrderStatus> = match from {
					OrderStatus::Created => vec![],
					OrderStatus::Cancelled => vec![OrderStatus::Cancelled],
					other => path
						.iter()
						.copied()
						.take_while(|s| *s != other)
						.chain(std::iter::once(other))
						.collect(),
				};
				for step in walk {
					h.lifecycle
						.change_status(admin(), order.id, step)
						.await
						.unwrap();
				}

				let before = h.store.get_order(order.id).await.unwrap();
				let events_before = h.store.events_for_order(order.id).await.unwrap().len();
				let result = h.lifecycle.change_status(admin(), order.id, to).await;

				if OrderStateMachine::is_valid_transition(from, to) {
					assert_eq!(result.unwrap().status, to, "{} -> {}", from, to);
					assert_eq!(
						h.store.events_for_order(order.id).await.unwrap().len(),
						events_before + 1
					);
				} else {
					assert!(
						matches!(result, Err(OrderError::InvalidTransition(_))),
						"{} -> {} should be rejected",
						from,
						to
					);
					assert_eq!(h.store.get_order(order.id).await.unwrap(), before);
					assert_eq!(
						h.store.events_for_order(order.id).await.unwrap().len(),
						events_before
					);
				}
			}
		}
	}

	#[tokio::test]
	async fn test_change_status_requires_admin() {
		let h = Harness::new();
		let order = h.create_laptop_order(1).await;
		let err = h
			.lifecycle
			.change_status(customer(), order.id, OrderStatus::Confirmed)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Authorization(_)));

		let missing = h
			.lifecycle
			.change_status(admin(), 999, OrderStatus::Confirmed)
			.await
			.unwrap_err();
		assert!(matches!(missing, OrderError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_cancel_by_owner_only_from_open_states() {
		let h = Harness::new();
		let order = h.create_laptop_order(1).await;

		let err = h
			.lifecycle
			.cancel_order(crate::test_support::other_customer(), order.id)
			.await
			.unwrap_err();
		assert!(matches!(err, OrderError::Authorization(_)));

		let cancelled = h.lifecycle.cancel_order(customer(), order.id).await.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
		let events = h.store.events_for_order(order.id).await.unwrap();
		assert_eq!(events.last().unwrap().kind, EventKind::OrderCancelled);

		let again = h
			.lifecycle
			.cancel_order(customer(), order.id)
			.await
			.unwrap_err();
		assert!(matches!(again, OrderError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn test_get_order_visibility() {
		let h = Harness::new();
		let order = h.create_laptop_order(1).await;

		assert_eq!(
			h.lifecycle.get_order(customer(), order.id).await.unwrap(),
			order
		);
		assert_eq!(h.lifecycle.get_order(admin(), order.id).await.unwrap(), order);
		assert!(matches!(
			h.lifecycle
				.get_order(crate::test_support::other_customer(), order.id)
				.await,
			Err(OrderError::Authorization(_))
		));
	}

	#[tokio::test]
	async fn test_cached_read_reflects_latest_write() {
		let h = Harness::new();
		let order = h.create_laptop_order(1).await;

		// Warm both the order entry and a list page
		h.lifecycle.get_order(customer(), order.id).await.unwrap();
		h.lifecycle
			.list_orders(customer(), OrderFilter::default(), Pagination::default())
			.await
			.unwrap();

		h.lifecycle
			.update_order(
				customer(),
				order.id,
				OrderPatch {
					quantity: Some(4),
					..Default::default()
				},
			)
			.await
			.unwrap();

		let read = h.lifecycle.get_order(customer(), order.id).await.unwrap();
		assert_eq!(read.quantity, 4);
		assert_eq!(read.total_price, Decimal::from(2000));
		let page = h
			.lifecycle
			.list_orders(customer(), OrderFilter::default(), Pagination::default())
			.await
			.unwrap();
		assert_eq!(page.orders[0].quantity, 4);

		// A cleared backend still yields current data
		h.cache.clear().await;
		let read = h.lifecycle.get_order(customer(), order.id).await.unwrap();
		assert_eq!(read.version, 2);
	}

	#[tokio::test]
	async fn test_list_scoping_and_pagination() {
		let h = Harness::new();
		let first = h.create_laptop_order(1).await;
		let second = h.create_laptop_order(2).await;
		h.lifecycle
			.create_order(crate::test_support::other_customer(), laptop_order(1))
			.await
			.unwrap();

		// A customer asking for someone else's orders still gets their own
		let own = h
			.lifecycle
			.list_orders(
				customer(),
				OrderFilter {
					user_id: Some(crate::test_support::other_customer().id),
					..Default::default()
				},
				Pagination::default(),
			)
			.await
			.unwrap();
		assert_eq!(own.total, 2);
		assert_eq!(
			own.orders.iter().map(|o| o.id).collect::<Vec<_>>(),
			vec![second.id, first.id]
		);

		let all = h
			.lifecycle
			.list_orders(admin(), OrderFilter::default(), Pagination { skip: 1, limit: 1 })
			.await
			.unwrap();
		assert_eq!(all.total, 3);
		assert_eq!(all.orders.len(), 1);
		assert_eq!((all.skip, all.limit), (1, 1));

		let expensive = h
			.lifecycle
			.list_orders(
				admin(),
				OrderFilter {
					min_price: Some(Decimal::from(1000)),
					..Default::default()
				},
				Pagination::default(),
			)
			.await
			.unwrap();
		assert_eq!(expensive.total, 1);

		let too_big = h
			.lifecycle
			.list_orders(admin(), OrderFilter::default(), Pagination { skip: 0, limit: 101 })
			.await;
		assert!(matches!(too_big, Err(OrderError::Validation(_))));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_updates_have_one_winner() {
		let h = Harness::new();
		let order = h.create_laptop_order(1).await;
		let lifecycle = h.lifecycle.clone();

		let attempts = (2..=9u32).map(|quantity| {
			let lifecycle = lifecycle.clone();
			tokio::spawn(async move {
				lifecycle
					.update_order(
						customer(),
						order.id,
						OrderPatch {
							quantity: Some(quantity),
							shipping_address: None,
							expected_version: Some(1),
						},
					)
					.await
			})
		});
		let results: Vec<_> = futures::future::join_all(attempts)
			.await
			.into_iter()
			.map(|joined| joined.unwrap())
			.collect();

		let winners: Vec<&Order> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
		assert_eq!(winners.len(), 1);
		assert!(results
			.iter()
			.filter_map(|r| r.as_ref().err())
			.all(|e| matches!(e, OrderError::Conflict(_))));

		let stored = h.store.get_order(order.id).await.unwrap();
		assert_eq!(stored.version, 2);
		assert_eq!(stored.quantity, winners[0].quantity);
		assert_eq!(
			stored.total_price,
			Decimal::from(500) * Decimal::from(stored.quantity)
		);
		assert_eq!(h.store.events_for_order(order.id).await.unwrap().len(), 2);
	}
}
