//! In-memory store backend.
//!
//! All tables live behind a single `RwLock`, so a commit holding the write
//! guard is serialized against every other access. Writes inside a commit are
//! journaled in an undo log and reverted if any later step fails, which makes
//! the order write and its outbox row atomic even when a fault is injected
//! between them.

use crate::{
	FailPoint, NewOrderRecord, OrderWrite, PublishFailure, StoreError, StoreInterface,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_types::{
	ConfigSchema, EventDraft, EventId, EventPayload, Order, OrderFilter, OrderId, OrderStatus,
	OutboxEvent, Pagination, ProcessedEventRecord, PublicationStatus, Schema, SchemaError, User,
	UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
	orders: BTreeMap<OrderId, Order>,
	users: HashMap<UserId, User>,
	outbox: BTreeMap<EventId, OutboxEvent>,
	processed: HashMap<EventId, ProcessedEventRecord>,
	last_order_id: OrderId,
	last_event_id: EventId,
	/// Faults that fire once on their next occurrence.
	armed: HashSet<FailPoint>,
	/// Faults that fire on every occurrence until healed.
	stuck: HashSet<FailPoint>,
}

impl Tables {
	fn trip(&mut self, point: FailPoint) -> Result<(), StoreError> {
		if self.armed.remove(&point) || self.stuck.contains(&point) {
			return Err(StoreError::Injected(point));
		}
		Ok(())
	}
}

/// Reversible step of an open transaction.
enum Undo {
	/// Put back the previous row, or remove the row if there was none.
	Order(OrderId, Option<Order>),
	Event(EventId),
	Counters {
		last_order_id: OrderId,
		last_event_id: EventId,
	},
}

/// Transaction over the locked tables.
struct Transaction<'a> {
	tables: &'a mut Tables,
	undo: Vec<Undo>,
}

impl<'a> Transaction<'a> {
	fn begin(tables: &'a mut Tables) -> Self {
		let counters = Undo::Counters {
			last_order_id: tables.last_order_id,
			last_event_id: tables.last_event_id,
		};
		Self {
			tables,
			undo: vec![counters],
		}
	}

	fn put_order(&mut self, order: Order) {
		let previous = self.tables.orders.insert(order.id, order.clone());
		self.undo.push(Undo::Order(order.id, previous));
	}

	fn append_event(&mut self, order: &Order, draft: EventDraft) -> OutboxEvent {
		self.tables.last_event_id += 1;
		let event = OutboxEvent {
			id: self.tables.last_event_id,
			order_id: order.id,
			kind: draft.kind,
			payload: EventPayload {
				order: order.clone(),
				transition: draft.transition,
			},
			status: PublicationStatus::Pending,
			created_at: order.updated_at,
			attempts: 0,
			last_error: None,
			next_attempt_at: None,
			published_at: None,
		};
		self.tables.outbox.insert(event.id, event.clone());
		self.undo.push(Undo::Event(event.id));
		event
	}

	fn rollback(self) {
		for step in self.undo.into_iter().rev() {
			match step {
				Undo::Order(id, Some(previous)) => {
					self.tables.orders.insert(id, previous);
				},
				Undo::Order(id, None) => {
					self.tables.orders.remove(&id);
				},
				Undo::Event(id) => {
					self.tables.outbox.remove(&id);
				},
				Undo::Counters {
					last_order_id,
					last_event_id,
				} => {
					self.tables.last_order_id = last_order_id;
					self.tables.last_event_id = last_event_id;
				},
			}
		}
	}
}

/// In-memory store implementation.
///
/// Cloning yields another handle to the same tables, which lets tests keep a
/// handle for fault injection after handing the store to the pipeline.
#[derive(Clone, Default)]
pub struct MemoryStore {
	tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Arms a fault that fires on the next pass through `point`.
	pub async fn fail_next(&self, point: FailPoint) {
		self.tables.write().await.armed.insert(point);
	}

	/// Makes every pass through `point` fail until [`MemoryStore::heal`].
	pub async fn fail_always(&self, point: FailPoint) {
		self.tables.write().await.stuck.insert(point);
	}

	/// Clears the faults armed at `point`.
	pub async fn heal(&self, point: FailPoint) {
		let mut tables = self.tables.write().await;
		tables.armed.remove(&point);
		tables.stuck.remove(&point);
	}

	/// Number of rows in the outbox, whatever their status.
	pub async fn outbox_len(&self) -> usize {
		self.tables.read().await.outbox.len()
	}

	/// Number of processed-event records.
	pub async fn processed_len(&self) -> usize {
		self.tables.read().await.processed.len()
	}

	fn apply(tx: &mut Transaction<'_>, write: OrderWrite) -> Result<Order, StoreError> {
		let now = Utc::now();
		let order = match write {
			OrderWrite::Insert(record) => {
				tx.tables.last_order_id += 1;
				new_order(tx.tables.last_order_id, record, now)
			},
			OrderWrite::Update {
				mut order,
				expected_version,
			} => {
				let current = tx
					.tables
					.orders
					.get(&order.id)
					.ok_or_else(|| StoreError::NotFound(format!("order {}", order.id)))?;
				if current.version != expected_version {
					return Err(StoreError::Conflict(format!(
						"order {} is at version {}, expected {}",
						order.id, current.version, expected_version
					)));
				}
				order.version = expected_version + 1;
				order.created_at = current.created_at;
				order.updated_at = now;
				order
			},
		};
		tx.put_order(order.clone());
		Ok(order)
	}

	async fn outbox_row<F>(&self, event_id: EventId, update: F) -> Result<OutboxEvent, StoreError>
	where
		F: FnOnce(&mut OutboxEvent) -> Result<(), StoreError>,
	{
		let mut tables = self.tables.write().await;
		let event = tables
			.outbox
			.get_mut(&event_id)
			.ok_or_else(|| StoreError::NotFound(format!("outbox event {}", event_id)))?;
		update(event)?;
		Ok(event.clone())
	}
}

fn new_order(id: OrderId, record: NewOrderRecord, now: DateTime<Utc>) -> Order {
	let mut order = Order {
		id,
		user_id: record.user_id,
		product_id: record.product_id,
		quantity: record.quantity,
		unit_price: record.unit_price,
		total_price: record.unit_price,
		status: OrderStatus::Created,
		customer_email: record.customer_email,
		shipping_address: record.shipping_address,
		version: 1,
		created_at: now,
		updated_at: now,
	};
	order.recompute_total();
	order
}

#[async_trait]
impl StoreInterface for MemoryStore {
	async fn commit(
		&self,
		write: OrderWrite,
		event: EventDraft,
	) -> Result<(Order, OutboxEvent), StoreError> {
		let mut tables = self.tables.write().await;
		let mut tx = Transaction::begin(&mut tables);

		let order = match Self::apply(&mut tx, write) {
			Ok(order) => order,
			Err(e) => {
				tx.rollback();
				return Err(e);
			},
		};
		if let Err(e) = tx.tables.trip(FailPoint::BeforeOutboxWrite) {
			tx.rollback();
			return Err(e);
		}
		let event = tx.append_event(&order, event);
		Ok((order, event))
	}

	async fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError> {
		let tables = self.tables.read().await;
		tables
			.orders
			.get(&order_id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(format!("order {}", order_id)))
	}

	async fn list_orders(
		&self,
		filter: &OrderFilter,
		pagination: Pagination,
	) -> Result<(Vec<Order>, usize), StoreError> {
		let tables = self.tables.read().await;
		let mut matching: Vec<&Order> = tables
			.orders
			.values()
			.filter(|order| filter.matches(order))
			.collect();
		matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

		let total = matching.len();
		let page = matching
			.into_iter()
			.skip(pagination.skip)
			.take(pagination.limit)
			.cloned()
			.collect();
		Ok((page, total))
	}

	async fn insert_user(&self, user: User) -> Result<(), StoreError> {
		let mut tables = self.tables.write().await;
		if tables.users.contains_key(&user.id) {
			return Err(StoreError::Duplicate(format!("user id {}", user.id)));
		}
		if tables
			.users
			.values()
			.any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
		{
			return Err(StoreError::Duplicate(format!("user email {}", user.email)));
		}
		tables.users.insert(user.id, user);
		Ok(())
	}

	async fn get_user(&self, user_id: UserId) -> Result<User, StoreError> {
		let tables = self.tables.read().await;
		tables
			.users
			.get(&user_id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))
	}

	async fn fetch_publishable(
		&self,
		limit: usize,
		now: DateTime<Utc>,
	) -> Result<Vec<OutboxEvent>, StoreError> {
		let tables = self.tables.read().await;
		let mut blocked = HashSet::new();
		let mut batch = Vec::new();

		for event in tables.outbox.values() {
			if batch.len() >= limit {
				break;
			}
			if event.status == PublicationStatus::Published {
				continue;
			}
			// First unpublished row of its order; anything later waits for it.
			if !blocked.insert(event.order_id) {
				continue;
			}
			if event.is_due(now) {
				batch.push(event.clone());
			}
		}
		Ok(batch)
	}

	async fn mark_published(
		&self,
		event_id: EventId,
		at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.write().await;
		tables.trip(FailPoint::MarkPublished)?;
		let event = tables
			.outbox
			.get_mut(&event_id)
			.ok_or_else(|| StoreError::NotFound(format!("outbox event {}", event_id)))?;
		event.status = PublicationStatus::Published;
		event.published_at = Some(at);
		event.next_attempt_at = None;
		Ok(())
	}

	async fn record_publish_failure(
		&self,
		event_id: EventId,
		failure: PublishFailure,
	) -> Result<OutboxEvent, StoreError> {
		self.outbox_row(event_id, |event| {
			if event.status == PublicationStatus::Published {
				return Err(StoreError::Conflict(format!(
					"outbox event {} is already published",
					event_id
				)));
			}
			event.attempts = failure.attempts;
			event.last_error = Some(failure.error);
			event.status = failure.status;
			event.next_attempt_at = failure.next_attempt_at;
			Ok(())
		})
		.await
	}

	async fn requeue_failed(&self, event_id: EventId) -> Result<OutboxEvent, StoreError> {
		self.outbox_row(event_id, |event| {
			if event.status != PublicationStatus::Failed {
				return Err(StoreError::Conflict(format!(
					"outbox event {} is {:?}, not FAILED",
					event_id, event.status
				)));
			}
			event.status = PublicationStatus::Pending;
			event.attempts = 0;
			event.next_attempt_at = None;
			Ok(())
		})
		.await
	}

	async fn failed_events(&self) -> Result<Vec<OutboxEvent>, StoreError> {
		let tables = self.tables.read().await;
		Ok(tables
			.outbox
			.values()
			.filter(|event| event.status == PublicationStatus::Failed)
			.cloned()
			.collect())
	}

	async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEvent>, StoreError> {
		let tables = self.tables.read().await;
		Ok(tables
			.outbox
			.values()
			.filter(|event| event.order_id == order_id)
			.cloned()
			.collect())
	}

	async fn is_processed(&self, event_id: EventId) -> Result<bool, StoreError> {
		Ok(self.tables.read().await.processed.contains_key(&event_id))
	}

	async fn record_processed(
		&self,
		event_id: EventId,
		at: DateTime<Utc>,
	) -> Result<bool, StoreError> {
		let mut tables = self.tables.write().await;
		if tables.processed.contains_key(&event_id) {
			return Ok(false);
		}
		tables.processed.insert(
			event_id,
			ProcessedEventRecord {
				event_id,
				processed_at: at,
			},
		);
		Ok(true)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStoreSchema)
	}
}

/// Configuration schema for MemoryStore.
pub struct MemoryStoreSchema;

impl ConfigSchema for MemoryStoreSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		// No settings; any table is accepted
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory store from configuration.
///
/// Configuration parameters:
/// - None required for the memory store
pub fn create_store(config: &toml::Value) -> Result<Box<dyn StoreInterface>, StoreError> {
	MemoryStoreSchema
		.validate(config)
		.map_err(|e| StoreError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStore::new()))
}

/// Registry for the memory store implementation.
pub struct Registry;

impl order_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::StoreFactory;

	fn factory() -> Self::Factory {
		create_store
	}
}

impl crate::StoreRegistry for Registry {}
