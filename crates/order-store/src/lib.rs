//! Order store module for the order pipeline.
//!
//! The store is the system of record for orders and users, and it also holds
//! the event outbox and the consumer's processed-event records. Every order
//! mutation is committed together with exactly one outbox row: either both
//! become visible or neither does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_types::{
	ConfigSchema, EventDraft, EventId, ImplementationRegistry, Order, OrderFilter, OrderId,
	OutboxEvent, Pagination, PublicationStatus, User, UserId,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The requested record does not exist.
	#[error("Not found: {0}")]
	NotFound(String),
	/// The record changed since the caller read it.
	#[error("Version conflict: {0}")]
	Conflict(String),
	/// A uniqueness constraint would be violated.
	#[error("Duplicate: {0}")]
	Duplicate(String),
	/// The backend failed; the transaction was rolled back.
	#[error("Backend error: {0}")]
	Backend(String),
	/// A fault armed through fault injection fired.
	#[error("Injected failure at {0:?}")]
	Injected(FailPoint),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Points at which a test can make the store fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
	/// After the order row is written, before its outbox row.
	BeforeOutboxWrite,
	/// When the publisher marks a row published, after the broker acknowledged.
	MarkPublished,
}

/// Fields of an order that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewOrderRecord {
	pub user_id: UserId,
	pub product_id: String,
	pub quantity: u32,
	pub unit_price: Decimal,
	pub customer_email: String,
	pub shipping_address: Option<String>,
}

/// The order half of a transactional commit.
#[derive(Debug, Clone)]
pub enum OrderWrite {
	/// Insert a new order in `CREATED` state.
	Insert(NewOrderRecord),
	/// Replace an order, provided the stored version still equals
	/// `expected_version`.
	Update { order: Order, expected_version: u64 },
}

/// Outcome of a failed publish attempt, written by the publisher.
#[derive(Debug, Clone)]
pub struct PublishFailure {
	/// Total failed attempts including this one.
	pub attempts: u32,
	pub error: String,
	/// `Pending` while attempts remain, `Failed` once the ceiling is reached.
	pub status: PublicationStatus,
	pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Trait defining the interface for order store backends.
///
/// Implementations must make `commit` atomic: the order write and the outbox
/// row are committed together or not at all.
#[async_trait]
pub trait StoreInterface: Send + Sync {
	/// Writes an order and records the event describing the write.
	///
	/// Returns the committed order and the new outbox row. On update the
	/// order's version is bumped and `updated_at` refreshed.
	async fn commit(
		&self,
		write: OrderWrite,
		event: EventDraft,
	) -> Result<(Order, OutboxEvent), StoreError>;

	async fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError>;

	/// Returns one page of matching orders, newest first, and the number of
	/// matches across all pages.
	async fn list_orders(
		&self,
		filter: &OrderFilter,
		pagination: Pagination,
	) -> Result<(Vec<Order>, usize), StoreError>;

	async fn insert_user(&self, user: User) -> Result<(), StoreError>;

	async fn get_user(&self, user_id: UserId) -> Result<User, StoreError>;

	/// Returns up to `limit` outbox rows that may be published at `now`, by
	/// ascending id.
	///
	/// A row is withheld while an earlier row of the same order is still
	/// unpublished, so an order's events reach the broker in commit order.
	async fn fetch_publishable(
		&self,
		limit: usize,
		now: DateTime<Utc>,
	) -> Result<Vec<OutboxEvent>, StoreError>;

	async fn mark_published(&self, event_id: EventId, at: DateTime<Utc>)
		-> Result<(), StoreError>;

	async fn record_publish_failure(
		&self,
		event_id: EventId,
		failure: PublishFailure,
	) -> Result<OutboxEvent, StoreError>;

	/// Moves a FAILED row back to PENDING with a fresh attempt budget.
	async fn requeue_failed(&self, event_id: EventId) -> Result<OutboxEvent, StoreError>;

	async fn failed_events(&self) -> Result<Vec<OutboxEvent>, StoreError>;

	async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEvent>, StoreError>;

	async fn is_processed(&self, event_id: EventId) -> Result<bool, StoreError>;

	/// Records an applied event. Returns false if it was already recorded.
	async fn record_processed(
		&self,
		event_id: EventId,
		at: DateTime<Utc>,
	) -> Result<bool, StoreError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for store factory functions.
pub type StoreFactory = fn(&toml::Value) -> Result<Box<dyn StoreInterface>, StoreError>;

/// Registry trait for store implementations.
pub trait StoreRegistry: ImplementationRegistry<Factory = StoreFactory> {}

/// Get all registered store implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StoreFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}

/// High-level store service used by the pipeline components.
///
/// Wraps a backend and offers the operations in the shape the lifecycle,
/// publisher and consumer use them.
pub struct StoreService {
	backend: Box<dyn StoreInterface>,
}

impl StoreService {
	pub fn new(backend: Box<dyn StoreInterface>) -> Self {
		Self { backend }
	}

	/// Inserts a new order together with its creation event.
	pub async fn create_order(
		&self,
		record: NewOrderRecord,
		event: EventDraft,
	) -> Result<(Order, OutboxEvent), StoreError> {
		self.backend.commit(OrderWrite::Insert(record), event).await
	}

	/// Writes a modified order read at `expected_version` with its event.
	pub async fn update_order(
		&self,
		order: Order,
		expected_version: u64,
		event: EventDraft,
	) -> Result<(Order, OutboxEvent), StoreError> {
		self.backend
			.commit(
				OrderWrite::Update {
					order,
					expected_version,
				},
				event,
			)
			.await
	}

	pub async fn get_order(&self, order_id: OrderId) -> Result<Order, StoreError> {
		self.backend.get_order(order_id).await
	}

	pub async fn list_orders(
		&self,
		filter: &OrderFilter,
		pagination: Pagination,
	) -> Result<(Vec<Order>, usize), StoreError> {
		self.backend.list_orders(filter, pagination).await
	}

	pub async fn insert_user(&self, user: User) -> Result<(), StoreError> {
		self.backend.insert_user(user).await
	}

	pub async fn get_user(&self, user_id: UserId) -> Result<User, StoreError> {
		self.backend.get_user(user_id).await
	}

	pub async fn fetch_publishable(
		&self,
		limit: usize,
		now: DateTime<Utc>,
	) -> Result<Vec<OutboxEvent>, StoreError> {
		self.backend.fetch_publishable(limit, now).await
	}

	pub async fn mark_published(
		&self,
		event_id: EventId,
		at: DateTime<Utc>,
	) -> Result<(), StoreError> {
		self.backend.mark_published(event_id, at).await
	}

	pub async fn record_publish_failure(
		&self,
		event_id: EventId,
		failure: PublishFailure,
	) -> Result<OutboxEvent, StoreError> {
		self.backend.record_publish_failure(event_id, failure).await
	}

	pub async fn requeue_failed(&self, event_id: EventId) -> Result<OutboxEvent, StoreError> {
		self.backend.requeue_failed(event_id).await
	}

	pub async fn failed_events(&self) -> Result<Vec<OutboxEvent>, StoreError> {
		self.backend.failed_events().await
	}

	pub async fn events_for_order(
		&self,
		order_id: OrderId,
	) -> Result<Vec<OutboxEvent>, StoreError> {
		self.backend.events_for_order(order_id).await
	}

	pub async fn is_processed(&self, event_id: EventId) -> Result<bool, StoreError> {
		self.backend.is_processed(event_id).await
	}

	pub async fn record_processed(
		&self,
		event_id: EventId,
		at: DateTime<Utc>,
	) -> Result<bool, StoreError> {
		self.backend.record_processed(event_id, at).await
	}
}
