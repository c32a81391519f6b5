//! Core of the order pipeline.
//!
//! This crate ties the pluggable components together: the order state machine
//! and lifecycle operations that commit order writes with their outbox events,
//! the publisher that moves outbox rows to the broker, the idempotent consumer
//! that turns events into notifications, and the engine and builder that wire
//! and run all of it from configuration.

pub mod builder;
pub mod consumer;
pub mod engine;
mod error;
pub mod lifecycle;
pub mod publisher;
pub mod state;

pub use builder::{BuilderError, OrderBuilder, OrderFactories};
pub use consumer::{ConsumerSettings, EventConsumer, Handled};
pub use engine::{EngineError, OrderEngine};
pub use error::{ErrorCategory, OrderError};
pub use lifecycle::OrderLifecycle;
pub use publisher::{EventPublisher, PublisherSettings};
pub use state::OrderStateMachine;

#[cfg(test)]
pub(crate) mod test_support {
	use crate::consumer::EventConsumer;
	use crate::engine::OrderEngine;
	use crate::lifecycle::OrderLifecycle;
	use crate::publisher::EventPublisher;
	use order_cache::implementations::memory::MemoryCache;
	use order_cache::{CacheLayer, CacheSettings};
	use order_config::Config;
	use order_delivery::implementations::memory::MemoryBroker;
	use order_delivery::DeliveryService;
	use order_notify::implementations::memory::MemorySink;
	use order_notify::NotificationService;
	use order_pricing::implementations::catalog::CatalogPriceLookup;
	use order_pricing::{PriceLookupInterface, PricingService, ProductPrice};
	use order_store::implementations::memory::MemoryStore;
	use order_store::StoreService;
	use order_types::{Caller, NewOrder, Order, Role};
	use rust_decimal::Decimal;
	use std::collections::HashMap;
	use std::sync::Arc;
	use std::time::Duration;

	pub fn admin() -> Caller {
		Caller::new(1, Role::Admin)
	}

	pub fn customer() -> Caller {
		Caller::new(2, Role::Customer)
	}

	pub fn other_customer() -> Caller {
		Caller::new(3, Role::Customer)
	}

	pub fn laptop_order(quantity: u32) -> NewOrder {
		NewOrder {
			product_id: "LAPTOP-001".into(),
			quantity,
			customer_email: "customer@example.com".into(),
			shipping_address: Some("1 Main St".into()),
		}
	}

	/// Engine over in-memory components, keeping handles to their state.
	pub struct Harness {
		pub engine: OrderEngine,
		pub lifecycle: Arc<OrderLifecycle>,
		pub publisher: Arc<EventPublisher>,
		pub consumer: Arc<EventConsumer>,
		pub store: Arc<StoreService>,
		pub cache: Arc<CacheLayer>,
		pub delivery: Arc<DeliveryService>,
		pub memory_store: MemoryStore,
		pub broker: MemoryBroker,
		pub sink: MemorySink,
	}

	impl Harness {
		pub fn new() -> Self {
			let config = Config::for_tests();
			let memory_store = MemoryStore::new();
			let broker = MemoryBroker::new();
			let sink = MemorySink::new();

			let store = Arc::new(StoreService::new(Box::new(memory_store.clone())));
			let cache = Arc::new(CacheLayer::new(
				Box::new(MemoryCache::new()),
				CacheSettings::default(),
			));
			let catalog: Arc<dyn PriceLookupInterface> = Arc::new(CatalogPriceLookup::new([
				ProductPrice {
					product_id: "LAPTOP-001".into(),
					unit_price: Decimal::from(500),
					stock: Some(100),
				},
				ProductPrice {
					product_id: "PHONE-001".into(),
					unit_price: Decimal::new(29999, 2),
					stock: Some(3),
				},
			]));
			let pricing = Arc::new(
				PricingService::new(HashMap::from([("catalog".to_string(), catalog)]), "catalog".into())
					.unwrap(),
			);
			let delivery = Arc::new(DeliveryService::new(
				Box::new(broker.clone()),
				config.broker.topic.clone(),
				Duration::from_millis(config.broker.publish_timeout_ms),
			));
			let notifications = Arc::new(NotificationService::new(
				Box::new(sink.clone()),
				config.notification.from_address.clone(),
			));

			let engine = OrderEngine::new(
				config,
				store.clone(),
				cache.clone(),
				pricing,
				delivery.clone(),
				notifications,
			);

			Self {
				lifecycle: engine.lifecycle().clone(),
				publisher: engine.publisher().clone(),
				consumer: engine.consumer().clone(),
				engine,
				store,
				cache,
				delivery,
				memory_store,
				broker,
				sink,
			}
		}

		pub async fn create_laptop_order(&self, quantity: u32) -> Order {
			self.lifecycle
				.create_order(customer(), laptop_order(quantity))
				.await
				.unwrap()
		}
	}
}
