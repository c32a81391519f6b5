//! Order engine that wires the pipeline together and runs its workers.
//!
//! The engine owns the shared services and the lifecycle entry point, and
//! drives three background tasks: the outbox publisher, the event consumer
//! and periodic cache cleanup. All of them stop on a shared shutdown signal.

use crate::consumer::{ConsumerSettings, EventConsumer};
use crate::lifecycle::OrderLifecycle;
use crate::publisher::{EventPublisher, PublisherSettings};
use order_cache::CacheLayer;
use order_config::Config;
use order_delivery::DeliveryService;
use order_notify::NotificationService;
use order_pricing::PricingService;
use order_store::StoreService;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Page size bound used when no API section is configured.
const DEFAULT_MAX_PAGE_SIZE: usize = 100;

/// Errors that can occur while the engine is running.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Service error: {0}")]
	Service(String),
}

/// Main engine of the order pipeline.
#[derive(Clone)]
pub struct OrderEngine {
	config: Config,
	store: Arc<StoreService>,
	cache: Arc<CacheLayer>,
	delivery: Arc<DeliveryService>,
	lifecycle: Arc<OrderLifecycle>,
	publisher: Arc<EventPublisher>,
	consumer: Arc<EventConsumer>,
	shutdown: Arc<watch::Sender<bool>>,
}

impl OrderEngine {
	pub fn new(
		config: Config,
		store: Arc<StoreService>,
		cache: Arc<CacheLayer>,
		pricing: Arc<PricingService>,
		delivery: Arc<DeliveryService>,
		notifications: Arc<NotificationService>,
	) -> Self {
		let outbox_hint = Arc::new(Notify::new());
		let max_page_size = config
			.api
			.as_ref()
			.map_or(DEFAULT_MAX_PAGE_SIZE, |api| api.max_page_size);

		let lifecycle = Arc::new(OrderLifecycle::new(
			store.clone(),
			cache.clone(),
			pricing,
			outbox_hint.clone(),
			max_page_size,
		));
		let publisher = Arc::new(EventPublisher::new(
			store.clone(),
			delivery.clone(),
			PublisherSettings::from(&config.publisher),
			outbox_hint,
		));
		let consumer = Arc::new(EventConsumer::new(
			store.clone(),
			delivery.clone(),
			notifications,
			ConsumerSettings::from_config(&config.broker, &config.consumer),
		));
		let (shutdown, _) = watch::channel(false);

		Self {
			config,
			store,
			cache,
			delivery,
			lifecycle,
			publisher,
			consumer,
			shutdown: Arc::new(shutdown),
		}
	}

	/// Runs the background workers until ctrl-c or [`OrderEngine::shutdown`].
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut stop = self.shutdown.subscribe();

		let publisher = self.publisher.clone();
		let publisher_stop = self.shutdown.subscribe();
		let publisher_handle = tokio::spawn(async move { publisher.run(publisher_stop).await });

		let consumer = self.consumer.clone();
		let consumer_stop = self.shutdown.subscribe();
		let mut consumer_handle = tokio::spawn(async move { consumer.run(consumer_stop).await });

		let cache = self.cache.clone();
		let mut cleanup_stop = self.shutdown.subscribe();
		let cleanup_every = Duration::from_secs(self.config.cache.cleanup_interval_seconds);
		let cleanup_handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(cleanup_every);
			loop {
				tokio::select! {
					_ = interval.tick() => {},
					_ = cleanup_stop.changed() => break,
				}
				match cache.cleanup_expired().await {
					Ok(count) if count > 0 => debug!(count, "Cache cleanup removed expired entries"),
					Ok(_) => {},
					Err(e) => warn!(error = %e, "Cache cleanup failed"),
				}
			}
		});

		info!(service_id = %self.config.service.id, topic = %self.delivery.topic(), "Order engine running");

		let consumer_result = tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("Shutdown signal received");
				None
			}
			_ = stop.wait_for(|stopped| *stopped) => None,
			joined = &mut consumer_handle => Some(joined),
		};

		self.shutdown.send_replace(true);
		let consumer_result = match consumer_result {
			Some(joined) => joined,
			None => consumer_handle.await,
		};
		let _ = publisher_handle.await;
		let _ = cleanup_handle.await;
		info!("Order engine stopped");

		match consumer_result {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => Err(EngineError::Service(format!("Event consumer failed: {}", e))),
			Err(e) => Err(EngineError::Service(format!("Event consumer panicked: {}", e))),
		}
	}

	/// Signals every worker to stop; `run` returns once they have.
	pub fn shutdown(&self) {
		self.shutdown.send_replace(true);
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn lifecycle(&self) -> &Arc<OrderLifecycle> {
		&self.lifecycle
	}

	pub fn publisher(&self) -> &Arc<EventPublisher> {
		&self.publisher
	}

	pub fn consumer(&self) -> &Arc<EventConsumer> {
		&self.consumer
	}

	pub fn store(&self) -> &Arc<StoreService> {
		&self.store
	}

	pub fn cache(&self) -> &Arc<CacheLayer> {
		&self.cache
	}

	pub fn delivery(&self) -> &Arc<DeliveryService> {
		&self.delivery
	}
}
