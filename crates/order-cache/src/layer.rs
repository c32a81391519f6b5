//! Read-through, invalidate-on-write cache policy.
//!
//! Keys:
//! - `order:{id}` holds one order view.
//! - `orders:list:{fingerprint}` holds one page of a list query.
//!
//! Every backend call is bounded by a timeout. A failed or timed-out call
//! degrades to a cache miss (reads) or a logged warning (writes and
//! invalidations); it is never returned to the caller.
//!
//! A reader that loaded from the store before a concurrent write committed
//! could otherwise put a stale value back after the writer invalidated. To
//! rule that out, invalidation bumps an epoch before deleting, and a reader
//! re-checks the epoch it captured before loading once its value is stored,
//! deleting its own entry if the epoch moved. Order epochs live in a fixed
//! set of stripes keyed by order id; orders sharing a stripe only cause extra
//! misses.

use crate::{CacheError, CacheInterface};
use order_types::{CacheNamespace, Order, OrderFilter, OrderId, OrderPage, Pagination};
use serde::{de::DeserializeOwned, Serialize};
use sha3::{Digest, Sha3_256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of epoch counters shared by all orders.
const EPOCH_STRIPES: usize = 1024;

/// Time bounds applied by the cache layer.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
	pub order_ttl: Duration,
	pub list_ttl: Duration,
	pub operation_timeout: Duration,
}

impl Default for CacheSettings {
	fn default() -> Self {
		Self {
			order_ttl: Duration::from_secs(3600),
			list_ttl: Duration::from_secs(300),
			operation_timeout: Duration::from_millis(250),
		}
	}
}

/// Which epoch guards a cache entry.
#[derive(Clone, Copy)]
enum Guard {
	Order(OrderId),
	Lists,
}

/// Cache of order views and list pages in front of the order store.
pub struct CacheLayer {
	backend: Box<dyn CacheInterface>,
	settings: CacheSettings,
	order_epochs: Box<[AtomicU64]>,
	list_epoch: AtomicU64,
}

impl CacheLayer {
	pub fn new(backend: Box<dyn CacheInterface>, settings: CacheSettings) -> Self {
		Self {
			backend,
			settings,
			order_epochs: (0..EPOCH_STRIPES).map(|_| AtomicU64::new(0)).collect(),
			list_epoch: AtomicU64::new(0),
		}
	}

	/// Returns the order from the cache, loading and caching it on a miss.
	pub async fn get_order<F, Fut, E>(&self, order_id: OrderId, load: F) -> Result<Order, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Order, E>>,
	{
		let key = CacheNamespace::Orders.key(&order_id.to_string());
		self.read_through(key, Guard::Order(order_id), self.settings.order_ttl, load)
			.await
	}

	/// Returns a list page from the cache, loading and caching it on a miss.
	///
	/// The filter must already carry the caller's scope, so that two callers
	/// with different visibility never share an entry.
	pub async fn list_orders<F, Fut, E>(
		&self,
		filter: &OrderFilter,
		pagination: Pagination,
		load: F,
	) -> Result<OrderPage, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<OrderPage, E>>,
	{
		let key = CacheNamespace::OrderLists.key(&list_fingerprint(filter, pagination));
		self.read_through(key, Guard::Lists, self.settings.list_ttl, load)
			.await
	}

	/// Drops the cached view of `order_id` and every cached list page.
	///
	/// Called after a committed write. Failures are logged only.
	pub async fn invalidate_order(&self, order_id: OrderId) {
		self.order_epoch(order_id).fetch_add(1, Ordering::SeqCst);
		self.list_epoch.fetch_add(1, Ordering::SeqCst);

		let key = CacheNamespace::Orders.key(&order_id.to_string());
		if let Err(e) = self.bounded(self.backend.delete(&key)).await {
			warn!(order_id, error = %e, "Failed to invalidate cached order");
		}
		self.invalidate_lists().await;
	}

	async fn invalidate_lists(&self) {
		let prefix = CacheNamespace::OrderLists.prefix();
		match self.bounded(self.backend.delete_prefix(&prefix)).await {
			Ok(removed) => debug!(removed, "Invalidated cached order lists"),
			Err(e) => warn!(error = %e, "Failed to invalidate cached order lists"),
		}
	}

	/// Drops every entry. Reads fall back to the store until repopulated.
	pub async fn clear(&self) {
		self.list_epoch.fetch_add(1, Ordering::SeqCst);
		for epoch in self.order_epochs.iter() {
			epoch.fetch_add(1, Ordering::SeqCst);
		}
		if let Err(e) = self.bounded(self.backend.clear()).await {
			warn!(error = %e, "Failed to clear cache");
		}
	}

	/// Purges expired entries from the backend.
	pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
		self.bounded(self.backend.cleanup_expired()).await
	}

	async fn read_through<T, F, Fut, E>(
		&self,
		key: String,
		guard: Guard,
		ttl: Duration,
		load: F,
	) -> Result<T, E>
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		match self.bounded(self.backend.get_bytes(&key)).await {
			Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
				Ok(value) => {
					debug!(key = %key, "Cache hit");
					return Ok(value);
				},
				Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
			},
			Ok(None) => debug!(key = %key, "Cache miss"),
			Err(e) => warn!(key = %key, error = %e, "Cache read failed, using store"),
		}

		let observed = self.epoch(guard);
		let value = load().await?;

		let bytes = match serde_json::to_vec(&value) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!(key = %key, error = %e, "Failed to serialize cache entry");
				return Ok(value);
			},
		};
		if let Err(e) = self
			.bounded(self.backend.set_bytes(&key, bytes, Some(ttl)))
			.await
		{
			warn!(key = %key, error = %e, "Cache write failed");
			return Ok(value);
		}

		if self.epoch(guard) != observed {
			debug!(key = %key, "Write raced with invalidation, dropping entry");
			if let Err(e) = self.bounded(self.backend.delete(&key)).await {
				warn!(key = %key, error = %e, "Failed to drop raced cache entry");
			}
		}
		Ok(value)
	}

	fn epoch(&self, guard: Guard) -> u64 {
		match guard {
			Guard::Order(order_id) => self.order_epoch(order_id).load(Ordering::SeqCst),
			Guard::Lists => self.list_epoch.load(Ordering::SeqCst),
		}
	}

	fn order_epoch(&self, order_id: OrderId) -> &AtomicU64 {
		&self.order_epochs[(order_id % EPOCH_STRIPES as u64) as usize]
	}

	async fn bounded<T, Fut>(&self, call: Fut) -> Result<T, CacheError>
	where
		Fut: Future<Output = Result<T, CacheError>>,
	{
		tokio::time::timeout(self.settings.operation_timeout, call)
			.await
			.map_err(|_| CacheError::Timeout(self.settings.operation_timeout))?
	}
}

/// Stable key for a list query.
///
/// Equal queries yield equal fingerprints however their decimal bounds are
/// written.
pub fn list_fingerprint(filter: &OrderFilter, pagination: Pagination) -> String {
	let normalized = OrderFilter {
		min_price: filter.min_price.map(|p| p.normalize()),
		max_price: filter.max_price.map(|p| p.normalize()),
		..filter.clone()
	};
	// Serializing these plain structs cannot fail
	let bytes = serde_json::to_vec(&(normalized, pagination)).unwrap_or_default();
	hex::encode(Sha3_256::digest(&bytes))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryCache;
	use async_trait::async_trait;
	use chrono::Utc;
	use order_types::{ConfigSchema, OrderStatus, Schema, SchemaError};
	use rust_decimal::Decimal;
	use std::str::FromStr;
	use std::sync::atomic::AtomicUsize;
	use std::sync::Arc;
	use tokio::sync::{Mutex, Notify};

	fn order(id: OrderId, quantity: u32) -> Order {
		let now = Utc::now();
		let mut order = Order {
			id,
			user_id: 2,
			product_id: "LAPTOP-001".into(),
			quantity,
			unit_price: Decimal::from(500),
			total_price: Decimal::ZERO,
			status: OrderStatus::Created,
			customer_email: "customer@example.com".into(),
			shipping_address: None,
			version: 1,
			created_at: now,
			updated_at: now,
		};
		order.recompute_total();
		order
	}

	fn layer(cache: &MemoryCache) -> CacheLayer {
		CacheLayer::new(Box::new(cache.clone()), CacheSettings::default())
	}

	/// Backend whose every call fails.
	struct BrokenCache;

	#[async_trait]
	impl CacheInterface for BrokenCache {
		async fn get_bytes(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
			Err(CacheError::Backend("connection refused".into()))
		}
		async fn set_bytes(
			&self,
			_key: &str,
			_value: Vec<u8>,
			_ttl: Option<Duration>,
		) -> Result<(), CacheError> {
			Err(CacheError::Backend("connection refused".into()))
		}
		async fn delete(&self, _key: &str) -> Result<(), CacheError> {
			Err(CacheError::Backend("connection refused".into()))
		}
		async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
			Err(CacheError::Backend("connection refused".into()))
		}
		async fn clear(&self) -> Result<(), CacheError> {
			Err(CacheError::Backend("connection refused".into()))
		}
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			struct Empty;
			impl ConfigSchema for Empty {
				fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
					Schema::new(vec![], vec![]).validate(config)
				}
			}
			Box::new(Empty)
		}
	}

	/// Backend that never answers reads.
	struct HangingCache;

	#[async_trait]
	impl CacheInterface for HangingCache {
		async fn get_bytes(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
			std::future::pending().await
		}
		async fn set_bytes(
			&self,
			_key: &str,
			_value: Vec<u8>,
			_ttl: Option<Duration>,
		) -> Result<(), CacheError> {
			std::future::pending().await
		}
		async fn delete(&self, _key: &str) -> Result<(), CacheError> {
			std::future::pending().await
		}
		async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
			std::future::pending().await
		}
		async fn clear(&self) -> Result<(), CacheError> {
			std::future::pending().await
		}
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			BrokenCache.config_schema()
		}
	}

	#[tokio::test]
	async fn test_read_through_populates_once() {
		let cache = MemoryCache::new();
		let layer = layer(&cache);
		let loads = AtomicUsize::new(0);

		for _ in 0..3 {
			let loaded = layer
				.get_order(1, || async {
					loads.fetch_add(1, Ordering::SeqCst);
					Ok::<_, String>(order(1, 2))
				})
				.await
				.unwrap();
			assert_eq!(loaded.total_price, Decimal::from(1000));
		}
		assert_eq!(loads.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_load_error_is_returned_and_not_cached() {
		let cache = MemoryCache::new();
		let layer = layer(&cache);

		let result = layer
			.get_order(1, || async { Err::<Order, _>("not found") })
			.await;
		assert_eq!(result.unwrap_err(), "not found");
		assert!(cache.is_empty().await);
	}

	#[tokio::test]
	async fn test_invalidate_drops_order_and_lists() {
		let cache = MemoryCache::new();
		let layer = layer(&cache);
		layer
			.get_order(1, || async { Ok::<_, String>(order(1, 2)) })
			.await
			.unwrap();
		layer
			.list_orders(&OrderFilter::default(), Pagination::default(), || async {
				Ok::<_, String>(OrderPage {
					orders: vec![order(1, 2)],
					total: 1,
					skip: 0,
					limit: 10,
				})
			})
			.await
			.unwrap();
		assert_eq!(cache.len().await, 2);

		layer.invalidate_order(1).await;
		assert!(cache.is_empty().await);

		let fresh = layer
			.get_order(1, || async { Ok::<_, String>(order(1, 5)) })
			.await
			.unwrap();
		assert_eq!(fresh.quantity, 5);
	}

	#[tokio::test]
	async fn test_stale_load_racing_invalidation_is_dropped() {
		let cache = MemoryCache::new();
		let layer = Arc::new(layer(&cache));
		let loaded = Arc::new(Notify::new());
		let release = Arc::new(Notify::new());

		let reader = {
			let layer = layer.clone();
			let loaded = loaded.clone();
			let release = release.clone();
			tokio::spawn(async move {
				layer
					.get_order(1, || async move {
						// Read the pre-write row, then stall until the writer is done
						let stale = order(1, 2);
						loaded.notify_one();
						release.notified().await;
						Ok::<_, String>(stale)
					})
					.await
			})
		};

		loaded.notified().await;
		layer.invalidate_order(1).await;
		release.notify_one();
		assert_eq!(reader.await.unwrap().unwrap().quantity, 2);

		// The stale value must not have survived in the cache
		let next = layer
			.get_order(1, || async { Ok::<_, String>(order(1, 7)) })
			.await
			.unwrap();
		assert_eq!(next.quantity, 7);
	}

	#[tokio::test]
	async fn test_epochs_stay_bounded_across_many_orders() {
		let cache = MemoryCache::new();
		let layer = layer(&cache);

		for order_id in 0..5_000 {
			layer.invalidate_order(order_id).await;
		}
		assert_eq!(layer.order_epochs.len(), EPOCH_STRIPES);

		// Order 1 and order 1 + EPOCH_STRIPES share a stripe
		let shared = 1 + EPOCH_STRIPES as u64;
		let before = layer.epoch(Guard::Order(1));
		layer.invalidate_order(shared).await;
		assert_eq!(layer.epoch(Guard::Order(1)), before + 1);
		assert_eq!(
			layer.epoch(Guard::Order(2)),
			layer.epoch(Guard::Order(2 + EPOCH_STRIPES as u64))
		);
	}

	#[tokio::test]
	async fn test_read_after_clear_reflects_store() {
		let cache = MemoryCache::new();
		let layer = layer(&cache);
		let current = Mutex::new(order(1, 2));

		layer
			.get_order(1, || async { Ok::<_, String>(current.lock().await.clone()) })
			.await
			.unwrap();
		*current.lock().await = order(1, 4);
		layer.invalidate_order(1).await;
		layer.clear().await;

		let seen = layer
			.get_order(1, || async { Ok::<_, String>(current.lock().await.clone()) })
			.await
			.unwrap();
		assert_eq!(seen.quantity, 4);
	}

	#[tokio::test]
	async fn test_broken_backend_falls_back_to_store() {
		let layer = CacheLayer::new(Box::new(BrokenCache), CacheSettings::default());
		let loaded = layer
			.get_order(3, || async { Ok::<_, String>(order(3, 1)) })
			.await
			.unwrap();
		assert_eq!(loaded.id, 3);
		layer.invalidate_order(3).await;
		assert!(layer.cleanup_expired().await.is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn test_hanging_backend_is_bounded() {
		let layer = CacheLayer::new(Box::new(HangingCache), CacheSettings::default());
		let loaded = layer
			.get_order(3, || async { Ok::<_, String>(order(3, 1)) })
			.await
			.unwrap();
		assert_eq!(loaded.id, 3);
		layer.invalidate_order(3).await;
	}

	#[test]
	fn test_fingerprint_normalizes_decimals() {
		let a = OrderFilter {
			min_price: Some(Decimal::from_str("10.00").unwrap()),
			..Default::default()
		};
		let b = OrderFilter {
			min_price: Some(Decimal::from_str("10").unwrap()),
			..Default::default()
		};
		let page = Pagination::default();
		assert_eq!(list_fingerprint(&a, page), list_fingerprint(&b, page));

		let other_page = Pagination { skip: 10, limit: 10 };
		assert_ne!(list_fingerprint(&a, page), list_fingerprint(&a, other_page));

		let scoped = OrderFilter {
			user_id: Some(2),
			..a.clone()
		};
		assert_ne!(list_fingerprint(&a, page), list_fingerprint(&scoped, page));
	}
}
