//! In-memory cache backend.
//!
//! Entries carry an optional deadline and read as absent once it has passed.
//! Expired entries are only reclaimed by `cleanup_expired`.

use crate::{CacheError, CacheInterface};
use async_trait::async_trait;
use order_types::{ConfigSchema, Field, FieldType, Schema, SchemaError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.is_none_or(|deadline| deadline > now)
	}
}

/// In-memory cache implementation.
#[derive(Clone, Default)]
pub struct MemoryCache {
	entries: Arc<RwLock<HashMap<String, Entry>>>,
	/// Upper bound on the number of entries; `None` for unbounded.
	max_entries: Option<usize>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_entries(max_entries: usize) -> Self {
		Self {
			entries: Arc::default(),
			max_entries: Some(max_entries),
		}
	}

	/// Number of stored entries, expired or not.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}

#[async_trait]
impl CacheInterface for MemoryCache {
	async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		let entries = self.entries.read().await;
		let now = Instant::now();
		Ok(entries
			.get(key)
			.filter(|entry| entry.is_live(now))
			.map(|entry| entry.value.clone()))
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), CacheError> {
		let mut entries = self.entries.write().await;
		let now = Instant::now();
		if let Some(max) = self.max_entries {
			if entries.len() >= max && !entries.contains_key(key) {
				entries.retain(|_, entry| entry.is_live(now));
				if entries.len() >= max {
					return Err(CacheError::Backend(format!(
						"cache is full ({} entries)",
						max
					)));
				}
			}
		}
		entries.insert(
			key.to_string(),
			Entry {
				value,
				expires_at: ttl.map(|ttl| now + ttl),
			},
		);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), CacheError> {
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
		let mut entries = self.entries.write().await;
		let before = entries.len();
		entries.retain(|key, _| !key.starts_with(prefix));
		Ok(before - entries.len())
	}

	async fn clear(&self) -> Result<(), CacheError> {
		self.entries.write().await.clear();
		Ok(())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryCacheSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, CacheError> {
		let mut entries = self.entries.write().await;
		let now = Instant::now();
		let before = entries.len();
		entries.retain(|_, entry| entry.is_live(now));
		Ok(before - entries.len())
	}
}

/// Configuration schema for MemoryCache.
pub struct MemoryCacheSchema;

impl ConfigSchema for MemoryCacheSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"max_entries",
				FieldType::Integer {
					min: Some(1),
					max: None,
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create a memory cache from configuration.
///
/// Configuration parameters:
/// - `max_entries` (optional): refuse new keys beyond this many live entries
pub fn create_cache(config: &toml::Value) -> Result<Box<dyn CacheInterface>, CacheError> {
	MemoryCacheSchema
		.validate(config)
		.map_err(|e| CacheError::Configuration(e.to_string()))?;

	let cache = match config.get("max_entries").and_then(|v| v.as_integer()) {
		Some(max) => MemoryCache::with_max_entries(max as usize),
		None => MemoryCache::new(),
	};
	Ok(Box::new(cache))
}

/// Registry for the memory cache implementation.
pub struct Registry;

impl order_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::CacheFactory;

	fn factory() -> Self::Factory {
		create_cache
	}
}

impl crate::CacheRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn test_entries_expire() {
		let cache = MemoryCache::new();
		cache
			.set_bytes("order:1", b"v".to_vec(), Some(Duration::from_secs(10)))
			.await
			.unwrap();
		cache.set_bytes("order:2", b"w".to_vec(), None).await.unwrap();

		assert_eq!(cache.get_bytes("order:1").await.unwrap(), Some(b"v".to_vec()));
		tokio::time::advance(Duration::from_secs(11)).await;
		assert_eq!(cache.get_bytes("order:1").await.unwrap(), None);
		assert_eq!(cache.get_bytes("order:2").await.unwrap(), Some(b"w".to_vec()));

		assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
		assert_eq!(cache.len().await, 1);
	}

	#[tokio::test]
	async fn test_delete_prefix() {
		let cache = MemoryCache::new();
		for key in ["orders:list:a", "orders:list:b", "order:1"] {
			cache.set_bytes(key, vec![1], None).await.unwrap();
		}

		assert_eq!(cache.delete_prefix("orders:list:").await.unwrap(), 2);
		assert!(cache.get_bytes("order:1").await.unwrap().is_some());
		assert!(cache.get_bytes("orders:list:a").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_max_entries() {
		let cache = MemoryCache::with_max_entries(1);
		cache.set_bytes("a", vec![1], None).await.unwrap();
		cache.set_bytes("a", vec![2], None).await.unwrap();
		assert!(matches!(
			cache.set_bytes("b", vec![3], None).await,
			Err(CacheError::Backend(_))
		));
	}

	#[test]
	fn test_factory_rejects_zero_capacity() {
		let config: toml::Value = toml::from_str("max_entries = 0").unwrap();
		assert!(matches!(
			create_cache(&config),
			Err(CacheError::Configuration(_))
		));
	}
}
