//! Read cache for the order pipeline.
//!
//! This module provides the key-value cache backend abstraction and the
//! `CacheLayer`, which implements the consistency policy on top of it:
//! reads populate the cache lazily from the store, writes invalidate, and the
//! cache never becomes the source of truth.

use async_trait::async_trait;
use order_types::{ConfigSchema, ImplementationRegistry};
use std::time::Duration;
use thiserror::Error;

mod layer;

pub use layer::{list_fingerprint, CacheLayer, CacheSettings};

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the cache backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// The backend did not answer within the configured bound.
	#[error("Timed out after {0:?}")]
	Timeout(Duration),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for cache backends.
///
/// Backends store opaque bytes under string keys with an optional
/// time-to-live. An expired entry must read as absent.
#[async_trait]
pub trait CacheInterface: Send + Sync {
	/// Returns the value stored under `key`, or `None` on a miss.
	async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), CacheError>;

	async fn delete(&self, key: &str) -> Result<(), CacheError>;

	/// Deletes every key starting with `prefix`. Returns the number removed.
	async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

	/// Drops every entry.
	async fn clear(&self) -> Result<(), CacheError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries. Backends that expire entries on their own
	/// can return Ok(0).
	async fn cleanup_expired(&self) -> Result<usize, CacheError> {
		Ok(0)
	}
}

/// Type alias for cache factory functions.
pub type CacheFactory = fn(&toml::Value) -> Result<Box<dyn CacheInterface>, CacheError>;

/// Registry trait for cache implementations.
pub trait CacheRegistry: ImplementationRegistry<Factory = CacheFactory> {}

/// Get all registered cache implementations.
pub fn get_all_implementations() -> Vec<(&'static str, CacheFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}
