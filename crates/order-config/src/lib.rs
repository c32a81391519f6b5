//! Configuration module for the order pipeline.
//!
//! This module provides structures and utilities for managing the pipeline
//! configuration. It supports loading configuration from TOML files and
//! validates that every referenced implementation is declared.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use order_types::{Role, UserId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the order pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// System of record for orders, users and the outbox.
	pub store: StoreConfig,
	/// Read cache for order views and list queries.
	pub cache: CacheConfig,
	/// Message broker the outbox is drained to.
	pub broker: BrokerConfig,
	/// Outbox publisher loop.
	#[serde(default)]
	pub publisher: PublisherConfig,
	/// Event consumer loop.
	#[serde(default)]
	pub consumer: ConsumerConfig,
	/// Notification sink used by the consumer.
	pub notification: NotificationConfig,
	/// Product price lookup.
	pub pricing: PricingConfig,
	/// Users created at startup.
	#[serde(default)]
	pub users: Vec<UserSeed>,
	/// HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this instance.
	pub id: String,
}

/// Configuration for the order store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of store implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the read cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
	/// Time-to-live of single order entries.
	#[serde(default = "default_order_ttl_seconds")]
	pub order_ttl_seconds: u64,
	/// Time-to-live of list-query entries.
	#[serde(default = "default_list_ttl_seconds")]
	pub list_ttl_seconds: u64,
	/// Upper bound for any single cache backend call.
	#[serde(default = "default_cache_timeout_ms")]
	pub operation_timeout_ms: u64,
	/// Interval for purging expired entries.
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
}

/// Configuration for the message broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
	/// Topic order events are published to.
	#[serde(default = "default_topic")]
	pub topic: String,
	/// Consumer group of the event consumer.
	#[serde(default = "default_consumer_group")]
	pub consumer_group: String,
	/// Upper bound for a single publish call.
	#[serde(default = "default_publish_timeout_ms")]
	pub publish_timeout_ms: u64,
}

/// Configuration for the outbox publisher.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
	/// Interval between outbox polls when no hint arrives.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Maximum number of rows fetched per poll.
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	/// Attempts before a row is marked FAILED.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Delay before the first retry, doubled on every further failure.
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	/// Upper bound of the retry delay.
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	/// When set, FAILED rows are retried again after this interval instead of
	/// waiting for an operator.
	#[serde(default)]
	pub failed_retry_interval_seconds: Option<u64>,
}

impl Default for PublisherConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: default_poll_interval_ms(),
			batch_size: default_batch_size(),
			max_attempts: default_max_attempts(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
			failed_retry_interval_seconds: None,
		}
	}
}

/// Configuration for the event consumer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerConfig {
	/// Delay before a rejected message is redelivered.
	#[serde(default = "default_requeue_delay_ms")]
	pub requeue_delay_ms: u64,
	/// First retry interval of the in-process sink retry policy.
	#[serde(default = "default_sink_initial_interval_ms")]
	pub sink_initial_interval_ms: u64,
	/// Total time the sink retry policy may spend on one notification.
	#[serde(default = "default_sink_max_elapsed_ms")]
	pub sink_max_elapsed_ms: u64,
}

impl Default for ConsumerConfig {
	fn default() -> Self {
		Self {
			requeue_delay_ms: default_requeue_delay_ms(),
			sink_initial_interval_ms: default_sink_initial_interval_ms(),
			sink_max_elapsed_ms: default_sink_max_elapsed_ms(),
		}
	}
}

/// Configuration for notification sinks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
	/// Sender address rendered into notifications.
	#[serde(default = "default_from_address")]
	pub from_address: String,
}

/// Configuration for product price lookup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// A user created when the service starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserSeed {
	pub id: UserId,
	pub email: String,
	#[serde(default)]
	pub password_hash: String,
	pub role: Role,
	#[serde(default = "default_active")]
	pub active: bool,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Page size used when a list request does not specify one.
	#[serde(default = "default_page_size")]
	pub default_page_size: usize,
	/// Largest page size a list request may ask for.
	#[serde(default = "default_max_page_size")]
	pub max_page_size: usize,
}

fn default_order_ttl_seconds() -> u64 {
	3600 // 1 hour
}

fn default_list_ttl_seconds() -> u64 {
	300
}

fn default_cache_timeout_ms() -> u64 {
	250
}

fn default_cleanup_interval_seconds() -> u64 {
	60
}

fn default_topic() -> String {
	"order-events".to_string()
}

fn default_consumer_group() -> String {
	"order-service-group".to_string()
}

fn default_publish_timeout_ms() -> u64 {
	2000
}

fn default_poll_interval_ms() -> u64 {
	500
}

fn default_batch_size() -> usize {
	50
}

fn default_max_attempts() -> u32 {
	5
}

fn default_initial_backoff_ms() -> u64 {
	200
}

fn default_max_backoff_ms() -> u64 {
	30_000
}

fn default_requeue_delay_ms() -> u64 {
	1000
}

fn default_sink_initial_interval_ms() -> u64 {
	100
}

fn default_sink_max_elapsed_ms() -> u64 {
	5000
}

fn default_from_address() -> String {
	"orders@localhost".to_string()
}

fn default_active() -> bool {
	true
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_page_size() -> usize {
	10
}

fn default_max_page_size() -> usize {
	100
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)));
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

/// Checks that a `primary` implementation is declared in its section.
fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

impl Config {
	/// Loads configuration from a file, resolving includes and environment
	/// variables.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates cross-field constraints that serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		validate_primary("store", &self.store.primary, &self.store.implementations)?;
		validate_primary("cache", &self.cache.primary, &self.cache.implementations)?;
		validate_primary("broker", &self.broker.primary, &self.broker.implementations)?;
		validate_primary(
			"notification",
			&self.notification.primary,
			&self.notification.implementations,
		)?;
		validate_primary(
			"pricing",
			&self.pricing.primary,
			&self.pricing.implementations,
		)?;

		if self.cache.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"Cache cleanup_interval_seconds must be greater than 0".into(),
			));
		}
		if self.cache.operation_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"Cache operation_timeout_ms must be greater than 0".into(),
			));
		}

		if self.broker.topic.is_empty() {
			return Err(ConfigError::Validation("Broker topic cannot be empty".into()));
		}
		if self.broker.publish_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"Broker publish_timeout_ms must be greater than 0".into(),
			));
		}

		if self.publisher.poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"Publisher poll_interval_ms must be greater than 0".into(),
			));
		}
		if self.publisher.batch_size == 0 {
			return Err(ConfigError::Validation(
				"Publisher batch_size must be at least 1".into(),
			));
		}
		if self.publisher.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"Publisher max_attempts must be at least 1".into(),
			));
		}
		if self.publisher.max_backoff_ms < self.publisher.initial_backoff_ms {
			return Err(ConfigError::Validation(
				"Publisher max_backoff_ms cannot be lower than initial_backoff_ms".into(),
			));
		}

		let mut ids = HashSet::new();
		let mut emails = HashSet::new();
		for user in &self.users {
			if !ids.insert(user.id) {
				return Err(ConfigError::Validation(format!(
					"Duplicate user id {} in users",
					user.id
				)));
			}
			if !emails.insert(user.email.to_lowercase()) {
				return Err(ConfigError::Validation(format!(
					"Duplicate user email '{}' in users",
					user.email
				)));
			}
		}

		if let Some(ref api) = self.api {
			if api.default_page_size == 0 || api.default_page_size > api.max_page_size {
				return Err(ConfigError::Validation(format!(
					"API default_page_size must be between 1 and max_page_size ({})",
					api.max_page_size
				)));
			}
		}

		Ok(())
	}

	/// Minimal all-in-memory configuration for tests.
	#[cfg(any(test, feature = "testing"))]
	pub fn for_tests() -> Self {
		TEST_CONFIG
			.parse()
			.unwrap_or_else(|e| panic!("test configuration is invalid: {}", e))
	}
}

#[cfg(any(test, feature = "testing"))]
const TEST_CONFIG: &str = r#"
[service]
id = "test-orders"

[store]
primary = "memory"
[store.implementations.memory]

[cache]
primary = "memory"
[cache.implementations.memory]

[broker]
primary = "memory"
publish_timeout_ms = 200
[broker.implementations.memory]

[publisher]
poll_interval_ms = 20
batch_size = 10
max_attempts = 3
initial_backoff_ms = 10
max_backoff_ms = 40

[consumer]
requeue_delay_ms = 10
sink_initial_interval_ms = 1
sink_max_elapsed_ms = 20

[notification]
primary = "memory"
[notification.implementations.memory]

[pricing]
primary = "catalog"
[pricing.implementations.catalog.products.LAPTOP-001]
price = "500"
stock = 100
[pricing.implementations.catalog.products.PHONE-001]
price = "299.99"
stock = 3

[[users]]
id = 1
email = "admin@example.com"
role = "ADMIN"

[[users]]
id = 2
email = "customer@example.com"
role = "CUSTOMER"

[[users]]
id = 3
email = "other@example.com"
role = "CUSTOMER"
"#;

/// Parses a configuration from a TOML string.
///
/// Environment variables are resolved and the configuration is validated
/// after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
