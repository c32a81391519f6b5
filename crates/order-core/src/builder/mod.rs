//! Builder pattern for constructing order engines.
//!
//! Composes an [`OrderEngine`] from configuration using factory functions
//! for each pluggable component: store, cache backend, broker, notification
//! sink and price source.

use crate::engine::OrderEngine;
use order_cache::{CacheError, CacheInterface, CacheLayer, CacheSettings};
use order_config::Config;
use order_delivery::{BrokerInterface, DeliveryError, DeliveryService};
use order_notify::{NotificationInterface, NotificationService, SinkError};
use order_pricing::{PriceLookupInterface, PricingError, PricingService};
use order_store::{StoreError, StoreInterface, StoreService};
use order_types::User;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Container for all factory functions needed to build an OrderEngine.
///
/// Each factory takes the TOML section of its implementation and returns the
/// component, validating the section first.
pub struct OrderFactories<SF, CF, BF, NF, PF> {
	pub store_factories: HashMap<String, SF>,
	pub cache_factories: HashMap<String, CF>,
	pub broker_factories: HashMap<String, BF>,
	pub notification_factories: HashMap<String, NF>,
	pub pricing_factories: HashMap<String, PF>,
}

/// Builder for constructing an OrderEngine with pluggable implementations.
pub struct OrderBuilder {
	config: Config,
}

impl OrderBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine and seeds the configured users into the store.
	pub async fn build<SF, CF, BF, NF, PF>(
		self,
		factories: OrderFactories<SF, CF, BF, NF, PF>,
	) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StoreInterface>, StoreError>,
		CF: Fn(&toml::Value) -> Result<Box<dyn CacheInterface>, CacheError>,
		BF: Fn(&toml::Value) -> Result<Box<dyn BrokerInterface>, DeliveryError>,
		NF: Fn(&toml::Value) -> Result<Box<dyn NotificationInterface>, SinkError>,
		PF: Fn(&toml::Value) -> Result<Box<dyn PriceLookupInterface>, PricingError>,
	{
		let config = &self.config;

		let store_backend = take_primary(
			"store",
			&config.store.primary,
			load_implementations(
				"store",
				&config.store.primary,
				&config.store.implementations,
				&factories.store_factories,
			)?,
		)?;
		let store = Arc::new(StoreService::new(store_backend));

		let cache_backend = take_primary(
			"cache",
			&config.cache.primary,
			load_implementations(
				"cache",
				&config.cache.primary,
				&config.cache.implementations,
				&factories.cache_factories,
			)?,
		)?;
		let cache = Arc::new(CacheLayer::new(
			cache_backend,
			CacheSettings {
				order_ttl: Duration::from_secs(config.cache.order_ttl_seconds),
				list_ttl: Duration::from_secs(config.cache.list_ttl_seconds),
				operation_timeout: Duration::from_millis(config.cache.operation_timeout_ms),
			},
		));

		let broker = take_primary(
			"broker",
			&config.broker.primary,
			load_implementations(
				"broker",
				&config.broker.primary,
				&config.broker.implementations,
				&factories.broker_factories,
			)?,
		)?;
		let delivery = Arc::new(DeliveryService::new(
			broker,
			config.broker.topic.clone(),
			Duration::from_millis(config.broker.publish_timeout_ms),
		));

		let sink = take_primary(
			"notification",
			&config.notification.primary,
			load_implementations(
				"notification",
				&config.notification.primary,
				&config.notification.implementations,
				&factories.notification_factories,
			)?,
		)?;
		let notifications = Arc::new(NotificationService::new(
			sink,
			config.notification.from_address.clone(),
		));

		// Every loaded price source stays available behind the primary
		let lookups: HashMap<String, Arc<dyn PriceLookupInterface>> = load_implementations(
			"pricing",
			&config.pricing.primary,
			&config.pricing.implementations,
			&factories.pricing_factories,
		)?
		.into_iter()
		.map(|(name, lookup)| (name, Arc::from(lookup)))
		.collect();
		if lookups.is_empty() {
			return Err(BuilderError::MissingComponent("pricing".into()));
		}
		let pricing = Arc::new(
			PricingService::new(lookups, config.pricing.primary.clone())
				.map_err(|e| BuilderError::Config(e.to_string()))?,
		);

		for seed in &config.users {
			let user = User {
				id: seed.id,
				email: seed.email.clone(),
				password_hash: seed.password_hash.clone(),
				role: seed.role,
				active: seed.active,
			};
			store.insert_user(user).await.map_err(|e| {
				BuilderError::Config(format!("Failed to seed user {}: {}", seed.id, e))
			})?;
		}
		tracing::info!(component = "users", count = config.users.len(), "Loaded");

		Ok(OrderEngine::new(
			self.config,
			store,
			cache,
			pricing,
			delivery,
			notifications,
		))
	}
}

/// Runs the factory of every configured implementation that has one.
fn load_implementations<T, E, F>(
	component: &'static str,
	primary: &str,
	configs: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<HashMap<String, T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<T, E>,
	E: Display,
{
	let mut loaded = HashMap::new();
	for (name, config) in configs {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered, skipping");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				// Validation already happened in the factory
				loaded.insert(name.clone(), implementation);
				let is_primary = name == primary;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}
	Ok(loaded)
}

fn take_primary<T>(
	component: &'static str,
	primary: &str,
	mut loaded: HashMap<String, T>,
) -> Result<T, BuilderError> {
	if loaded.is_empty() {
		return Err(BuilderError::MissingComponent(component.into()));
	}
	loaded.remove(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' failed to load or has invalid configuration",
			component, primary
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use order_types::{NewOrder, Role};

	fn registered<F>(implementations: Vec<(&'static str, F)>) -> HashMap<String, F> {
		implementations
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect()
	}

	fn all_factories() -> OrderFactories<
		order_store::StoreFactory,
		order_cache::CacheFactory,
		order_delivery::BrokerFactory,
		order_notify::NotificationFactory,
		order_pricing::PriceLookupFactory,
	> {
		OrderFactories {
			store_factories: registered(order_store::get_all_implementations()),
			cache_factories: registered(order_cache::get_all_implementations()),
			broker_factories: registered(order_delivery::get_all_implementations()),
			notification_factories: registered(order_notify::get_all_implementations()),
			pricing_factories: registered(order_pricing::get_all_implementations()),
		}
	}

	#[tokio::test]
	async fn test_builds_engine_from_config() {
		let engine = OrderBuilder::new(Config::for_tests())
			.build(all_factories())
			.await
			.unwrap();

		let admin = engine.store().get_user(1).await.unwrap();
		assert_eq!(admin.role, Role::Admin);
		let customer = engine.store().get_user(2).await.unwrap();
		assert_eq!(customer.role, Role::Customer);

		let order = engine
			.lifecycle()
			.create_order(
				(&customer).into(),
				NewOrder {
					product_id: "PHONE-001".into(),
					quantity: 2,
					customer_email: customer.email.clone(),
					shipping_address: None,
				},
			)
			.await
			.unwrap();
		assert_eq!(order.total_price.to_string(), "599.98");
	}

	#[tokio::test]
	async fn test_missing_factory_is_reported() {
		let mut factories = all_factories();
		factories.broker_factories.clear();

		let err = OrderBuilder::new(Config::for_tests())
			.build(factories)
			.await
			.err()
			.unwrap();
		assert!(matches!(err, BuilderError::MissingComponent(ref c) if c == "broker"));
	}

	#[tokio::test]
	async fn test_invalid_implementation_config_fails_build() {
		let mut config = Config::for_tests();
		config.pricing.implementations.insert(
			"catalog".into(),
			toml::from_str("[products.BAD]\nprice = \"free\"\n").unwrap(),
		);

		let err = OrderBuilder::new(config)
			.build(all_factories())
			.await
			.err()
			.unwrap();
		assert!(matches!(err, BuilderError::Config(_)));
	}
}
