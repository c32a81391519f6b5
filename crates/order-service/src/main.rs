//! Main entry point for the order service.
//!
//! This binary runs the order pipeline: the lifecycle operations behind an
//! HTTP API, the outbox publisher and the idempotent notification consumer.
//! Components are pluggable and selected through configuration.

use clap::Parser;
use order_config::Config;
use order_core::{OrderBuilder, OrderEngine, OrderFactories};
use std::path::PathBuf;

mod apis;
mod server;

// Import implementations from individual crates
use order_cache::implementations::memory::create_cache as create_memory_cache;
use order_delivery::implementations::memory::create_broker as create_memory_broker;
use order_notify::implementations::log::create_sink as create_log_sink;
use order_notify::implementations::memory::create_sink as create_memory_sink;
use order_pricing::implementations::catalog::create_lookup as create_catalog_lookup;
use order_store::implementations::memory::create_store as create_memory_store;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "ORDER_SERVICE_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	// RUST_LOG wins over the CLI default
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started order service");

	let config = Config::from_file(&args.config.to_string_lossy()).await?;
	tracing::info!(service_id = %config.service.id, "Loaded configuration");

	let engine = build_engine(config.clone()).await?;

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			tokio::select! {
				result = engine.run() => {
					tracing::info!("Engine finished");
					result?;
				}
				result = server::start_server(api_config, engine.clone()) => {
					tracing::info!("API server finished");
					engine.shutdown();
					result?;
				}
			}
		},
		None => {
			tracing::info!("API disabled, running workers only");
			engine.run().await?;
		},
	}

	tracing::info!("Stopped order service");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the order engine with every available implementation.
pub(crate) async fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let builder = OrderBuilder::new(config);

	let store_factories = create_factory_map!(
		order_store::StoreInterface,
		order_store::StoreError,
		"memory" => create_memory_store,
	);

	let cache_factories = create_factory_map!(
		order_cache::CacheInterface,
		order_cache::CacheError,
		"memory" => create_memory_cache,
	);

	let broker_factories = create_factory_map!(
		order_delivery::BrokerInterface,
		order_delivery::DeliveryError,
		"memory" => create_memory_broker,
	);

	let notification_factories = create_factory_map!(
		order_notify::NotificationInterface,
		order_notify::SinkError,
		"log" => create_log_sink,
		"memory" => create_memory_sink,
	);

	let pricing_factories = create_factory_map!(
		order_pricing::PriceLookupInterface,
		order_pricing::PricingError,
		"catalog" => create_catalog_lookup,
	);

	let factories = OrderFactories {
		store_factories,
		cache_factories,
		broker_factories,
		notification_factories,
		pricing_factories,
	};

	Ok(builder.build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_args_defaults() {
		let args = Args::try_parse_from(["order-service"]).unwrap();
		assert_eq!(args.log_level, "info");

		let args =
			Args::try_parse_from(["order-service", "-c", "custom.toml", "-l", "debug"]).unwrap();
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_macro() {
		let factories = create_factory_map!(
			order_notify::NotificationInterface,
			order_notify::SinkError,
			"log" => create_log_sink,
			"memory" => create_memory_sink,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("log"));
		assert!(factories.contains_key("memory"));
	}

	#[tokio::test]
	async fn test_build_engine_with_test_config() {
		let engine = build_engine(Config::for_tests()).await.unwrap();
		assert_eq!(engine.config().service.id, "test-orders");
		assert!(engine.store().get_user(2).await.is_ok());
	}

	#[tokio::test]
	async fn test_build_engine_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(
			&path,
			r#"
[service]
id = "file-orders"

[store]
primary = "memory"
[store.implementations.memory]

[cache]
primary = "memory"
[cache.implementations.memory]
max_entries = 1000

[broker]
primary = "memory"
[broker.implementations.memory]

[notification]
primary = "log"
[notification.implementations.log]

[pricing]
primary = "catalog"
[pricing.implementations.catalog.products.LAPTOP-001]
price = "500.00"

[api]
enabled = true
port = 0
"#,
		)
		.unwrap();

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		let engine = build_engine(config).await.unwrap();
		assert_eq!(engine.config().service.id, "file-orders");
		assert!(engine.config().api.as_ref().is_some_and(|api| api.enabled));
	}

	#[tokio::test]
	async fn test_demo_config_builds() {
		let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/demo.toml");
		let config = Config::from_file(path).await.unwrap();
		assert_eq!(config.users.len(), 2);

		let engine = build_engine(config).await.unwrap();
		assert_eq!(engine.config().pricing.primary, "catalog");
		assert_eq!(engine.config().publisher.failed_retry_interval_seconds, Some(600));
	}
}
