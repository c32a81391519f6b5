//! Product price lookup for the order pipeline.
//!
//! Order creation asks this module for the current unit price of a product
//! (and, where the source knows it, the units in stock). The price is then
//! captured on the order; later quantity changes do not look it up again.

use async_trait::async_trait;
use order_types::{ConfigSchema, ImplementationRegistry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod catalog;
}

/// Errors that can occur during price lookup.
#[derive(Debug, Error)]
pub enum PricingError {
	/// The product is not known to the price source.
	#[error("Product not found: {0}")]
	ProductNotFound(String),
	/// The price source cannot answer right now.
	#[error("Price data unavailable: {0}")]
	Unavailable(String),
	/// Error that occurs when configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Current price of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPrice {
	pub product_id: String,
	pub unit_price: Decimal,
	/// Units in stock, if the source tracks stock.
	pub stock: Option<u32>,
}

/// Trait defining the interface for price sources.
#[async_trait]
pub trait PriceLookupInterface: Send + Sync {
	/// Returns the configuration schema for this price source.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Looks up the current price of a product.
	async fn get_price(&self, product_id: &str) -> Result<ProductPrice, PricingError>;
}

/// Type alias for price source factory functions.
pub type PriceLookupFactory =
	fn(&toml::Value) -> Result<Box<dyn PriceLookupInterface>, PricingError>;

/// Registry trait for price source implementations.
pub trait PriceLookupRegistry: ImplementationRegistry<Factory = PriceLookupFactory> {}

/// Get all registered price source implementations.
pub fn get_all_implementations() -> Vec<(&'static str, PriceLookupFactory)> {
	use implementations::catalog;

	vec![(catalog::Registry::NAME, catalog::Registry::factory())]
}

/// Service answering price lookups from the primary price source.
pub struct PricingService {
	implementations: HashMap<String, Arc<dyn PriceLookupInterface>>,
	primary_implementation: String,
}

impl PricingService {
	/// Creates the service; `primary_implementation` must be one of
	/// `implementations`.
	pub fn new(
		implementations: HashMap<String, Arc<dyn PriceLookupInterface>>,
		primary_implementation: String,
	) -> Result<Self, PricingError> {
		if !implementations.contains_key(&primary_implementation) {
			return Err(PricingError::Configuration(format!(
				"Primary implementation '{}' not found in available implementations",
				primary_implementation
			)));
		}

		Ok(Self {
			implementations,
			primary_implementation,
		})
	}

	pub async fn get_price(&self, product_id: &str) -> Result<ProductPrice, PricingError> {
		let implementation = self
			.implementations
			.get(&self.primary_implementation)
			.ok_or_else(|| {
				PricingError::Unavailable(format!(
					"Primary implementation '{}' not available",
					self.primary_implementation
				))
			})?;

		implementation.get_price(product_id).await
	}
}
