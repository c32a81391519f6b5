//! Static product catalog.
//!
//! Prices and stock levels come from configuration:
//!
//! ```toml
//! [pricing.implementations.catalog.products.LAPTOP-001]
//! price = "500.00"
//! stock = 10
//! ```

use crate::{PriceLookupInterface, PricingError, ProductPrice};
use async_trait::async_trait;
use order_types::{ConfigSchema, Field, FieldType, Schema, SchemaError};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CatalogConfig {
	products: HashMap<String, ProductEntry>,
}

#[derive(Debug, Deserialize)]
struct ProductEntry {
	price: String,
	stock: Option<u32>,
}

/// Price source backed by a fixed product table.
pub struct CatalogPriceLookup {
	products: HashMap<String, ProductPrice>,
}

impl CatalogPriceLookup {
	pub fn new(products: impl IntoIterator<Item = ProductPrice>) -> Self {
		Self {
			products: products
				.into_iter()
				.map(|p| (p.product_id.clone(), p))
				.collect(),
		}
	}
}

#[async_trait]
impl PriceLookupInterface for CatalogPriceLookup {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(CatalogSchema)
	}

	async fn get_price(&self, product_id: &str) -> Result<ProductPrice, PricingError> {
		let price = self
			.products
			.get(product_id)
			.cloned()
			.ok_or_else(|| PricingError::ProductNotFound(product_id.to_string()))?;
		debug!(product_id, unit_price = %price.unit_price, "Catalog price lookup");
		Ok(price)
	}
}

fn parse_price(value: &toml::Value) -> Result<(), String> {
	let Some(price) = value.as_str() else {
		return Ok(());
	};
	match Decimal::from_str(price) {
		Ok(p) if p.is_sign_negative() => Err(format!("price {} is negative", price)),
		Ok(_) => Ok(()),
		Err(e) => Err(format!("'{}' is not a decimal: {}", price, e)),
	}
}

/// Configuration schema for the catalog.
pub struct CatalogSchema;

impl ConfigSchema for CatalogSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		let product = Schema::new(
			vec![Field::new("price", FieldType::String).with_validator(parse_price)],
			vec![Field::new(
				"stock",
				FieldType::Integer {
					min: Some(0),
					max: Some(u32::MAX as i64),
				},
			)],
		);
		let schema = Schema::new(
			vec![Field::new(
				"products",
				FieldType::Map(Box::new(FieldType::Table(product))),
			)],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create a catalog price source from configuration.
///
/// Configuration parameters:
/// - `products.<id>.price`: unit price as a decimal string
/// - `products.<id>.stock` (optional): units in stock
pub fn create_lookup(config: &toml::Value) -> Result<Box<dyn PriceLookupInterface>, PricingError> {
	CatalogSchema
		.validate(config)
		.map_err(|e| PricingError::Configuration(e.to_string()))?;

	let catalog: CatalogConfig = config
		.clone()
		.try_into()
		.map_err(|e: toml::de::Error| PricingError::Configuration(e.message().to_string()))?;

	let products = catalog
		.products
		.into_iter()
		.map(|(product_id, entry)| {
			let unit_price = Decimal::from_str(&entry.price)
				.map_err(|e| PricingError::Configuration(format!("{}: {}", product_id, e)))?;
			Ok(ProductPrice {
				product_id,
				unit_price,
				stock: entry.stock,
			})
		})
		.collect::<Result<Vec<_>, PricingError>>()?;

	Ok(Box::new(CatalogPriceLookup::new(products)))
}

/// Registry for the catalog implementation.
pub struct Registry;

impl order_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "catalog";
	type Factory = crate::PriceLookupFactory;

	fn factory() -> Self::Factory {
		create_lookup
	}
}

impl crate::PriceLookupRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	const CATALOG: &str = r#"
[products.LAPTOP-001]
price = "500.00"
stock = 10

[products.CABLE-002]
price = "9.99"
"#;

	#[tokio::test]
	async fn test_lookup_from_config() {
		let config: toml::Value = toml::from_str(CATALOG).unwrap();
		let lookup = create_lookup(&config).unwrap();

		let laptop = lookup.get_price("LAPTOP-001").await.unwrap();
		assert_eq!(laptop.unit_price, Decimal::from(500));
		assert_eq!(laptop.stock, Some(10));

		let cable = lookup.get_price("CABLE-002").await.unwrap();
		assert_eq!(cable.stock, None);

		assert!(matches!(
			lookup.get_price("PHONE-404").await,
			Err(PricingError::ProductNotFound(_))
		));
	}

	#[test]
	fn test_rejects_bad_prices() {
		for bad in ["price = \"-1\"", "price = \"cheap\"", "price = 5"] {
			let config: toml::Value =
				toml::from_str(&format!("[products.X]\n{}\n", bad)).unwrap();
			assert!(
				matches!(create_lookup(&config), Err(PricingError::Configuration(_))),
				"accepted {}",
				bad
			);
		}
	}
}
