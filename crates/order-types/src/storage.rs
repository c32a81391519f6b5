//! Cache key namespaces.

use std::str::FromStr;

/// Namespaces of the read cache.
///
/// Provides type safety for cache keys by replacing string literals with
/// strongly typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
	/// Single order views keyed by order id
	Orders,
	/// List-query results keyed by a normalized query fingerprint
	OrderLists,
}

impl CacheNamespace {
	/// Returns the string representation of the namespace.
	pub fn as_str(&self) -> &'static str {
		match self {
			CacheNamespace::Orders => "order",
			CacheNamespace::OrderLists => "orders:list",
		}
	}

	/// Returns the full cache key for an id within this namespace.
	pub fn key(&self, id: &str) -> String {
		format!("{}:{}", self.as_str(), id)
	}

	/// Returns the prefix shared by every key in this namespace.
	pub fn prefix(&self) -> String {
		format!("{}:", self.as_str())
	}

	/// Returns an iterator over all namespaces.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Orders, Self::OrderLists].into_iter()
	}
}

impl FromStr for CacheNamespace {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"order" => Ok(Self::Orders),
			"orders:list" => Ok(Self::OrderLists),
			_ => Err(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_prefixes_do_not_overlap() {
		let order_key = CacheNamespace::Orders.key("42");
		assert_eq!(order_key, "order:42");
		assert!(!order_key.starts_with(&CacheNamespace::OrderLists.prefix()));
		assert!(!CacheNamespace::OrderLists
			.key("abc")
			.starts_with(&CacheNamespace::Orders.prefix()));
	}
}
