//! Order types for the order pipeline.
//!
//! This module defines the persisted order record, its lifecycle status, the
//! validated inputs accepted by the lifecycle operations, and the filter and
//! pagination types used by list queries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::UserId;

/// Identifier assigned to an order by the store.
pub type OrderId = u64;

/// Upper bound on the quantity of a single order line.
pub const MAX_QUANTITY: u32 = 1000;

/// A customer order as held by the system of record.
///
/// The `version` is bumped on every committed mutation and is the basis of
/// optimistic concurrency control: a write carrying a stale version is
/// rejected by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Unique, immutable identifier.
	pub id: OrderId,
	/// Owning user.
	pub user_id: UserId,
	/// Product being ordered.
	pub product_id: String,
	/// Number of units, always positive.
	pub quantity: u32,
	/// Unit price captured from the catalog when the order was created.
	pub unit_price: Decimal,
	/// `unit_price * quantity`, recomputed whenever the quantity changes.
	pub total_price: Decimal,
	/// Current lifecycle status.
	pub status: OrderStatus,
	/// Address notifications are rendered for.
	pub customer_email: String,
	/// Optional shipping address.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub shipping_address: Option<String>,
	/// Optimistic concurrency version, starting at 1.
	pub version: u64,
	/// Timestamp when this order was created.
	pub created_at: DateTime<Utc>,
	/// Timestamp when this order was last updated.
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Recomputes the total price from the captured unit price.
	pub fn recompute_total(&mut self) {
		self.total_price = self.unit_price * Decimal::from(self.quantity);
	}
}

/// Lifecycle status of an order.
///
/// `Delivered` and `Cancelled` are terminal. The legal edges between states
/// are owned by the order state machine in `order-core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
	/// Order has been placed.
	Created,
	/// Order has been confirmed by an administrator.
	Confirmed,
	/// Order has left the warehouse.
	Shipped,
	/// Order has reached the customer.
	Delivered,
	/// Order was cancelled before shipping.
	Cancelled,
}

impl OrderStatus {
	/// Returns every status, in lifecycle order.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Created,
			Self::Confirmed,
			Self::Shipped,
			Self::Delivered,
			Self::Cancelled,
		]
		.into_iter()
	}

	/// Whether no further transition can leave this status.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Delivered | Self::Cancelled)
	}

	/// Whether quantity and address may still be edited.
	pub fn is_editable(&self) -> bool {
		matches!(self, Self::Created | Self::Confirmed)
	}

	/// Returns the wire representation of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Created => "CREATED",
			Self::Confirmed => "CONFIRMED",
			Self::Shipped => "SHIPPED",
			Self::Delivered => "DELIVERED",
			Self::Cancelled => "CANCELLED",
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|status| status.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| format!("Unknown order status: {}", s))
	}
}

/// Input for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOrder {
	/// Product identifier as known to the catalog.
	#[validate(length(min = 1, max = 100))]
	pub product_id: String,
	/// Number of units.
	#[validate(range(min = 1, max = 1000))]
	pub quantity: u32,
	/// Customer contact address.
	#[validate(email)]
	pub customer_email: String,
	/// Optional shipping address.
	#[validate(length(max = 500))]
	#[serde(default)]
	pub shipping_address: Option<String>,
}

/// Editable fields of an existing order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct OrderPatch {
	/// New quantity; the total price is recomputed when present.
	#[validate(range(min = 1, max = 1000))]
	#[serde(default)]
	pub quantity: Option<u32>,
	/// New shipping address.
	#[validate(length(max = 500))]
	#[serde(default)]
	pub shipping_address: Option<String>,
	/// Version the caller last observed. When set, the update only applies
	/// to exactly that version of the order.
	#[serde(default)]
	pub expected_version: Option<u64>,
}

impl OrderPatch {
	/// Whether the patch carries no field change.
	pub fn is_empty(&self) -> bool {
		self.quantity.is_none() && self.shipping_address.is_none()
	}
}

/// Filters accepted by order list queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFilter {
	#[serde(default)]
	pub status: Option<OrderStatus>,
	#[serde(default)]
	pub product_id: Option<String>,
	#[serde(default)]
	pub user_id: Option<UserId>,
	#[serde(default)]
	pub min_price: Option<Decimal>,
	#[serde(default)]
	pub max_price: Option<Decimal>,
}

impl OrderFilter {
	/// Returns true if the order satisfies every set criterion.
	pub fn matches(&self, order: &Order) -> bool {
		self.status.is_none_or(|status| order.status == status)
			&& self
				.product_id
				.as_deref()
				.is_none_or(|product| order.product_id == product)
			&& self.user_id.is_none_or(|user| order.user_id == user)
			&& self.min_price.is_none_or(|min| order.total_price >= min)
			&& self.max_price.is_none_or(|max| order.total_price <= max)
	}
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
	pub skip: usize,
	pub limit: usize,
}

impl Default for Pagination {
	fn default() -> Self {
		Self { skip: 0, limit: 10 }
	}
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPage {
	pub orders: Vec<Order>,
	/// Number of orders matching the query across all pages.
	pub total: usize,
	pub skip: usize,
	pub limit: usize,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dec(value: &str) -> Decimal {
		Decimal::from_str(value).unwrap()
	}

	fn sample_order() -> Order {
		let now = Utc::now();
		Order {
			id: 1,
			user_id: 7,
			product_id: "LAPTOP-001".into(),
			quantity: 2,
			unit_price: dec("500"),
			total_price: dec("1000"),
			status: OrderStatus::Created,
			customer_email: "customer@example.com".into(),
			shipping_address: None,
			version: 1,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn test_recompute_total() {
		let mut order = sample_order();
		order.quantity = 3;
		order.recompute_total();
		assert_eq!(order.total_price, dec("1500"));
	}

	#[test]
	fn test_status_wire_format() {
		let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
		assert_eq!(json, "\"CANCELLED\"");
		assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
		assert!("PAYMENT_PENDING".parse::<OrderStatus>().is_err());
	}

	#[test]
	fn test_editable_and_terminal_states() {
		assert!(OrderStatus::Created.is_editable());
		assert!(OrderStatus::Confirmed.is_editable());
		assert!(!OrderStatus::Shipped.is_editable());
		assert!(OrderStatus::Delivered.is_terminal());
		assert!(OrderStatus::Cancelled.is_terminal());
		assert!(!OrderStatus::Shipped.is_terminal());
	}

	#[test]
	fn test_new_order_validation() {
		let valid = NewOrder {
			product_id: "LAPTOP-001".into(),
			quantity: 2,
			customer_email: "customer@example.com".into(),
			shipping_address: Some("123 Main St".into()),
		};
		assert!(valid.validate().is_ok());

		let zero = NewOrder {
			quantity: 0,
			..valid.clone()
		};
		assert!(zero.validate().is_err());

		let too_many = NewOrder {
			quantity: MAX_QUANTITY + 1,
			..valid.clone()
		};
		assert!(too_many.validate().is_err());

		let bad_email = NewOrder {
			customer_email: "not-an-email".into(),
			..valid
		};
		assert!(bad_email.validate().is_err());
	}

	#[test]
	fn test_filter_matches() {
		let order = sample_order();
		assert!(OrderFilter::default().matches(&order));

		let by_price = OrderFilter {
			min_price: Some(dec("999.99")),
			max_price: Some(dec("1000")),
			..Default::default()
		};
		assert!(by_price.matches(&order));

		let wrong_status = OrderFilter {
			status: Some(OrderStatus::Shipped),
			..Default::default()
		};
		assert!(!wrong_status.matches(&order));

		let other_user = OrderFilter {
			user_id: Some(8),
			..Default::default()
		};
		assert!(!other_user.matches(&order));
	}
}
