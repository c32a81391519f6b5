//! Plain-text rendering of customer notifications.

use crate::{Notification, NotificationKind};
use order_types::{EventId, Order, OrderStatus};

const SIGNATURE: &str = "Best regards,\nThe Order Management Team\n";

pub(crate) fn confirmation(from: &str, event_id: EventId, order: &Order) -> Notification {
	let body = format!(
		"Hello,\n\n\
		Thank you for your order!\n\n\
		Order Details:\n\
		--------------\n\
		Order ID: {}\n\
		Product: {}\n\
		Quantity: {}\n\
		Total Price: ${}\n\
		Status: {}\n\n\
		We will notify you once your order is shipped.\n\n{}",
		order.id, order.product_id, order.quantity, order.total_price, order.status, SIGNATURE
	);
	Notification {
		kind: NotificationKind::OrderConfirmation,
		event_id,
		order_id: order.id,
		from: from.to_string(),
		recipient: order.customer_email.clone(),
		subject: format!("Order Confirmation - #{}", order.id),
		body,
	}
}

pub(crate) fn status_update(
	from: &str,
	event_id: EventId,
	order: &Order,
	status: OrderStatus,
) -> Notification {
	let (headline, subject) = match status {
		OrderStatus::Delivered => ("has been delivered", "Order Delivered"),
		_ => ("has been shipped", "Order Shipped"),
	};
	let mut body = format!("Hello,\n\nYour order #{} {}.\n", order.id, headline);
	if let Some(address) = order
		.shipping_address
		.as_deref()
		.filter(|_| status == OrderStatus::Shipped)
	{
		body.push_str(&format!("Shipping to: {}\n", address));
	}
	body.push('\n');
	body.push_str(SIGNATURE);

	Notification {
		kind: NotificationKind::StatusUpdate,
		event_id,
		order_id: order.id,
		from: from.to_string(),
		recipient: order.customer_email.clone(),
		subject: format!("{} - #{}", subject, order.id),
		body,
	}
}

pub(crate) fn cancellation(from: &str, event_id: EventId, order: &Order) -> Notification {
	Notification {
		kind: NotificationKind::Cancellation,
		event_id,
		order_id: order.id,
		from: from.to_string(),
		recipient: order.customer_email.clone(),
		subject: format!("Order Cancelled - #{}", order.id),
		body: format!(
			"Hello,\n\nYour order #{} has been cancelled.\n\n{}",
			order.id, SIGNATURE
		),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use rust_decimal::Decimal;

	fn order() -> Order {
		let now = Utc::now();
		Order {
			id: 12,
			user_id: 2,
			product_id: "LAPTOP-001".into(),
			quantity: 2,
			unit_price: Decimal::from(500),
			total_price: Decimal::from(1000),
			status: OrderStatus::Created,
			customer_email: "customer@example.com".into(),
			shipping_address: Some("1 Main St".into()),
			version: 1,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn test_confirmation_lists_order_details() {
		let n = confirmation("orders@example.com", 3, &order());
		assert_eq!(n.subject, "Order Confirmation - #12");
		assert_eq!(n.recipient, "customer@example.com");
		for line in [
			"Order ID: 12",
			"Product: LAPTOP-001",
			"Quantity: 2",
			"Total Price: $1000",
			"Status: CREATED",
		] {
			assert!(n.body.contains(line), "missing {:?} in {}", line, n.body);
		}
	}

	#[test]
	fn test_status_update_subjects() {
		let shipped = status_update("f", 4, &order(), OrderStatus::Shipped);
		assert_eq!(shipped.subject, "Order Shipped - #12");
		assert!(shipped.body.contains("Shipping to: 1 Main St"));

		let delivered = status_update("f", 5, &order(), OrderStatus::Delivered);
		assert_eq!(delivered.subject, "Order Delivered - #12");
		assert!(!delivered.body.contains("Shipping to"));
	}

	#[test]
	fn test_cancellation_references_order() {
		let n = cancellation("f", 6, &order());
		assert_eq!(n.kind, NotificationKind::Cancellation);
		assert!(n.body.contains("#12 has been cancelled"));
	}
}
