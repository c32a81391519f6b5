//! Order endpoints.

use crate::apis::{caller::AuthenticatedCaller, error::ApiError};
use crate::server::AppState;
use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::Json,
};
use order_types::{
	NewOrder, Order, OrderFilter, OrderId, OrderPage, OrderPatch, OrderStatus, Pagination, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Query parameters of `GET /api/orders`.
#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
	pub status: Option<OrderStatus>,
	pub product_id: Option<String>,
	/// Only honoured for administrators.
	pub user_id: Option<UserId>,
	pub min_price: Option<Decimal>,
	pub max_price: Option<Decimal>,
	pub skip: Option<usize>,
	pub limit: Option<usize>,
}

/// Body of `PATCH /api/orders/{id}/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusChange {
	pub status: OrderStatus,
}

/// Handles POST /api/orders requests.
pub async fn create_order(
	State(state): State<AppState>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
	Json(input): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
	let order = state.engine.lifecycle().create_order(caller, input).await?;
	Ok((StatusCode::CREATED, Json(order)))
}

/// Handles GET /api/orders requests.
pub async fn list_orders(
	State(state): State<AppState>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderPage>, ApiError> {
	let filter = OrderFilter {
		status: query.status,
		product_id: query.product_id,
		user_id: query.user_id,
		min_price: query.min_price,
		max_price: query.max_price,
	};
	let pagination = Pagination {
		skip: query.skip.unwrap_or(0),
		limit: query.limit.unwrap_or(state.default_page_size),
	};

	let page = state
		.engine
		.lifecycle()
		.list_orders(caller, filter, pagination)
		.await?;
	Ok(Json(page))
}

/// Handles GET /api/orders/{id} requests.
pub async fn get_order(
	State(state): State<AppState>,
	Path(order_id): Path<OrderId>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.lifecycle().get_order(caller, order_id).await?;
	Ok(Json(order))
}

/// Handles PUT /api/orders/{id} requests.
pub async fn update_order(
	State(state): State<AppState>,
	Path(order_id): Path<OrderId>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
	Json(patch): Json<OrderPatch>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.lifecycle()
		.update_order(caller, order_id, patch)
		.await?;
	Ok(Json(order))
}

/// Handles PATCH /api/orders/{id}/status requests.
pub async fn change_status(
	State(state): State<AppState>,
	Path(order_id): Path<OrderId>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
	Json(change): Json<StatusChange>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.lifecycle()
		.change_status(caller, order_id, change.status)
		.await?;
	Ok(Json(order))
}

/// Handles POST /api/orders/{id}/cancel requests.
pub async fn cancel_order(
	State(state): State<AppState>,
	Path(order_id): Path<OrderId>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.lifecycle().cancel_order(caller, order_id).await?;
	Ok(Json(order))
}
