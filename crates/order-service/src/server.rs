//! HTTP server for the order API.
//!
//! Exposes the lifecycle operations under `/api/orders`, operator routes for
//! failed outbox rows under `/api/outbox`, and a `/health` probe.

use crate::apis::{orders, outbox};
use axum::{
	extract::State,
	response::Json,
	routing::{get, patch, post},
	Router,
};
use order_config::ApiConfig;
use order_core::OrderEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Engine whose lifecycle and publisher serve the requests.
	pub engine: Arc<OrderEngine>,
	/// Page size for list requests without a `limit`.
	pub default_page_size: usize,
}

/// Builds the API router over `state`.
pub fn router(state: AppState) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(orders::create_order).get(orders::list_orders))
				.route(
					"/orders/{id}",
					get(orders::get_order).put(orders::update_order),
				)
				.route("/orders/{id}/status", patch(orders::change_status))
				.route("/orders/{id}/cancel", post(orders::cancel_order))
				.route("/outbox/failed", get(outbox::failed_events))
				.route("/outbox/{id}/retry", post(outbox::retry_event)),
		)
		.route("/health", get(health))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

/// Starts the HTTP server and serves until it fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: OrderEngine,
) -> Result<(), Box<dyn std::error::Error>> {
	let state = AppState {
		engine: Arc::new(engine),
		default_page_size: api_config.default_page_size,
	};
	let app = router(state);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!(address = %bind_address, "Order API server starting");

	axum::serve(listener, app).await?;
	Ok(())
}

/// Handles GET /health requests.
async fn health(State(state): State<AppState>) -> Json<Value> {
	Json(json!({
		"status": "ok",
		"service": state.engine.config().service.id,
	}))
}
