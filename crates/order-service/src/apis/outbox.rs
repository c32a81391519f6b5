//! Operator endpoints for outbox rows that exhausted their publish attempts.

use crate::apis::{caller::AuthenticatedCaller, error::ApiError};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	response::Json,
};
use order_types::{Caller, EventId, OutboxEvent};

fn require_admin(caller: Caller) -> Result<(), ApiError> {
	if caller.is_admin() {
		Ok(())
	} else {
		Err(ApiError::forbidden("Only administrators can manage the outbox"))
	}
}

/// Handles GET /api/outbox/failed requests.
pub async fn failed_events(
	State(state): State<AppState>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Vec<OutboxEvent>>, ApiError> {
	require_admin(caller)?;
	let events = state.engine.publisher().failed_events().await?;
	Ok(Json(events))
}

/// Handles POST /api/outbox/{id}/retry requests.
pub async fn retry_event(
	State(state): State<AppState>,
	Path(event_id): Path<EventId>,
	AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<OutboxEvent>, ApiError> {
	require_admin(caller)?;
	tracing::info!(event_id, user_id = caller.id, "Operator retry of failed outbox event");
	let event = state.engine.publisher().retry_failed(event_id).await?;
	Ok(Json(event))
}
