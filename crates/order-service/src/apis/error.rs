//! API error responses.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Json, Response},
};
use order_core::{ErrorCategory, OrderError};
use serde::{Deserialize, Serialize};

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Stable error code
	pub error: String,
	/// Human-readable description
	pub message: String,
}

/// Error type returned by handlers, carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	body: ErrorResponse,
}

impl ApiError {
	fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
		Self {
			status,
			body: ErrorResponse {
				error: error.to_string(),
				message: message.into(),
			},
		}
	}

	/// The request carries no usable caller identity.
	pub fn unauthenticated(message: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
	}

	pub fn forbidden(message: impl Into<String>) -> Self {
		Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
	}

	pub fn status(&self) -> StatusCode {
		self.status
	}
}

impl From<OrderError> for ApiError {
	fn from(err: OrderError) -> Self {
		match err.category() {
			ErrorCategory::BadRequest => Self::bad_request(err.to_string()),
			ErrorCategory::Forbidden => Self::forbidden(err.to_string()),
			ErrorCategory::NotFound => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
			ErrorCategory::Conflict => Self::new(StatusCode::CONFLICT, "CONFLICT", err.to_string()),
			ErrorCategory::ServiceUnavailable => {
				// Backend details stay in the log
				tracing::warn!(error = %err, "Request failed on an unavailable dependency");
				Self::new(
					StatusCode::SERVICE_UNAVAILABLE,
					"SERVICE_UNAVAILABLE",
					"The service is temporarily unavailable, please retry",
				)
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(self.body)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_categories_map_to_status_codes() {
		let cases = [
			(OrderError::Validation("x".into()), StatusCode::BAD_REQUEST),
			(OrderError::Authorization("x".into()), StatusCode::FORBIDDEN),
			(OrderError::NotFound("x".into()), StatusCode::NOT_FOUND),
			(OrderError::InvalidTransition("x".into()), StatusCode::CONFLICT),
			(OrderError::Conflict("x".into()), StatusCode::CONFLICT),
			(OrderError::Persistence("x".into()), StatusCode::SERVICE_UNAVAILABLE),
		];
		for (err, status) in cases {
			assert_eq!(ApiError::from(err).status(), status);
		}
	}

	#[test]
	fn test_unavailable_hides_backend_message() {
		let err = ApiError::from(OrderError::Persistence("table orders locked".into()));
		assert!(!err.body.message.contains("orders locked"));
		assert_eq!(err.body.error, "SERVICE_UNAVAILABLE");
	}
}
