//! Error taxonomy of the order pipeline.
//!
//! Component errors are folded into [`OrderError`] at the pipeline boundary.
//! Callers branch on [`OrderError::category`], which is stable and carries no
//! storage details.

use order_delivery::DeliveryError;
use order_notify::SinkError;
use order_pricing::PricingError;
use order_store::StoreError;
use thiserror::Error;
use validator::ValidationErrors;

/// Errors returned by lifecycle, publisher and consumer operations.
#[derive(Debug, Error)]
pub enum OrderError {
	/// Bad input; no state was changed.
	#[error("Validation error: {0}")]
	Validation(String),
	/// The caller lacks the role or ownership the operation requires.
	#[error("Not authorized: {0}")]
	Authorization(String),
	#[error("Not found: {0}")]
	NotFound(String),
	/// The operation is not legal in the order's current status.
	#[error("Invalid state: {0}")]
	InvalidState(String),
	/// The requested status change is not an edge of the lifecycle.
	#[error("Invalid transition: {0}")]
	InvalidTransition(String),
	/// The order changed concurrently; the caller may re-read and retry.
	#[error("Conflict: {0}")]
	Conflict(String),
	/// The store failed; the transaction was rolled back.
	#[error("Persistence error: {0}")]
	Persistence(String),
	/// The product price source could not answer.
	#[error("Price lookup failed: {0}")]
	PriceLookup(String),
	/// The broker could not be reached; the outbox row stays queued.
	#[error("Delivery error: {0}")]
	Delivery(String),
	/// The notification sink did not accept a message.
	#[error("Sink error: {0}")]
	Sink(String),
}

/// Stable outcome class of an [`OrderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
	BadRequest,
	Forbidden,
	NotFound,
	Conflict,
	ServiceUnavailable,
}

impl OrderError {
	pub fn category(&self) -> ErrorCategory {
		match self {
			OrderError::Validation(_) => ErrorCategory::BadRequest,
			OrderError::Authorization(_) => ErrorCategory::Forbidden,
			OrderError::NotFound(_) => ErrorCategory::NotFound,
			OrderError::InvalidState(_)
			| OrderError::InvalidTransition(_)
			| OrderError::Conflict(_) => ErrorCategory::Conflict,
			OrderError::Persistence(_)
			| OrderError::PriceLookup(_)
			| OrderError::Delivery(_)
			| OrderError::Sink(_) => ErrorCategory::ServiceUnavailable,
		}
	}
}

impl From<StoreError> for OrderError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound(what) => OrderError::NotFound(what),
			StoreError::Conflict(what) | StoreError::Duplicate(what) => OrderError::Conflict(what),
			other => OrderError::Persistence(other.to_string()),
		}
	}
}

impl From<PricingError> for OrderError {
	fn from(err: PricingError) -> Self {
		match err {
			PricingError::ProductNotFound(product) => {
				OrderError::Validation(format!("Unknown product: {}", product))
			},
			other => OrderError::PriceLookup(other.to_string()),
		}
	}
}

impl From<DeliveryError> for OrderError {
	fn from(err: DeliveryError) -> Self {
		OrderError::Delivery(err.to_string())
	}
}

impl From<SinkError> for OrderError {
	fn from(err: SinkError) -> Self {
		OrderError::Sink(err.to_string())
	}
}

impl From<ValidationErrors> for OrderError {
	fn from(err: ValidationErrors) -> Self {
		OrderError::Validation(err.to_string())
	}
}
