//! HTTP handlers of the order API.
//!
//! Handlers translate requests into lifecycle calls on behalf of the caller
//! identified by [`caller::AuthenticatedCaller`] and map pipeline errors onto
//! response codes through [`error::ApiError`].

pub mod caller;
pub mod error;
pub mod orders;
pub mod outbox;
