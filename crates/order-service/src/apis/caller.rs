//! Caller identity extraction.
//!
//! Authentication happens in front of this service. Requests arrive with the
//! authenticated user in `x-user-id` and, optionally, its role in
//! `x-user-role`; both are checked against the user table.

use crate::apis::error::ApiError;
use crate::server::AppState;
use axum::{extract::FromRequestParts, http::request::Parts};
use order_types::{Caller, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The active user a request is made on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedCaller(pub Caller);

impl FromRequestParts<AppState> for AuthenticatedCaller {
	type Rejection = ApiError;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &AppState,
	) -> Result<Self, Self::Rejection> {
		let user_id = header(parts, USER_ID_HEADER)?
			.ok_or_else(|| ApiError::unauthenticated("Missing x-user-id header"))?
			.parse::<u64>()
			.map_err(|_| ApiError::unauthenticated("Malformed x-user-id header"))?;

		let user = state
			.engine
			.store()
			.get_user(user_id)
			.await
			.map_err(|_| ApiError::unauthenticated(format!("Unknown user {}", user_id)))?;
		if !user.active {
			return Err(ApiError::forbidden("User account is inactive"));
		}

		if let Some(claimed) = header(parts, USER_ROLE_HEADER)? {
			let role: Role = claimed
				.parse()
				.map_err(|e: String| ApiError::unauthenticated(e))?;
			if role != user.role {
				return Err(ApiError::forbidden(format!(
					"User {} does not hold role {}",
					user.id, role
				)));
			}
		}

		Ok(Self(Caller::from(&user)))
	}
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
	parts
		.headers
		.get(name)
		.map(|value| {
			value
				.to_str()
				.map_err(|_| ApiError::unauthenticated(format!("Malformed {} header", name)))
		})
		.transpose()
}
