//! User and caller types.
//!
//! Users are owned independently of orders and are referenced by identifier
//! only. A `Caller` is the already-authenticated identity the API layer hands
//! to the lifecycle operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Order;

/// Identifier of a user.
pub type UserId = u64;

/// Role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
	Admin,
	Customer,
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Role::Admin => write!(f, "ADMIN"),
			Role::Customer => write!(f, "CUSTOMER"),
		}
	}
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"ADMIN" => Ok(Role::Admin),
			"CUSTOMER" => Ok(Role::Customer),
			_ => Err(format!("Unknown role: {}", s)),
		}
	}
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,
	/// Unique across all users.
	pub email: String,
	/// Opaque credential hash; never interpreted by the pipeline.
	#[serde(skip_serializing)]
	#[serde(default)]
	pub password_hash: String,
	pub role: Role,
	pub active: bool,
}

/// Authenticated identity performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
	pub id: UserId,
	pub role: Role,
}

impl Caller {
	pub fn new(id: UserId, role: Role) -> Self {
		Self { id, role }
	}

	pub fn is_admin(&self) -> bool {
		self.role == Role::Admin
	}

	/// Admins may act on any order, customers only on their own.
	pub fn may_access(&self, order: &Order) -> bool {
		self.is_admin() || order.user_id == self.id
	}
}

impl From<&User> for Caller {
	fn from(user: &User) -> Self {
		Self::new(user.id, user.role)
	}
}
