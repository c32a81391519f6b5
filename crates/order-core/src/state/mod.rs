//! State management for orders.
//!
//! Provides the lifecycle transition table and the versioned
//! read-modify-commit used by every order mutation.

pub mod order;

pub use order::OrderStateMachine;
