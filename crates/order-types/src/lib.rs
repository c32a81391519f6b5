//! Common types module for the order pipeline.
//!
//! This module defines the core data types shared by every pipeline component:
//! orders and their lifecycle status, users and callers, outbox events and
//! processed-event records, plus the configuration schema helpers used by the
//! pluggable implementations.

/// Outbox events, publication status and processed-event records.
pub mod events;
/// Orders, order status, creation/patch inputs and list queries.
pub mod order;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Cache key namespaces.
pub mod storage;
/// Users, roles and authenticated callers.
pub mod user;
/// Utility functions for display formatting.
pub mod utils;
/// Configuration schema validation for implementation sections.
pub mod validation;

// Re-export all types for convenient access
pub use events::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use user::*;
pub use utils::truncate_text;
pub use validation::*;
