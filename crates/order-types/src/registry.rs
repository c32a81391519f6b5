//! Registry trait for self-registering implementations.
//!
//! This module provides the base trait that all pluggable implementations
//! implement to register themselves with their configuration name and factory
//! function.

/// Base trait for implementation registries.
///
/// Each implementation module (store, cache, broker, sink, pricing) provides
/// a Registry struct that implements this trait, declaring the name used in
/// configuration files and the factory building the implementation.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// for example "memory" for `cache.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
