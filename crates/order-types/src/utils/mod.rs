//! Utility functions for common formatting tasks.

pub mod formatting;

pub use formatting::truncate_text;
