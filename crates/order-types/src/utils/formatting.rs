//! String formatting utilities for log output.

/// Truncates free text (error messages, rendered content) to `max` characters.
pub fn truncate_text(text: &str, max: usize) -> String {
	if text.chars().count() <= max {
		text.to_string()
	} else {
		let mut truncated: String = text.chars().take(max).collect();
		truncated.push_str("...");
		truncated
	}
}
