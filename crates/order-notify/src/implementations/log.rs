//! Sink that writes notifications to the service log.
//!
//! Stands in for a mail transport in development setups.

use crate::{Notification, NotificationInterface, SinkError};
use async_trait::async_trait;
use order_types::{truncate_text, ConfigSchema, Field, FieldType, Schema, SchemaError};
use tracing::info;

/// Notification sink that logs every message it accepts.
pub struct LogSink {
	/// Characters of the body included in the log line.
	preview_chars: usize,
}

impl LogSink {
	pub fn new(preview_chars: usize) -> Self {
		Self { preview_chars }
	}
}

#[async_trait]
impl NotificationInterface for LogSink {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LogSinkSchema)
	}

	async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
		info!(
			kind = %notification.kind,
			event_id = notification.event_id,
			order_id = notification.order_id,
			to = %notification.recipient,
			subject = %notification.subject,
			body = %truncate_text(&notification.body, self.preview_chars),
			"Notification sent"
		);
		Ok(())
	}
}

/// Configuration schema for LogSink.
pub struct LogSinkSchema;

impl ConfigSchema for LogSinkSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"preview_chars",
				FieldType::Integer {
					min: Some(0),
					max: Some(10_000),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create a log sink from configuration.
///
/// Configuration parameters:
/// - `preview_chars` (optional): body characters to log, default 120
pub fn create_sink(config: &toml::Value) -> Result<Box<dyn NotificationInterface>, SinkError> {
	LogSinkSchema
		.validate(config)
		.map_err(|e| SinkError::Configuration(e.to_string()))?;

	let preview_chars = config
		.get("preview_chars")
		.and_then(|v| v.as_integer())
		.unwrap_or(120) as usize;
	Ok(Box::new(LogSink::new(preview_chars)))
}

/// Registry for the log sink implementation.
pub struct Registry;

impl order_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "log";
	type Factory = crate::NotificationFactory;

	fn factory() -> Self::Factory {
		create_sink
	}
}

impl crate::NotificationRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_factory_validates_preview() {
		let ok: toml::Value = toml::from_str("preview_chars = 40").unwrap();
		assert!(create_sink(&ok).is_ok());

		let bad: toml::Value = toml::from_str("preview_chars = \"long\"").unwrap();
		assert!(matches!(
			create_sink(&bad),
			Err(SinkError::Configuration(_))
		));
	}
}
