//! Sink that records notifications in memory.
//!
//! Outcomes can be scripted ahead of time, which lets tests make the next
//! sends fail transiently or permanently.

use crate::{Notification, NotificationInterface, SinkError};
use async_trait::async_trait;
use order_types::{ConfigSchema, Schema, SchemaError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
	sent: Vec<Notification>,
	/// Errors returned by the next sends, front first.
	script: VecDeque<SinkError>,
	attempts: usize,
}

/// In-memory notification sink.
#[derive(Clone, Default)]
pub struct MemorySink {
	state: Arc<Mutex<State>>,
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the next send fail with `error`. Calls queue up.
	pub async fn fail_next(&self, error: SinkError) {
		self.state.lock().await.script.push_back(error);
	}

	/// Notifications accepted so far.
	pub async fn sent(&self) -> Vec<Notification> {
		self.state.lock().await.sent.clone()
	}

	/// Sends attempted so far, accepted or not.
	pub async fn attempts(&self) -> usize {
		self.state.lock().await.attempts
	}
}

#[async_trait]
impl NotificationInterface for MemorySink {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemorySinkSchema)
	}

	async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
		let mut state = self.state.lock().await;
		state.attempts += 1;
		if let Some(error) = state.script.pop_front() {
			return Err(error);
		}
		state.sent.push(notification.clone());
		Ok(())
	}
}

/// Configuration schema for MemorySink.
pub struct MemorySinkSchema;

impl ConfigSchema for MemorySinkSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory sink from configuration.
pub fn create_sink(config: &toml::Value) -> Result<Box<dyn NotificationInterface>, SinkError> {
	MemorySinkSchema
		.validate(config)
		.map_err(|e| SinkError::Configuration(e.to_string()))?;
	Ok(Box::new(MemorySink::new()))
}

/// Registry for the memory sink implementation.
pub struct Registry;

impl order_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = crate::NotificationFactory;

	fn factory() -> Self::Factory {
		create_sink
	}
}

impl crate::NotificationRegistry for Registry {}
