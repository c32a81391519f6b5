//! Outbox publisher.
//!
//! Moves committed outbox rows to the broker. Delivery is at-least-once: a row
//! is only marked published after the broker acknowledged it, so a crash or a
//! failed status write leads to the row being sent again. Rows of one order
//! are published strictly in commit order. Only rows whose published status
//! was stored count as progress, so a store that cannot record it never keeps
//! the publisher resending in a loop.

use crate::OrderError;
use chrono::{DateTime, Utc};
use order_config::PublisherConfig;
use order_delivery::DeliveryService;
use order_store::{PublishFailure, StoreService};
use order_types::{EventId, OutboxEvent, PublicationStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Tuning of the publish loop and its retry policy.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
	pub poll_interval: Duration,
	pub batch_size: usize,
	/// Attempts after which a row is parked as `Failed`.
	pub max_attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
	/// When set, `Failed` rows become eligible again after this long.
	pub failed_retry_interval: Option<Duration>,
}

impl From<&PublisherConfig> for PublisherSettings {
	fn from(config: &PublisherConfig) -> Self {
		Self {
			poll_interval: Duration::from_millis(config.poll_interval_ms),
			batch_size: config.batch_size,
			max_attempts: config.max_attempts,
			initial_backoff: Duration::from_millis(config.initial_backoff_ms),
			max_backoff: Duration::from_millis(config.max_backoff_ms),
			failed_retry_interval: config.failed_retry_interval_seconds.map(Duration::from_secs),
		}
	}
}

impl PublisherSettings {
	/// Delay before the next attempt after `attempts` failures.
	pub fn backoff_for(&self, attempts: u32) -> Duration {
		let exponent = attempts.saturating_sub(1).min(31);
		self.initial_backoff
			.saturating_mul(1u32 << exponent)
			.min(self.max_backoff)
	}
}

/// Background worker publishing outbox rows.
pub struct EventPublisher {
	store: Arc<StoreService>,
	delivery: Arc<DeliveryService>,
	settings: PublisherSettings,
	hint: Arc<Notify>,
}

impl EventPublisher {
	pub fn new(
		store: Arc<StoreService>,
		delivery: Arc<DeliveryService>,
		settings: PublisherSettings,
		hint: Arc<Notify>,
	) -> Self {
		Self {
			store,
			delivery,
			settings,
			hint,
		}
	}

	/// Publishes one batch of due rows and returns how many were acknowledged
	/// and recorded as published.
	pub async fn publish_pending(&self) -> Result<usize, OrderError> {
		let batch = self
			.store
			.fetch_publishable(self.settings.batch_size, Utc::now())
			.await?;
		if batch.is_empty() {
			return Ok(0);
		}

		let mut published = 0;
		for event in &batch {
			if self.publish_one(event).await? {
				published += 1;
			}
		}
		debug!(batch = batch.len(), published, "Outbox batch processed");
		Ok(published)
	}

	/// Publishes until no due row is left, following each order's queue.
	///
	/// Stops after the first pass that recorded nothing as published.
	pub async fn drain(&self) -> Result<usize, OrderError> {
		let mut total = 0;
		loop {
			let published = self.publish_pending().await?;
			if published == 0 {
				return Ok(total);
			}
			total += published;
		}
	}

	/// Puts a `Failed` row back in the queue and wakes the publisher.
	#[instrument(skip(self))]
	pub async fn retry_failed(&self, event_id: EventId) -> Result<OutboxEvent, OrderError> {
		let event = self.store.requeue_failed(event_id).await?;
		info!(order_id = event.order_id, "Failed outbox event requeued");
		self.hint.notify_one();
		Ok(event)
	}

	/// Rows that exhausted their attempts.
	pub async fn failed_events(&self) -> Result<Vec<OutboxEvent>, OrderError> {
		Ok(self.store.failed_events().await?)
	}

	/// Runs until `shutdown` flips, publishing on every hint and poll tick.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(self.settings.poll_interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		info!(
			poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
			topic = %self.delivery.topic(),
			"Outbox publisher started"
		);

		loop {
			tokio::select! {
				_ = interval.tick() => {},
				_ = self.hint.notified() => {},
				_ = shutdown.changed() => break,
			}
			if *shutdown.borrow() {
				break;
			}
			// Rows interrupted mid-publish are still pending and go out again
			tokio::select! {
				result = self.drain() => {
					if let Err(e) = result {
						warn!(error = %e, "Outbox publish pass failed");
					}
				}
				_ = shutdown.changed() => break,
			}
		}
		info!("Outbox publisher stopped");
	}

	/// Returns true if the broker acknowledged the row and it was marked
	/// published.
	async fn publish_one(&self, event: &OutboxEvent) -> Result<bool, OrderError> {
		match self.delivery.publish(event).await {
			Ok(()) => match self.store.mark_published(event.id, Utc::now()).await {
				Ok(()) => Ok(true),
				Err(e) => {
					// The row is still pending and goes out again; consumers dedupe.
					warn!(event_id = event.id, error = %e, "Failed to mark event published");
					Ok(false)
				},
			},
			Err(e) => {
				self.record_failure(event, e.to_string()).await?;
				Ok(false)
			},
		}
	}

	async fn record_failure(&self, event: &OutboxEvent, reason: String) -> Result<(), OrderError> {
		let attempts = event.attempts.saturating_add(1);
		let now = Utc::now();
		let failure = if attempts >= self.settings.max_attempts {
			PublishFailure {
				attempts,
				error: reason,
				status: PublicationStatus::Failed,
				next_attempt_at: self
					.settings
					.failed_retry_interval
					.and_then(|interval| after(now, interval)),
			}
		} else {
			PublishFailure {
				attempts,
				error: reason,
				status: PublicationStatus::Pending,
				next_attempt_at: after(now, self.settings.backoff_for(attempts)),
			}
		};

		let row = self.store.record_publish_failure(event.id, failure).await?;
		match row.status {
			PublicationStatus::Failed => error!(
				event_id = row.id,
				order_id = row.order_id,
				attempts,
				error = row.last_error.as_deref().unwrap_or_default(),
				"Outbox event exhausted its publish attempts"
			),
			_ => warn!(
				event_id = row.id,
				order_id = row.order_id,
				attempts,
				error = row.last_error.as_deref().unwrap_or_default(),
				"Outbox publish failed, will retry"
			),
		}
		Ok(())
	}
}

fn after(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
	chrono::Duration::from_std(delay)
		.ok()
		.and_then(|delay| now.checked_add_signed(delay))
}
