//! Event types for the SIFT event system
//!
//! Events are published on the [`EventBus`] (a tokio::broadcast wrapper)
//! by the pipeline and the result cache, and consumed by the SSE feed and
//! the subscription delivery bridge.

use serde::{Deserialize, Serialize};

use tokio::sync::broadcast;

/// SIFT event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SiftEvent {
    /// A pipeline job was accepted and dispatched
    JobStarted {
        job_id: String,
        image_url: String,
        mode: String,
        candidates: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline job selected a winner and wrote its result
    JobCompleted {
        job_id: String,
        image_url: String,
        winner: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline job failed with no cache write
    JobFailed {
        job_id: String,
        image_url: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A processed result was written to the cache
    ///
    /// Consumed by the subscription delivery bridge; `filters` is the
    /// filter set the result was produced for, not its normalized
    /// signature.
    ImageProcessed {
        image_url: String,
        result: String,
        filters: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64_url: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SiftEvent {
    /// Event type name for SSE event framing
    pub fn event_type(&self) -> &'static str {
        match self {
            SiftEvent::JobStarted { .. } => "JobStarted",
            SiftEvent::JobCompleted { .. } => "JobCompleted",
            SiftEvent::JobFailed { .. } => "JobFailed",
            SiftEvent::ImageProcessed { .. } => "ImageProcessed",
        }
    }
}

/// Event bus for service-wide event broadcasting
///
/// Wraps tokio::broadcast, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SiftEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Returns a receiver that will receive all events emitted after
    /// subscription. Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SiftEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening. Callers that treat delivery
    /// as best-effort should `.ok()` the result.
    pub fn emit(
        &self,
        event: SiftEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<SiftEvent>> {
        self.tx.send(event)
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
