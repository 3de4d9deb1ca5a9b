//! Event bridge between the cache's completion events and the
//! Subscription Registry
//!
//! The cache publishes `ImageProcessed` on the EventBus when a result is
//! written; this bridge consumes the bus and drives the registry's
//! delivery path, keeping the cache free of any knowledge of connected
//! subscribers.

use crate::registry::SubscriptionRegistry;
use sift_common::events::SiftEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Bridge task forwarding completion events to the registry
///
/// Runs as a background task for the lifetime of the server. Lagged
/// events are skipped with a warning; delivery resumes with the next
/// event.
///
/// # Arguments
/// * `rx` - Receiver subscribed to the service EventBus
/// * `registry` - Registry whose delivery path is driven
pub async fn run_event_bridge(
    mut rx: broadcast::Receiver<SiftEvent>,
    registry: Arc<SubscriptionRegistry>,
) {
    debug!("Event bridge started (ImageProcessed → registry delivery)");

    loop {
        match rx.recv().await {
            Ok(SiftEvent::ImageProcessed {
                image_url,
                result,
                filters,
                base64_url,
                ..
            }) => {
                registry
                    .notify_image_processed(
                        &image_url,
                        serde_json::Value::String(result),
                        &filters,
                        base64_url,
                    )
                    .await;
            }
            Ok(_) => {
                // Job lifecycle events are for the SSE feed only
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    skipped,
                    "Event bridge lagged (channel too slow), skipping events"
                );
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Event bridge: event bus closed, shutting down");
                break;
            }
        }
    }

    debug!("Event bridge stopped");
}
