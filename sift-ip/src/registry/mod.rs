//! Subscription Registry
//!
//! Tracks which connected subscribers are waiting for which
//! (image, filter set) pairs and delivers completion notifications to
//! them. All state lives behind one lock owned by the registry object;
//! the registry's lifecycle is tied to server startup/shutdown and every
//! mutation goes through register/deliver/disconnect operations that are
//! atomic with respect to each other.
//!
//! Liveness: a periodic sweep pings idle subscribers and force-disconnects
//! any that stay silent past the idle timeout, releasing their
//! registrations.

use crate::signature::{custom_intervention_type, has_custom_filter, normalize_for_match, CUSTOM_PREFIX};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between liveness sweeps; idle subscribers are pinged once per
/// sweep
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Idle time after which a subscriber is forcibly disconnected
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Subscriber identity (one per connected client)
pub type SubscriberId = String;

/// Message sent to a connected subscriber
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Completion delivery
    ImageProcessed { data: ImageProcessedData },
    /// Server-initiated keepalive probe
    Ping { timestamp: String },
    /// Reply to a client ping
    Pong { timestamp: String },
}

/// Completion notification payload
#[derive(Debug, Clone, Serialize)]
pub struct ImageProcessedData {
    pub image_url: String,
    pub result: serde_json::Value,
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_url: Option<String>,
}

struct Connection {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    last_activity: Instant,
}

#[derive(Default)]
struct RegistryInner {
    /// Live subscriber connections
    connections: HashMap<SubscriberId, Connection>,
    /// image_url -> subscribers waiting on it
    waiting_for_images: HashMap<String, HashSet<SubscriberId>>,
    /// subscriber -> image_url -> filter set they are waiting for
    waiting_with_filters: HashMap<SubscriberId, HashMap<String, Vec<String>>>,
}

/// Lock-protected subscription registry
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
    ping_interval: Duration,
    idle_timeout: Duration,
}

impl SubscriptionRegistry {
    /// Registry with production liveness constants
    pub fn new() -> Self {
        Self::with_intervals(PING_INTERVAL, IDLE_TIMEOUT)
    }

    /// Registry with explicit liveness intervals (tests use short ones)
    pub fn with_intervals(ping_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            ping_interval,
            idle_timeout,
        }
    }

    /// Record a new subscriber connection
    pub async fn connect(
        &self,
        subscriber_id: &str,
        sender: mpsc::UnboundedSender<OutboundMessage>,
    ) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            subscriber_id.to_string(),
            Connection {
                sender,
                last_activity: Instant::now(),
            },
        );
        info!(subscriber_id = %subscriber_id, "Subscriber connected");
    }

    /// Remove a subscriber and release all of its registrations
    pub async fn disconnect(&self, subscriber_id: &str) {
        let mut inner = self.inner.write().await;
        Self::remove_subscriber(&mut inner, subscriber_id);
        info!(subscriber_id = %subscriber_id, "Subscriber disconnected");
    }

    fn remove_subscriber(inner: &mut RegistryInner, subscriber_id: &str) {
        inner.connections.remove(subscriber_id);
        inner.waiting_with_filters.remove(subscriber_id);
        inner.waiting_for_images.retain(|_, waiting| {
            waiting.remove(subscriber_id);
            !waiting.is_empty()
        });
    }

    /// Refresh a subscriber's activity timestamp
    pub async fn update_activity(&self, subscriber_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(conn) = inner.connections.get_mut(subscriber_id) {
            conn.last_activity = Instant::now();
        }
    }

    /// Register that a subscriber is waiting for an image+filter result
    pub async fn register_wait(&self, subscriber_id: &str, image_url: &str, filters: Vec<String>) {
        let mut inner = self.inner.write().await;

        inner
            .waiting_for_images
            .entry(image_url.to_string())
            .or_default()
            .insert(subscriber_id.to_string());

        inner
            .waiting_with_filters
            .entry(subscriber_id.to_string())
            .or_default()
            .insert(image_url.to_string(), filters);

        debug!(
            subscriber_id = %subscriber_id,
            image_url = %image_url,
            images_tracked = inner.waiting_for_images.len(),
            "Registered image wait"
        );
    }

    /// Deliver a completion to every matching waiter
    ///
    /// Matching: when the completed filter set contains a custom entry,
    /// subscribers registered with an empty set match any custom
    /// completion, and subscribers registered with a custom filter match
    /// when their declared intervention-type fragment appears in the
    /// completion's custom filter. Otherwise the subscriber's set must
    /// equal the completion's set after normalization. Only matched
    /// subscribers are deregistered.
    pub async fn notify_image_processed(
        &self,
        image_url: &str,
        result: serde_json::Value,
        filters: &[String],
        base64_url: Option<String>,
    ) {
        let mut inner = self.inner.write().await;

        let Some(waiting) = inner.waiting_for_images.get(image_url).cloned() else {
            debug!(image_url = %image_url, "No subscribers waiting for image");
            return;
        };

        let mut notified: Vec<SubscriberId> = Vec::new();

        for subscriber_id in waiting {
            let Some(user_filters) = inner
                .waiting_with_filters
                .get(&subscriber_id)
                .and_then(|m| m.get(image_url))
            else {
                continue;
            };

            if !filters_match(filters, user_filters) {
                debug!(
                    subscriber_id = %subscriber_id,
                    ?user_filters,
                    ?filters,
                    "Subscriber waiting for different filters"
                );
                continue;
            }

            let message = OutboundMessage::ImageProcessed {
                data: ImageProcessedData {
                    image_url: image_url.to_string(),
                    result: result.clone(),
                    filters: filters.to_vec(),
                    base64_url: base64_url.clone(),
                },
            };

            let delivered = match inner.connections.get(&subscriber_id) {
                Some(conn) => conn.sender.send(message).is_ok(),
                None => false,
            };

            if delivered {
                info!(
                    subscriber_id = %subscriber_id,
                    image_url = %image_url,
                    "Delivered completion to subscriber"
                );
                notified.push(subscriber_id);
            } else {
                warn!(
                    subscriber_id = %subscriber_id,
                    "Subscriber channel closed, dropping connection"
                );
                notified.push(subscriber_id.clone());
                Self::remove_subscriber(&mut inner, &subscriber_id);
            }
        }

        // Deregister only the subscribers that matched; the rest stay
        // registered for a future completion on the same image.
        for subscriber_id in &notified {
            if let Some(map) = inner.waiting_with_filters.get_mut(subscriber_id) {
                map.remove(image_url);
            }
            if let Some(waiting) = inner.waiting_for_images.get_mut(image_url) {
                waiting.remove(subscriber_id);
            }
        }
        if inner
            .waiting_for_images
            .get(image_url)
            .is_some_and(|w| w.is_empty())
        {
            inner.waiting_for_images.remove(image_url);
        }
    }

    /// Number of live connections (diagnostics)
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Whether a subscriber holds any wait registration (tests)
    pub async fn is_waiting(&self, subscriber_id: &str) -> bool {
        self.inner
            .read()
            .await
            .waiting_with_filters
            .get(subscriber_id)
            .is_some_and(|m| !m.is_empty())
    }

    /// Run the periodic liveness sweep until the registry is dropped
    ///
    /// Spawned once at server startup. Each sweep pings subscribers idle
    /// past one interval and disconnects those idle past the timeout.
    pub async fn run_liveness_sweep(self: Arc<Self>) {
        info!(
            ping_interval_s = self.ping_interval.as_secs(),
            idle_timeout_s = self.idle_timeout.as_secs(),
            "Liveness sweep started"
        );

        loop {
            tokio::time::sleep(self.ping_interval).await;

            let now = Instant::now();
            let mut inner = self.inner.write().await;
            let mut expired: Vec<SubscriberId> = Vec::new();

            for (subscriber_id, conn) in inner.connections.iter() {
                let idle = now.duration_since(conn.last_activity);

                if idle > self.idle_timeout {
                    warn!(
                        subscriber_id = %subscriber_id,
                        idle_s = idle.as_secs(),
                        "Subscriber idle past timeout, disconnecting"
                    );
                    expired.push(subscriber_id.clone());
                } else if idle > self.ping_interval {
                    let ping = OutboundMessage::Ping {
                        timestamp: chrono::Utc::now().to_rfc3339(),
                    };
                    if conn.sender.send(ping).is_err() {
                        warn!(subscriber_id = %subscriber_id, "Ping failed, disconnecting");
                        expired.push(subscriber_id.clone());
                    } else {
                        debug!(subscriber_id = %subscriber_id, "Sent liveness ping");
                    }
                }
            }

            for subscriber_id in expired {
                Self::remove_subscriber(&mut inner, &subscriber_id);
            }
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Matching rule between a completion's filter set and a subscriber's
fn filters_match(completed: &[String], subscribed: &[String]) -> bool {
    if has_custom_filter(completed) {
        // An empty subscription matches any custom completion
        if subscribed.is_empty() {
            return true;
        }
        // Otherwise the subscriber's declared intervention type must
        // appear in one of the completion's custom descriptors
        for descriptor in completed.iter().filter(|f| f.starts_with(CUSTOM_PREFIX)) {
            if let Some(kind) = custom_intervention_type(descriptor) {
                for user_filter in subscribed {
                    if (user_filter.starts_with(CUSTOM_PREFIX) && user_filter.contains(kind))
                        || user_filter == kind
                    {
                        return true;
                    }
                }
            }
        }
        false
    } else {
        normalize_for_match(completed) == normalize_for_match(subscribed)
    }
}
