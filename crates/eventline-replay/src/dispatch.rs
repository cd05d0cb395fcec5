//! Replay destinations.
//!
//! Dispatch is at-least-once: a dispatcher returning `Ok` only means the
//! destination accepted the event, not that it was acted upon.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventline_core::event::Event;
use eventline_core::message::LogPublisher;
use eventline_core::replay::ReplayDestination;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::DispatchError;

/// Hands events to one destination.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Delivers `event`.
    async fn dispatch(&self, event: &Event) -> Result<(), DispatchError>;
}

/// Builds the dispatcher serving a destination.
pub trait DispatcherFactory: Send + Sync {
    /// Returns a dispatcher for `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Unsupported`] when the destination kind is
    /// not configured in this process.
    fn dispatcher_for(
        &self,
        destination: &ReplayDestination,
    ) -> Result<Arc<dyn EventDispatcher>, DispatchError>;
}

/// Writes each event to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl EventDispatcher for LogDispatcher {
    async fn dispatch(&self, event: &Event) -> Result<(), DispatchError> {
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            aggregate_type = %event.aggregate_type,
            version = event.version,
            timestamp = %event.timestamp,
            "replayed event"
        );
        Ok(())
    }
}

/// Re-publishes each event to a topic of the message log, keyed by
/// aggregate id so that one aggregate's events stay in one partition.
#[derive(Clone)]
pub struct TopicDispatcher {
    publisher: Arc<dyn LogPublisher>,
    topic: String,
}

impl std::fmt::Debug for TopicDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicDispatcher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl TopicDispatcher {
    /// Creates a dispatcher publishing to `topic`.
    #[must_use]
    pub fn new(publisher: Arc<dyn LogPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl EventDispatcher for TopicDispatcher {
    async fn dispatch(&self, event: &Event) -> Result<(), DispatchError> {
        let body = serde_json::to_vec(event)?;
        let position = self
            .publisher
            .publish(&self.topic, Some(&event.aggregate_id), &body)
            .await?;
        debug!(
            event_id = %event.event_id,
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            "event re-published"
        );
        Ok(())
    }
}

/// POSTs each event as JSON to a URL.
///
/// Reuses a single `reqwest::Client` for connection pooling.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    http: Client,
    url: String,
}

impl WebhookDispatcher {
    /// Creates a dispatcher posting to `url` through `http`.
    #[must_use]
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventDispatcher for WebhookDispatcher {
    async fn dispatch(&self, event: &Event) -> Result<(), DispatchError> {
        let resp = self.http.post(&self.url).json(event).send().await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(DispatchError::Webhook { status, body })
        }
    }
}

/// Serves every destination kind this process is configured for.
///
/// `Topic` destinations need a publisher; without one they are refused at
/// submission time.
#[derive(Clone)]
pub struct DestinationDispatchers {
    publisher: Option<Arc<dyn LogPublisher>>,
    http: Client,
}

impl std::fmt::Debug for DestinationDispatchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationDispatchers")
            .field("topic_publishing", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

impl DestinationDispatchers {
    /// Creates the factory. Webhook calls time out after `webhook_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Unreachable`] if the HTTP client cannot be
    /// built.
    pub fn new(
        publisher: Option<Arc<dyn LogPublisher>>,
        webhook_timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let http = Client::builder().timeout(webhook_timeout).build()?;
        Ok(Self { publisher, http })
    }
}

impl DispatcherFactory for DestinationDispatchers {
    fn dispatcher_for(
        &self,
        destination: &ReplayDestination,
    ) -> Result<Arc<dyn EventDispatcher>, DispatchError> {
        match destination {
            ReplayDestination::Log => Ok(Arc::new(LogDispatcher)),
            ReplayDestination::Topic { topic } => {
                let publisher = self.publisher.clone().ok_or_else(|| {
                    DispatchError::Unsupported(format!(
                        "topic destination {topic}: no message log publisher configured"
                    ))
                })?;
                Ok(Arc::new(TopicDispatcher::new(publisher, topic.clone())))
            }
            ReplayDestination::Webhook { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(DispatchError::Unsupported(format!(
                        "webhook url must be http(s): {url}"
                    )));
                }
                Ok(Arc::new(WebhookDispatcher::new(self.http.clone(), url.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use eventline_test_support::{RecordingLogPublisher, fixed_now, stored_event};

    use super::*;

    fn factory(publisher: Option<Arc<dyn LogPublisher>>) -> DestinationDispatchers {
        DestinationDispatchers::new(publisher, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_topic_dispatch_publishes_event_keyed_by_aggregate() {
        // Arrange
        let publisher = RecordingLogPublisher::new();
        let dispatchers = factory(Some(Arc::new(publisher.clone())));
        let event = stored_event("order-123", 1, fixed_now());
        let dispatcher = dispatchers
            .dispatcher_for(&ReplayDestination::Topic {
                topic: "orders-replay".into(),
            })
            .unwrap();

        // Act
        dispatcher.dispatch(&event).await.unwrap();

        // Assert
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "orders-replay");
        assert_eq!(published[0].key.as_deref(), Some("order-123"));
        let body: Event = serde_json::from_slice(&published[0].value).unwrap();
        assert_eq!(body, event);
    }

    #[test]
    fn test_topic_destination_without_publisher_is_unsupported() {
        let result = factory(None).dispatcher_for(&ReplayDestination::Topic {
            topic: "orders-replay".into(),
        });
        assert!(matches!(result, Err(DispatchError::Unsupported(_))));
    }

    #[test]
    fn test_webhook_destination_requires_http_url() {
        let dispatchers = factory(None);
        assert!(
            dispatchers
                .dispatcher_for(&ReplayDestination::Webhook {
                    url: "ftp://example.com/hook".into(),
                })
                .is_err()
        );
        assert!(
            dispatchers
                .dispatcher_for(&ReplayDestination::Webhook {
                    url: "https://example.com/hook".into(),
                })
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_log_dispatch_always_succeeds() {
        let dispatcher = factory(None)
            .dispatcher_for(&ReplayDestination::Log)
            .unwrap();
        assert!(
            dispatcher
                .dispatch(&stored_event("order-1", 1, fixed_now()))
                .await
                .is_ok()
        );
    }
}
