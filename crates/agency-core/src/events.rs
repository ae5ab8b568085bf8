//! Workflow event fan-out
//!
//! Every committed transition publishes a [`WorkflowEvent`] to the injected
//! [`EventSink`]. Publishing is best effort: the engine logs sink failures and
//! never rolls a transition back because of them.

use crate::config::NotificationConfig;
use crate::error::{AgencyError, Result};
use agency_types::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PostCreated,
    TopicDecided,
    TopicResubmitted,
    OutlineRegistered,
    OutlineDecided,
    OutlineResubmitted,
    LinkRegistered,
    PurchaseRequestCreated,
    PurchaseRequestDecided,
    PurchaseRequestUpdated,
    OrderRequested,
    OrderApproved,
    IncentivesCalculated,
    IncentiveDecided,
    IncentiveAdjusted,
    CampaignUpdated,
}

/// Notification payload consumed by the dashboard's notification list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    pub message: String,
    pub related_entity_ids: Vec<String>,
    pub target_roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(event_type: EventType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type,
            title: title.into(),
            message: message.into(),
            related_entity_ids: Vec::new(),
            target_roles: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn related(mut self, id: impl ToString) -> Self {
        self.related_entity_ids.push(id.to_string());
        self
    }

    pub fn notify(mut self, roles: &[Role]) -> Self {
        self.target_roles.extend_from_slice(roles);
        self
    }
}

/// Receiver of workflow events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &WorkflowEvent) -> Result<()>;
}

/// Discards every event
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &WorkflowEvent) -> Result<()> {
        Ok(())
    }
}

/// In-process publish/subscribe bus
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<WorkflowEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; it receives every event published afterwards
    pub fn subscribe(&self) -> Receiver<WorkflowEvent> {
        let (tx, rx) = channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &WorkflowEvent) -> Result<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| AgencyError::Persistence("Event bus lock poisoned".to_string()))?;

        // Dropped receivers are pruned on the next publish
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}

/// Posts events as JSON to an HTTP endpoint on the ambient tokio runtime.
///
/// Deliveries run as spawned tasks; [`WebhookNotifier::flush`] waits for the
/// ones still in flight, e.g. before a short-lived process exits.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.to_string(),
            http_client,
            in_flight: Mutex::new(Vec::new()),
        })
    }

    /// Deliveries spawned and not yet awaited by [`flush`](Self::flush)
    pub fn pending_deliveries(&self) -> usize {
        self.in_flight.lock().map(|handles| handles.len()).unwrap_or(0)
    }

    /// Wait for every delivery spawned so far; each is bounded by the client timeout
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = match self.in_flight.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => return,
        };

        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("Webhook delivery task failed: {}", e);
            }
        }
        if count > 0 {
            log::debug!("Flushed {} webhook deliveries", count);
        }
    }

    /// Build the notifier described by the config, if a webhook is configured
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        match (&config.webhook_url, config.enabled) {
            (Some(url), true) => Ok(Some(Self::new(url, Duration::from_secs(config.timeout_secs))?)),
            _ => Ok(None),
        }
    }
}

impl EventSink for WebhookNotifier {
    fn publish(&self, event: &WorkflowEvent) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AgencyError::Config("Webhook notifications need a running tokio runtime".to_string())
        })?;

        let request = self.http_client.post(&self.url).json(event);
        let event_type = event.event_type;

        let delivery = handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    log::debug!("Delivered {:?} event to webhook", event_type);
                }
                Ok(response) => {
                    log::warn!("Webhook rejected {:?} event: HTTP {}", event_type, response.status());
                }
                Err(e) => log::warn!("Failed to deliver {:?} event: {}", event_type, e),
            }
        });

        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| AgencyError::Persistence("Webhook delivery list poisoned".to_string()))?;
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(delivery);
        Ok(())
    }
}

/// Publishes to several sinks; one failing sink does not starve the others
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &WorkflowEvent) -> Result<()> {
        let mut first_error = None;

        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                log::warn!("Event sink failed for {:?}: {}", event.event_type, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn publish(&self, _event: &WorkflowEvent) -> Result<()> {
            Err(AgencyError::Persistence("sink offline".to_string()))
        }
    }

    #[test]
    fn test_event_bus_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        let event = WorkflowEvent::new(EventType::TopicDecided, "주제 승인", "topic approved")
            .related("post-1")
            .notify(&[Role::Employee]);
        bus.publish(&event).unwrap();

        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap().related_entity_ids, vec!["post-1".to_string()]);
    }

    #[test]
    fn test_event_bus_prunes_dropped_subscribers() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(&WorkflowEvent::new(EventType::OrderApproved, "t", "m")).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn test_fanout_reaches_healthy_sinks_when_one_fails() {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();
        let fanout = FanoutSink::new()
            .with(Arc::new(FailingSink))
            .with(bus.clone());

        let result = fanout.publish(&WorkflowEvent::new(EventType::IncentiveDecided, "t", "m"));
        assert!(result.is_err());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_webhook_without_runtime_reports_error() {
        let notifier = WebhookNotifier::new("http://localhost:9/hook", Duration::from_secs(1)).unwrap();
        let result = notifier.publish(&WorkflowEvent::new(EventType::LinkRegistered, "t", "m"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_flush_waits_for_spawned_deliveries() {
        // nothing listens on the discard port, so each delivery fails fast
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_secs(2)).unwrap();
        notifier.flush().await;

        notifier.publish(&WorkflowEvent::new(EventType::OrderApproved, "t", "m")).unwrap();
        notifier.publish(&WorkflowEvent::new(EventType::IncentiveDecided, "t", "m")).unwrap();
        assert!(notifier.pending_deliveries() >= 1);

        notifier.flush().await;
        assert_eq!(notifier.pending_deliveries(), 0);
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = WorkflowEvent::new(EventType::PurchaseRequestDecided, "t", "m");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "purchase_request_decided");
    }
}
