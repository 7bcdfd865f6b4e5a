//! Progress Bus
//!
//! Pub/sub channel for task and campaign lifecycle events, so callers can
//! observe a goal draining or a campaign stepping through its workflow
//! without polling memory. Uses bounded channels to prevent unbounded
//! memory growth; a full or dropped subscriber loses events silently rather
//! than blocking the publisher.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    /// A task began executing
    TaskStarted,
    /// A task completed successfully
    TaskCompleted,
    /// A task failed
    TaskFailed,
    /// A campaign finished one workflow step
    CampaignStepCompleted,
    /// A campaign reached a terminal state
    CampaignFinished,
    /// Subscribe to all event types
    All,
}

/// Events published on the progress bus
#[derive(Debug, Clone)]
pub enum Event {
    TaskStarted {
        session_id: String,
        task_id: String,
        description: String,
    },
    TaskCompleted {
        session_id: String,
        task_id: String,
    },
    TaskFailed {
        session_id: String,
        task_id: String,
        error: String,
    },
    CampaignStepCompleted {
        campaign_id: String,
        step: String,
    },
    CampaignFinished {
        campaign_id: String,
        outcome: String,
    },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TaskStarted { .. } => EventType::TaskStarted,
            Event::TaskCompleted { .. } => EventType::TaskCompleted,
            Event::TaskFailed { .. } => EventType::TaskFailed,
            Event::CampaignStepCompleted { .. } => EventType::CampaignStepCompleted,
            Event::CampaignFinished { .. } => EventType::CampaignFinished,
        }
    }
}

/// Progress bus for pub/sub communication
pub struct ProgressBus {
    /// Map of event types to subscriber channels
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type (or `EventType::All`).
    ///
    /// Returns a bounded receiver; events published while the buffer is
    /// full are dropped for that subscriber.
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to all matching subscribers.
    ///
    /// Send errors (dropped receivers) are ignored.
    pub async fn publish(&self, event: Event) {
        let channels = self.channels.lock().await;
        let event_type = event.event_type();

        if let Some(subscribers) = channels.get(&event_type) {
            for tx in subscribers {
                let _ = tx.try_send(event.clone());
            }
        }

        if let Some(subscribers) = channels.get(&EventType::All) {
            for tx in subscribers {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe(EventType::TaskStarted).await;

        bus.publish(Event::TaskStarted {
            session_id: "s1".to_string(),
            task_id: "t1".to_string(),
            description: "research venues".to_string(),
        })
        .await;

        let received = rx.recv().await.unwrap();
        match received {
            Event::TaskStarted { task_id, .. } => assert_eq!(task_id, "t1"),
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_all_subscriber_sees_everything() {
        let bus = ProgressBus::new();
        let mut rx_all = bus.subscribe(EventType::All).await;

        bus.publish(Event::CampaignStepCompleted {
            campaign_id: "c1".to_string(),
            step: "analyze_customers".to_string(),
        })
        .await;
        bus.publish(Event::TaskFailed {
            session_id: "s1".to_string(),
            task_id: "t2".to_string(),
            error: "backend down".to_string(),
        })
        .await;

        assert!(matches!(
            rx_all.recv().await.unwrap(),
            Event::CampaignStepCompleted { .. }
        ));
        assert!(matches!(rx_all.recv().await.unwrap(), Event::TaskFailed { .. }));
    }

    #[tokio::test]
    async fn test_subscribers_only_see_their_type() {
        let bus = ProgressBus::new();
        let mut rx_completed = bus.subscribe(EventType::TaskCompleted).await;

        bus.publish(Event::TaskStarted {
            session_id: "s1".to_string(),
            task_id: "t1".to_string(),
            description: "x".to_string(),
        })
        .await;
        bus.publish(Event::TaskCompleted {
            session_id: "s1".to_string(),
            task_id: "t1".to_string(),
        })
        .await;

        // Only the TaskCompleted event arrives
        assert!(matches!(
            rx_completed.recv().await.unwrap(),
            Event::TaskCompleted { .. }
        ));
        assert!(rx_completed.try_recv().is_err());
    }
}
