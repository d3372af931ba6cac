//! Notification fan-out for blackboard activity.
//!
//! Events are hints, never truth: delivery is best-effort, at-most-once
//! from the publisher's standpoint, and a lagging subscriber silently loses
//! messages. Consumers re-query the store for authoritative state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::{Display, EnumString};
use tokio::sync::broadcast;

/// Capacity of each channel's ring buffer before slow subscribers lag.
const CHANNEL_CAPACITY: usize = 256;

/// Named notification channels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventChannel {
    TaskCreated,
    TaskClaimed,
    TaskCompleted,
    TaskFailed,
    ConflictDetected,
    KnowledgeAdded,
    AgentStatus,
    GovernanceWorkflowStarted,
    GovernanceRequestCompleted,
}

impl EventChannel {
    const ALL: [Self; 9] = [
        Self::TaskCreated,
        Self::TaskClaimed,
        Self::TaskCompleted,
        Self::TaskFailed,
        Self::ConflictDetected,
        Self::KnowledgeAdded,
        Self::AgentStatus,
        Self::GovernanceWorkflowStarted,
        Self::GovernanceRequestCompleted,
    ];

    /// Wire name of the channel, e.g. `events:task_claimed`.
    #[must_use]
    pub fn channel_name(self) -> String {
        format!("events:{self}")
    }
}

/// Envelope carried on every channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: EventChannel,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// In-process pub/sub over named broadcast channels.
#[derive(Debug)]
pub struct EventBus {
    senders: HashMap<EventChannel, broadcast::Sender<EventEnvelope>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with every channel pre-registered.
    #[must_use]
    pub fn new() -> Self {
        let senders = EventChannel::ALL
            .into_iter()
            .map(|channel| (channel, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();
        Self { senders }
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, channel: EventChannel, data: Value) -> usize {
        let envelope = EventEnvelope {
            event_type: channel,
            timestamp: Utc::now(),
            data,
        };
        self.senders
            .get(&channel)
            .map_or(0, |sender| sender.send(envelope).unwrap_or(0))
    }

    /// Subscribe to a channel. Only events published after this call are
    /// observed.
    #[must_use]
    pub fn subscribe(&self, channel: EventChannel) -> broadcast::Receiver<EventEnvelope> {
        self.senders
            .get(&channel)
            .map_or_else(|| broadcast::channel(1).1, broadcast::Sender::subscribe)
    }

    /// Number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: EventChannel) -> usize {
        self.senders
            .get(&channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names_match_wire_format() {
        assert_eq!(EventChannel::TaskClaimed.channel_name(), "events:task_claimed");
        assert_eq!(
            EventChannel::GovernanceWorkflowStarted.channel_name(),
            "events:governance_workflow_started"
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventChannel::TaskCreated);

        let reached = bus.publish(
            EventChannel::TaskCreated,
            json!({"task_id": "t-1", "task_type": "ethical_analysis"}),
        );
        assert_eq!(reached, 1);

        let envelope = rx.recv().await.expect("event delivered");
        assert_eq!(envelope.event_type, EventChannel::TaskCreated);
        assert_eq!(envelope.data["task_id"], "t-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(EventChannel::TaskFailed, json!({})), 0);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = EventBus::new();
        let mut claimed_rx = bus.subscribe(EventChannel::TaskClaimed);

        bus.publish(EventChannel::TaskCompleted, json!({"task_id": "t-1"}));
        bus.publish(EventChannel::TaskClaimed, json!({"task_id": "t-2"}));

        let envelope = claimed_rx.recv().await.expect("event delivered");
        assert_eq!(envelope.data["task_id"], "t-2");
        assert!(claimed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_envelope_serializes_with_event_type() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(EventChannel::KnowledgeAdded);
        bus.publish(EventChannel::KnowledgeAdded, json!({"knowledge_id": "k-1"}));

        let envelope = rx.recv().await.expect("event delivered");
        let wire = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(wire["event_type"], "knowledge_added");
        assert!(wire["timestamp"].is_string());
        assert_eq!(wire["data"]["knowledge_id"], "k-1");
    }
}
