// SPDX-License-Identifier: GPL-3.0-or-later
use arrbiter_application::ProgressSink;
use arrbiter_domain::HuntProgress;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const PROGRESS_CHANNEL: &str = "hunt.progress";
const DEFAULT_CAPACITY: usize = 256;

#[async_trait::async_trait]
pub trait RealtimeHub: Send + Sync + 'static {
    async fn broadcast(&self, channel: &str, payload: &str);
}

/// A message as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeMessage {
    pub channel: String,
    pub payload: String,
}

/// Fans messages out to every live subscriber. Slow subscribers lag and lose
/// the oldest messages; publishing never waits on them.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<RealtimeMessage>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, channel: &str, payload: String) {
        let message = RealtimeMessage {
            channel: channel.to_string(),
            payload,
        };
        match self.tx.send(message) {
            Ok(receivers) => debug!(target: "realtime", %channel, receivers, "broadcast"),
            // No subscribers right now.
            Err(_) => debug!(target: "realtime", %channel, "broadcast without subscribers"),
        }
    }
}

#[async_trait::async_trait]
impl RealtimeHub for BroadcastHub {
    async fn broadcast(&self, channel: &str, payload: &str) {
        self.send(channel, payload.to_string());
    }
}

impl ProgressSink for BroadcastHub {
    fn emit(&self, event: HuntProgress) {
        let value = json!({
            "name": event.name,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });
        match serde_json::to_string(&value) {
            Ok(payload) => self.send(PROGRESS_CHANNEL, payload),
            Err(err) => warn!(target: "realtime", error = %err, "failed to serialize progress event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrbiter_domain::{DomainEvent, HuntProgressPayload, ProgressStage, RunId};

    #[tokio::test]
    async fn every_subscriber_receives_broadcasts() {
        let hub = BroadcastHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.broadcast("tasks", "{\"started\":true}").await;

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.channel, "tasks");
    }

    #[tokio::test]
    async fn broadcasting_without_subscribers_is_harmless() {
        let hub = BroadcastHub::default();
        hub.broadcast("tasks", "{}").await;
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn progress_events_are_serialized_onto_the_progress_channel() {
        let hub = BroadcastHub::new(8);
        let mut rx = hub.subscribe();
        let run_id = RunId::new();

        hub.emit(DomainEvent::new(
            "hunt.progress",
            HuntProgressPayload {
                run_id,
                stage: ProgressStage::Searching,
                message: "searching 3 items".to_string(),
                api_calls: 2,
            },
        ));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, PROGRESS_CHANNEL);
        let value: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(value["name"], "hunt.progress");
        assert_eq!(value["payload"]["message"], "searching 3 items");
        assert_eq!(value["payload"]["api_calls"], 2);
    }

    #[tokio::test]
    async fn lagging_subscribers_skip_old_messages() {
        let hub = BroadcastHub::new(2);
        let mut rx = hub.subscribe();
        for n in 0..4 {
            hub.broadcast("tasks", &n.to_string()).await;
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(rx.recv().await.unwrap().payload, "2");
    }
}
