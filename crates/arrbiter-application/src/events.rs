// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::{Arc, Mutex, MutexGuard};

use arrbiter_domain::{DomainEvent, HuntProgress};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

/// Event publisher abstraction
pub trait EventPublisher: Send + Sync {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static;
}

/// Receives progress events emitted while a hunt runs.
///
/// Emitting must never block or fail the run; a sink whose consumer is gone
/// drops events silently.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: HuntProgress);
}

/// A minimal in-memory event bus that stores serialized events.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<serde_json::Value>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(target: "events", "event bus mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve and clear all captured events
    pub fn drain(&self) -> Vec<serde_json::Value> {
        std::mem::take(&mut *self.lock())
    }
}

impl EventPublisher for InMemoryEventBus {
    fn publish<T>(&self, event: &DomainEvent<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let value = json!({
            "name": event.name,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });
        self.lock().push(value);
    }
}

impl ProgressSink for InMemoryEventBus {
    fn emit(&self, event: HuntProgress) {
        self.publish(&event);
    }
}

/// Sending half of a progress channel.
#[derive(Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<HuntProgress>,
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: HuntProgress) {
        // A closed receiver means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

/// Receiving half of a progress channel. Dropping or closing it makes further
/// emits no-ops without affecting the run.
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<HuntProgress>,
}

impl ProgressStream {
    pub async fn next(&mut self) -> Option<HuntProgress> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<HuntProgress> {
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

pub fn progress_channel() -> (ChannelProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelProgressSink { tx }, ProgressStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrbiter_domain::{HuntProgressPayload, ProgressStage, RunId};

    fn progress(stage: ProgressStage) -> HuntProgress {
        DomainEvent::new(
            "hunt.progress",
            HuntProgressPayload {
                run_id: RunId::new(),
                stage,
                message: "fetched 10 records".to_string(),
                api_calls: 1,
            },
        )
    }

    #[test]
    fn publish_and_drain_events() {
        let bus = InMemoryEventBus::new();
        assert!(bus.is_empty());

        bus.emit(progress(ProgressStage::Fetched));
        assert_eq!(bus.len(), 1);

        let drained = bus.drain();
        assert_eq!(drained.len(), 1);
        let v = &drained[0];
        assert_eq!(v["name"], "hunt.progress");
        assert_eq!(v["payload"]["stage"], "fetched");
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (sink, mut stream) = progress_channel();
        sink.emit(progress(ProgressStage::Started));
        sink.emit(progress(ProgressStage::Finished));
        drop(sink);

        assert_eq!(stream.next().await.unwrap().payload.stage, ProgressStage::Started);
        assert_eq!(stream.next().await.unwrap().payload.stage, ProgressStage::Finished);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn emitting_after_close_is_a_no_op() {
        let (sink, mut stream) = progress_channel();
        stream.close();
        sink.emit(progress(ProgressStage::Searching));
        assert!(stream.try_next().is_none());
    }
}
