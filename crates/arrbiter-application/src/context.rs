// SPDX-License-Identifier: GPL-3.0-or-later
use std::sync::Arc;

use arrbiter_domain::{DomainEvent, HuntProgressPayload, ProgressStage, RunId};
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::events::ProgressSink;

/// Per-run state threaded through one hunt or cleaner run.
///
/// Every call to an *arr instance goes through [`RunContext::record_api_call`],
/// so the counter in the result is exact.
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    api_calls: u32,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
            api_calls: 0,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn record_api_call(&mut self) {
        self.api_calls += 1;
    }

    pub fn api_calls(&self) -> u32 {
        self.api_calls
    }

    pub fn emit(&self, stage: ProgressStage, message: impl Into<String>) {
        let Some(sink) = &self.progress else {
            return;
        };
        let message = message.into();
        trace!(target: "hunt", run_id = %self.run_id, ?stage, %message, "progress");
        sink.emit(DomainEvent::new(
            "hunt.progress",
            HuntProgressPayload {
                run_id: self.run_id,
                stage,
                message,
                api_calls: self.api_calls,
            },
        ));
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryEventBus;

    #[test]
    fn counts_calls_and_stamps_progress() {
        let bus = InMemoryEventBus::new();
        let mut ctx = RunContext::new().with_progress(Arc::new(bus.clone()));
        ctx.record_api_call();
        ctx.record_api_call();
        ctx.emit(ProgressStage::Fetched, "2 pages");

        assert_eq!(ctx.api_calls(), 2);
        let events = bus.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["payload"]["api_calls"], 2);
        assert_eq!(events[0]["payload"]["run_id"], ctx.run_id.to_string());
    }

    #[test]
    fn emitting_without_sink_is_silent() {
        let ctx = RunContext::new();
        ctx.emit(ProgressStage::Started, "nobody listens");
        assert_eq!(ctx.api_calls(), 0);
    }
}
