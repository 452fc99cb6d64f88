// SPDX-License-Identifier: GPL-3.0-or-later
use arrbiter_config::{AppConfig, InstanceConfig};
pub mod arr_client;
pub mod auto_import;
pub mod batching;
pub mod context;
pub mod events;
pub mod filters;
pub mod grab_detection;
pub mod hunt;
pub mod keywords;
pub mod pagination;
pub mod queue_cleaner;
pub mod queue_rules;
pub mod search_history;
pub mod wire;

#[cfg(test)]
mod testing;

pub use arr_client::{ArrClient, ArrClientError, ArrCommand, ArrHttpClient, RemovalOptions};
pub use context::RunContext;
pub use events::{
    progress_channel, ChannelProgressSink, EventPublisher, InMemoryEventBus, ProgressSink,
    ProgressStream,
};
pub use hunt::{run_hunt, HuntRequest};
pub use queue_cleaner::{run_queue_cleaner, CleanerRequest};

use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// An API client for one configured instance, sharing the connection pool.
    pub fn client_for(&self, instance: &InstanceConfig) -> ArrHttpClient {
        ArrHttpClient::with_client(
            self.http.clone(),
            instance.service,
            instance.base_url.clone(),
            instance.api_key.clone(),
        )
    }

    pub fn on_start(&self) {
        info!(
            target: "application",
            instances = self.config.instances.len(),
            "application state initialized"
        );
    }
}
