// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use arrbiter_domain::{HuntType, InstanceId, QueueCleanerStrike, SearchedItem};
use chrono::{DateTime, Utc};

// ============================================================================
// Repository Traits
// ============================================================================

/// Search history, keyed by hunt config (one per instance) and hunt type.
///
/// Entries age out by timestamp; `list_since` is the retention-window read.
#[async_trait::async_trait]
pub trait SearchHistoryRepository: Send + Sync {
    async fn list_since(
        &self,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        since: DateTime<Utc>,
    ) -> Result<Vec<SearchedItem>>;

    async fn record(
        &self,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        items: &[SearchedItem],
    ) -> Result<()>;

    /// Remove rows older than `cutoff`, returning how many were deleted.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Per-download strike records for the queue cleaner.
#[async_trait::async_trait]
pub trait StrikeRepository: Send + Sync {
    async fn list_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<QueueCleanerStrike>>;

    /// Insert or update every given strike in one batch.
    async fn save_all(&self, strikes: &[QueueCleanerStrike]) -> Result<()>;

    async fn delete(&self, instance_id: &InstanceId, download_ids: &[String]) -> Result<u64>;
}
