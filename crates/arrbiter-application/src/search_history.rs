// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;

use anyhow::Result;
use arrbiter_domain::{HuntType, InstanceId, MediaType, SearchedItem};
use arrbiter_infrastructure::SearchHistoryRepository;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub type HistoryKey = (MediaType, i64, Option<i32>);

/// Recently searched items for one hunt config and type, loaded once per run.
#[derive(Debug, Clone)]
pub struct SearchHistoryManager {
    hunt_config_id: InstanceId,
    hunt_type: HuntType,
    retention_days: u32,
    recent: HashSet<HistoryKey>,
    recent_count: usize,
}

impl SearchHistoryManager {
    /// Load history inside the retention window. A window of zero days means
    /// nothing counts as recent.
    pub async fn load(
        repository: &dyn SearchHistoryRepository,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let entries = if retention_days == 0 {
            Vec::new()
        } else {
            let since = now - Duration::days(i64::from(retention_days));
            repository.list_since(hunt_config_id, hunt_type, since).await?
        };
        debug!(
            target: "hunt",
            instance = %hunt_config_id,
            hunt_type = %hunt_type,
            retention_days,
            entries = entries.len(),
            "loaded search history"
        );
        Ok(Self::from_entries(
            hunt_config_id.clone(),
            hunt_type,
            retention_days,
            &entries,
        ))
    }

    pub fn from_entries(
        hunt_config_id: InstanceId,
        hunt_type: HuntType,
        retention_days: u32,
        entries: &[SearchedItem],
    ) -> Self {
        Self {
            hunt_config_id,
            hunt_type,
            retention_days,
            recent: entries
                .iter()
                .map(|entry| (entry.media_type, entry.media_id, entry.season_number))
                .collect(),
            recent_count: entries.len(),
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Number of history rows inside the window; drives page rotation.
    pub fn recent_search_count(&self) -> usize {
        self.recent_count
    }

    pub fn was_recently_searched(
        &self,
        media_type: MediaType,
        media_id: i64,
        season_number: Option<i32>,
    ) -> bool {
        self.recent.contains(&(media_type, media_id, season_number))
    }

    /// Split off items searched inside the window, returning the rest and the
    /// number removed.
    pub fn filter_unsearched<T, F>(&self, items: Vec<T>, key: F) -> (Vec<T>, usize)
    where
        F: Fn(&T) -> HistoryKey,
    {
        let before = items.len();
        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| {
                let (media_type, media_id, season) = key(item);
                !self.was_recently_searched(media_type, media_id, season)
            })
            .collect();
        let filtered = before - kept.len();
        (kept, filtered)
    }

    pub async fn record(
        &self,
        repository: &dyn SearchHistoryRepository,
        items: &[SearchedItem],
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        repository
            .record(&self.hunt_config_id, self.hunt_type, items)
            .await
    }
}
