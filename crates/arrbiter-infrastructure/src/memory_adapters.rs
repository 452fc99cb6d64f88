// SPDX-License-Identifier: GPL-3.0-or-later
//! Process-local repositories, used when no database is wanted (dry runs, tests).

use anyhow::Result;
use arrbiter_domain::{HuntType, InstanceId, QueueCleanerStrike, SearchedItem};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::repositories::{SearchHistoryRepository, StrikeRepository};

type HistoryKey = (InstanceId, HuntType);

#[derive(Clone, Default)]
pub struct InMemorySearchHistoryRepository {
    inner: Arc<Mutex<HashMap<HistoryKey, Vec<SearchedItem>>>>,
}

impl InMemorySearchHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HistoryKey, Vec<SearchedItem>>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(target: "repository", "search history mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[async_trait::async_trait]
impl SearchHistoryRepository for InMemorySearchHistoryRepository {
    async fn list_since(
        &self,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        since: DateTime<Utc>,
    ) -> Result<Vec<SearchedItem>> {
        let guard = self.lock();
        Ok(guard
            .get(&(hunt_config_id.clone(), hunt_type))
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.searched_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn record(
        &self,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        items: &[SearchedItem],
    ) -> Result<()> {
        self.lock()
            .entry((hunt_config_id.clone(), hunt_type))
            .or_default()
            .extend_from_slice(items);
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.lock();
        let mut pruned = 0u64;
        for items in guard.values_mut() {
            let before = items.len();
            items.retain(|item| item.searched_at >= cutoff);
            pruned += (before - items.len()) as u64;
        }
        Ok(pruned)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStrikeRepository {
    inner: Arc<Mutex<HashMap<(InstanceId, String), QueueCleanerStrike>>>,
}

impl InMemoryStrikeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(InstanceId, String), QueueCleanerStrike>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(target: "repository", "strike mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[async_trait::async_trait]
impl StrikeRepository for InMemoryStrikeRepository {
    async fn list_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<QueueCleanerStrike>> {
        Ok(self
            .lock()
            .values()
            .filter(|strike| &strike.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn save_all(&self, strikes: &[QueueCleanerStrike]) -> Result<()> {
        let mut guard = self.lock();
        for strike in strikes {
            guard.insert(
                (strike.instance_id.clone(), strike.download_id.clone()),
                strike.clone(),
            );
        }
        Ok(())
    }

    async fn delete(&self, instance_id: &InstanceId, download_ids: &[String]) -> Result<u64> {
        let mut guard = self.lock();
        let deleted = download_ids
            .iter()
            .filter(|id| guard.remove(&(instance_id.clone(), (*id).clone())).is_some())
            .count();
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrbiter_domain::MediaType;
    use chrono::Duration;

    #[tokio::test]
    async fn history_window_and_prune() {
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("lidarr");
        let now = Utc::now();
        let item = |media_id, age_days| SearchedItem {
            media_type: MediaType::Album,
            media_id,
            season_number: None,
            title: "album".to_string(),
            searched_at: now - Duration::days(age_days),
        };
        repo.record(&id, HuntType::Missing, &[item(1, 1), item(2, 20)])
            .await
            .unwrap();

        let recent = repo
            .list_since(&id, HuntType::Missing, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert!(repo
            .list_since(&id, HuntType::Upgrade, now - Duration::days(7))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(repo.prune_older_than(now - Duration::days(7)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn strikes_are_isolated_per_instance() {
        let repo = InMemoryStrikeRepository::new();
        let a = InstanceId::from("a");
        let b = InstanceId::from("b");
        repo.save_all(&[
            QueueCleanerStrike::new(a.clone(), "x"),
            QueueCleanerStrike::new(b.clone(), "x"),
        ])
        .await
        .unwrap();

        assert_eq!(repo.list_for_instance(&a).await.unwrap().len(), 1);
        assert_eq!(repo.delete(&a, &["x".to_string()]).await.unwrap(), 1);
        assert!(repo.list_for_instance(&a).await.unwrap().is_empty());
        assert_eq!(repo.list_for_instance(&b).await.unwrap().len(), 1);
    }
}
