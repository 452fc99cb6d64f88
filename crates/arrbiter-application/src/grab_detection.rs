// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::time::Duration;

use arrbiter_domain::GrabbedItem;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::arr_client::{ArrClient, HistoryQuery};
use crate::context::RunContext;
use crate::wire::{date_field, int_field, size_field, str_field};

pub const GRAB_CHECK_DELAY_MS: u64 = 5000;
pub const GRAB_HISTORY_PAGE_SIZE: u32 = 100;
pub const QUEUE_FALLBACK_PAGE_SIZE: u32 = 1000;

/// Ids a hunt just searched, by the field name they appear under in history
/// and queue records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchedIds {
    pub movie_ids: HashSet<i64>,
    pub series_ids: HashSet<i64>,
    pub episode_ids: HashSet<i64>,
    pub album_ids: HashSet<i64>,
    pub book_ids: HashSet<i64>,
}

impl SearchedIds {
    pub fn is_empty(&self) -> bool {
        self.movie_ids.is_empty()
            && self.series_ids.is_empty()
            && self.episode_ids.is_empty()
            && self.album_ids.is_empty()
            && self.book_ids.is_empty()
    }

    pub fn matches(&self, record: &Value) -> bool {
        let hit = |key: &str, ids: &HashSet<i64>| {
            !ids.is_empty() && int_field(record, &[key]).is_some_and(|id| ids.contains(&id))
        };
        hit("movieId", &self.movie_ids)
            || hit("seriesId", &self.series_ids)
            || hit("episodeId", &self.episode_ids)
            || hit("albumId", &self.album_ids)
            || hit("bookId", &self.book_ids)
    }
}

fn grabbed_item(record: &Value) -> GrabbedItem {
    GrabbedItem {
        title: str_field(record, &["sourceTitle"])
            .or_else(|| str_field(record, &["title"]))
            .unwrap_or("unknown")
            .to_string(),
        quality: str_field(record, &["quality", "quality", "name"]).map(str::to_string),
        indexer: str_field(record, &["data", "indexer"])
            .or_else(|| str_field(record, &["indexer"]))
            .map(str::to_string),
        size: size_field(record, &["data", "size"]).or_else(|| size_field(record, &["size"])),
    }
}

/// Grabs from history records at or after `since` for the searched ids,
/// one per download id.
pub fn grabs_from_history(records: &[Value], ids: &SearchedIds, since: DateTime<Utc>) -> Vec<GrabbedItem> {
    let mut seen_downloads = HashSet::new();
    records
        .iter()
        .filter(|record| date_field(record, &["date"]).is_some_and(|date| date >= since))
        .filter(|record| ids.matches(record))
        .filter(|record| match str_field(record, &["downloadId"]) {
            Some(download_id) => seen_downloads.insert(download_id.to_string()),
            None => true,
        })
        .map(grabbed_item)
        .collect()
}

/// Queue presence only shows something was picked up, not what was grabbed.
pub fn grabs_from_queue(records: &[Value], ids: &SearchedIds) -> Vec<GrabbedItem> {
    let mut seen_downloads = HashSet::new();
    records
        .iter()
        .filter(|record| ids.matches(record))
        .filter(|record| match str_field(record, &["downloadId"]) {
            Some(download_id) => seen_downloads.insert(download_id.to_string()),
            None => true,
        })
        .map(grabbed_item)
        .collect()
}

/// Wait for the instance to react to the searches, then look for grabs.
///
/// History is the primary signal; the live queue is a degraded fallback. When
/// both are unavailable the result is empty.
pub async fn detect_grabs(
    client: &dyn ArrClient,
    ctx: &mut RunContext,
    ids: &SearchedIds,
    since: DateTime<Utc>,
) -> Vec<GrabbedItem> {
    if ids.is_empty() {
        return Vec::new();
    }

    tokio::time::sleep(Duration::from_millis(GRAB_CHECK_DELAY_MS)).await;

    ctx.record_api_call();
    let history_error = match client
        .history(&HistoryQuery::recent_grabs(GRAB_HISTORY_PAGE_SIZE))
        .await
    {
        Ok(page) => {
            let grabs = grabs_from_history(&page.records, ids, since);
            debug!(
                target: "hunt",
                service = %client.service(),
                history_records = page.records.len(),
                grabs = grabs.len(),
                "checked grab history"
            );
            return grabs;
        }
        Err(err) => err,
    };

    warn!(
        target: "hunt",
        service = %client.service(),
        error = %history_error,
        "grab history unavailable, falling back to queue inspection"
    );

    ctx.record_api_call();
    match client.queue(QUEUE_FALLBACK_PAGE_SIZE).await {
        Ok(page) => grabs_from_queue(&page.records, ids),
        Err(queue_error) => {
            error!(
                target: "hunt",
                service = %client.service(),
                history_error = %history_error,
                queue_error = %queue_error,
                "grab detection failed; grabbed count will under-report"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArrClient;
    use arrbiter_domain::ServiceKind;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn movie_ids(ids: &[i64]) -> SearchedIds {
        SearchedIds {
            movie_ids: ids.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn history_grabs_respect_time_ids_and_dedupe() {
        let since = Utc::now() - ChronoDuration::minutes(1);
        let fresh = Utc::now().to_rfc3339();
        let stale = (Utc::now() - ChronoDuration::hours(2)).to_rfc3339();
        let records = vec![
            json!({
                "movieId": 1, "date": fresh, "downloadId": "A",
                "sourceTitle": "Movie.2024.1080p",
                "quality": { "quality": { "name": "Bluray-1080p" } },
                "data": { "indexer": "Indexer (Prowlarr)", "size": "4294967296" }
            }),
            json!({ "movieId": 1, "date": fresh, "downloadId": "A", "sourceTitle": "dup" }),
            json!({ "movieId": 2, "date": fresh, "downloadId": "B", "sourceTitle": "other" }),
            json!({ "movieId": 1, "date": stale, "downloadId": "C", "sourceTitle": "old" }),
        ];

        let grabs = grabs_from_history(&records, &movie_ids(&[1]), since);
        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].title, "Movie.2024.1080p");
        assert_eq!(grabs[0].quality.as_deref(), Some("Bluray-1080p"));
        assert_eq!(grabs[0].indexer.as_deref(), Some("Indexer (Prowlarr)"));
        assert_eq!(grabs[0].size, Some(4_294_967_296));
    }

    #[test]
    fn season_grabs_match_on_series_id() {
        let ids = SearchedIds {
            series_ids: [7].into_iter().collect(),
            ..Default::default()
        };
        let record = json!({ "seriesId": "7", "episodeId": 700, "date": Utc::now().to_rfc3339() });
        assert!(ids.matches(&record));
        assert!(!ids.matches(&json!({ "seriesId": 8 })));
    }

    #[test]
    fn queue_fallback_uses_top_level_fields() {
        let records = vec![json!({
            "movieId": 3, "title": "Queued.Movie", "indexer": "NZBgeek", "size": 1024.0, "downloadId": "Q"
        })];
        let grabs = grabs_from_queue(&records, &movie_ids(&[3]));
        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].title, "Queued.Movie");
        assert_eq!(grabs[0].indexer.as_deref(), Some("NZBgeek"));
        assert_eq!(grabs[0].size, Some(1024));
    }

    #[test]
    fn album_and_book_ids_match() {
        let ids = SearchedIds {
            album_ids: [11].into_iter().collect(),
            book_ids: [22].into_iter().collect(),
            ..Default::default()
        };
        assert!(ids.matches(&json!({ "albumId": 11 })));
        assert!(ids.matches(&json!({ "bookId": 22 })));
        assert!(!ids.matches(&json!({ "albumId": 22 })));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_history_falls_back_to_queue() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_queue(vec![json!({ "movieId": 3, "title": "Queued.Movie", "downloadId": "Q" })]);
        let mut ctx = RunContext::new();

        let grabs = detect_grabs(&client, &mut ctx, &movie_ids(&[3]), Utc::now()).await;

        assert_eq!(grabs.len(), 1);
        assert_eq!(grabs[0].title, "Queued.Movie");
        assert_eq!(ctx.api_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn both_sources_failing_yields_nothing() {
        let client = FakeArrClient::new(ServiceKind::Radarr).failing_queue("queue down");
        let mut ctx = RunContext::new();

        let grabs = detect_grabs(&client, &mut ctx, &movie_ids(&[3]), Utc::now()).await;

        assert!(grabs.is_empty());
        assert_eq!(ctx.api_calls(), 2);
    }

    #[tokio::test]
    async fn nothing_searched_makes_no_calls() {
        let client = FakeArrClient::new(ServiceKind::Radarr);
        let mut ctx = RunContext::new();

        let grabs = detect_grabs(&client, &mut ctx, &SearchedIds::default(), Utc::now()).await;

        assert!(grabs.is_empty());
        assert_eq!(ctx.api_calls(), 0);
    }
}
