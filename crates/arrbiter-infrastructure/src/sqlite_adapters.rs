// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use arrbiter_domain::{HuntType, InstanceId, MediaType, QueueCleanerStrike, SearchedItem};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::debug;

use crate::repositories::{SearchHistoryRepository, StrikeRepository};

/// SQLx-backed search history repository
pub struct SqliteSearchHistoryRepository {
    pool: SqlitePool,
}

impl SqliteSearchHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SearchHistoryRepository for SqliteSearchHistoryRepository {
    async fn list_since(
        &self,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        since: DateTime<Utc>,
    ) -> Result<Vec<SearchedItem>> {
        debug!(target: "repository", %hunt_config_id, %hunt_type, "listing search history");
        let rows = sqlx::query(
            r#"
            SELECT media_type, media_id, season_number, title, searched_at
            FROM search_history
            WHERE hunt_config_id = ? AND hunt_type = ? AND searched_at >= ?
            ORDER BY searched_at DESC
            "#,
        )
        .bind(hunt_config_id.as_str())
        .bind(hunt_type.as_str())
        .bind(format_timestamp(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_searched_item).collect()
    }

    async fn record(
        &self,
        hunt_config_id: &InstanceId,
        hunt_type: HuntType,
        items: &[SearchedItem],
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        debug!(target: "repository", %hunt_config_id, %hunt_type, count = items.len(), "recording search history");

        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO search_history (
                    hunt_config_id, hunt_type, media_type, media_id, season_number, title, searched_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(hunt_config_id.as_str())
            .bind(hunt_type.as_str())
            .bind(item.media_type.as_str())
            .bind(item.media_id)
            .bind(item.season_number)
            .bind(&item.title)
            .bind(format_timestamp(item.searched_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM search_history WHERE searched_at < ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        debug!(target: "repository", pruned = result.rows_affected(), "pruned search history");
        Ok(result.rows_affected())
    }
}

/// SQLx-backed strike repository
pub struct SqliteStrikeRepository {
    pool: SqlitePool,
}

impl SqliteStrikeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StrikeRepository for SqliteStrikeRepository {
    async fn list_for_instance(&self, instance_id: &InstanceId) -> Result<Vec<QueueCleanerStrike>> {
        debug!(target: "repository", %instance_id, "listing strikes");
        let rows = sqlx::query("SELECT * FROM queue_cleaner_strikes WHERE instance_id = ?")
            .bind(instance_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_strike).collect()
    }

    async fn save_all(&self, strikes: &[QueueCleanerStrike]) -> Result<()> {
        if strikes.is_empty() {
            return Ok(());
        }
        debug!(target: "repository", count = strikes.len(), "saving strikes");

        let mut tx = self.pool.begin().await?;
        for strike in strikes {
            sqlx::query(
                r#"
                INSERT INTO queue_cleaner_strikes (
                    instance_id, download_id, strike_count, last_rule, last_reason,
                    import_attempts, last_import_attempt, last_import_error, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(instance_id, download_id) DO UPDATE SET
                    strike_count = excluded.strike_count,
                    last_rule = excluded.last_rule,
                    last_reason = excluded.last_reason,
                    import_attempts = excluded.import_attempts,
                    last_import_attempt = excluded.last_import_attempt,
                    last_import_error = excluded.last_import_error,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(strike.instance_id.as_str())
            .bind(&strike.download_id)
            .bind(i64::from(strike.strike_count))
            .bind(&strike.last_rule)
            .bind(&strike.last_reason)
            .bind(i64::from(strike.import_attempts))
            .bind(strike.last_import_attempt.map(format_timestamp))
            .bind(strike.last_import_error.clone())
            .bind(format_timestamp(strike.created_at))
            .bind(format_timestamp(strike.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, instance_id: &InstanceId, download_ids: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for download_id in download_ids {
            let result = sqlx::query(
                "DELETE FROM queue_cleaner_strikes WHERE instance_id = ? AND download_id = ?",
            )
            .bind(instance_id.as_str())
            .bind(download_id)
            .execute(&self.pool)
            .await?;
            deleted += result.rows_affected();
        }
        debug!(target: "repository", %instance_id, deleted, "deleted strikes");
        Ok(deleted)
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Fixed-width RFC 3339 so that string comparison in SQL matches time order.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn row_to_searched_item(row: &SqliteRow) -> Result<SearchedItem> {
    let media_type: String = row.try_get("media_type")?;
    let searched_at: String = row.try_get("searched_at")?;
    Ok(SearchedItem {
        media_type: MediaType::parse(&media_type)
            .ok_or_else(|| anyhow!("unknown media type '{}'", media_type))?,
        media_id: row.try_get("media_id")?,
        season_number: row.try_get("season_number")?,
        title: row.try_get("title")?,
        searched_at: parse_timestamp(&searched_at)?,
    })
}

fn row_to_strike(row: &SqliteRow) -> Result<QueueCleanerStrike> {
    let instance_id: String = row.try_get("instance_id")?;
    let strike_count: i64 = row.try_get("strike_count")?;
    let import_attempts: i64 = row.try_get("import_attempts")?;
    let last_import_attempt: Option<String> = row.try_get("last_import_attempt")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(QueueCleanerStrike {
        instance_id: InstanceId::new(instance_id),
        download_id: row.try_get("download_id")?,
        strike_count: u32::try_from(strike_count)?,
        last_rule: row.try_get("last_rule")?,
        last_reason: row.try_get("last_reason")?,
        import_attempts: u32::try_from(import_attempts)?,
        last_import_attempt: last_import_attempt
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        last_import_error: row.try_get("last_import_error")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        crate::run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn searched(media_type: MediaType, id: i64, at: DateTime<Utc>) -> SearchedItem {
        SearchedItem {
            media_type,
            media_id: id,
            season_number: (media_type == MediaType::Season).then_some(2),
            title: format!("item {}", id),
            searched_at: at,
        }
    }

    #[tokio::test]
    async fn history_is_scoped_by_config_type_and_window() {
        let repo = SqliteSearchHistoryRepository::new(memory_pool().await);
        let sonarr = InstanceId::from("sonarr");
        let now = Utc::now();

        repo.record(
            &sonarr,
            HuntType::Missing,
            &[
                searched(MediaType::Episode, 1, now - Duration::hours(1)),
                searched(MediaType::Season, 7, now - Duration::hours(2)),
                searched(MediaType::Episode, 2, now - Duration::days(10)),
            ],
        )
        .await
        .unwrap();
        repo.record(
            &sonarr,
            HuntType::Upgrade,
            &[searched(MediaType::Episode, 3, now)],
        )
        .await
        .unwrap();

        let recent = repo
            .list_since(&sonarr, HuntType::Missing, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].media_id, 1);
        assert_eq!(recent[1].media_type, MediaType::Season);
        assert_eq!(recent[1].season_number, Some(2));

        let other = repo
            .list_since(&InstanceId::from("radarr"), HuntType::Missing, now - Duration::days(30))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn prune_removes_only_expired_rows() {
        let repo = SqliteSearchHistoryRepository::new(memory_pool().await);
        let id = InstanceId::from("radarr");
        let now = Utc::now();
        repo.record(
            &id,
            HuntType::Missing,
            &[
                searched(MediaType::Movie, 1, now - Duration::days(40)),
                searched(MediaType::Movie, 2, now),
            ],
        )
        .await
        .unwrap();

        let pruned = repo.prune_older_than(now - Duration::days(30)).await.unwrap();
        assert_eq!(pruned, 1);
        let left = repo
            .list_since(&id, HuntType::Missing, now - Duration::days(365))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].media_id, 2);
    }

    #[tokio::test]
    async fn strikes_upsert_and_delete() {
        let repo = SqliteStrikeRepository::new(memory_pool().await);
        let instance = InstanceId::from("sonarr");

        let mut strike = QueueCleanerStrike::new(instance.clone(), "abc");
        strike.strike_count = 1;
        strike.last_rule = "stalled".to_string();
        repo.save_all(&[strike.clone()]).await.unwrap();

        strike.strike_count = 2;
        strike.import_attempts = 1;
        strike.last_import_attempt = Some(Utc::now());
        strike.last_import_error = Some("no files".to_string());
        repo.save_all(&[strike.clone()]).await.unwrap();

        let stored = repo.list_for_instance(&instance).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].strike_count, 2);
        assert_eq!(stored[0].import_attempts, 1);
        assert!(stored[0].last_import_attempt.is_some());
        assert_eq!(stored[0].last_import_error.as_deref(), Some("no files"));

        let deleted = repo
            .delete(&instance, &["abc".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.list_for_instance(&instance).await.unwrap().is_empty());
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = Utc::now();
        let late = early + Duration::milliseconds(1500);
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(
            parse_timestamp(&format_timestamp(early))
                .unwrap()
                .timestamp_millis(),
            early.timestamp_millis()
        );
    }
}
