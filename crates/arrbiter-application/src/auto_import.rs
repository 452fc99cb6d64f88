// SPDX-License-Identifier: GPL-3.0-or-later
use arrbiter_domain::{AutoImportOutcome, QueueCleanerStrike, QueueItem};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::arr_client::{ArrClient, ArrCommand};
use crate::context::RunContext;
use crate::keywords::{find_keyword, NEVER_AUTO_IMPORT_KEYWORDS, SAFE_AUTO_IMPORT_KEYWORDS};
use crate::queue_rules::CleanerSettings;
use crate::wire::{field, int_field, str_field};

pub const AUTO_IMPORT_DELAY_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoImportEligibility {
    pub eligible: bool,
    pub reason: String,
}

impl AutoImportEligibility {
    fn eligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: true,
            reason: reason.into(),
        }
    }

    fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: reason.into(),
        }
    }
}

/// Decide whether a stuck import may be retried through a manual import.
///
/// Checks run in a fixed order: disabled, attempt ceiling, cooldown, never-import
/// keywords, then the safe-pattern allowlist when `safe_only` is set. A
/// never-import match is final.
pub fn check_auto_import_eligibility(
    texts: &[String],
    settings: &CleanerSettings,
    strike: Option<&QueueCleanerStrike>,
    now: DateTime<Utc>,
) -> AutoImportEligibility {
    let config = &settings.config;
    if !config.auto_import_enabled {
        return AutoImportEligibility::ineligible("auto-import is disabled");
    }

    let attempts = strike.map_or(0, |strike| strike.import_attempts);
    if attempts >= config.auto_import_max_attempts {
        return AutoImportEligibility::ineligible(format!(
            "max import attempts reached ({attempts}/{})",
            config.auto_import_max_attempts
        ));
    }

    if let Some(last) = strike.and_then(|strike| strike.last_import_attempt) {
        let cooldown = Duration::minutes(i64::from(config.auto_import_cooldown_mins));
        let elapsed = now - last;
        if elapsed < cooldown {
            let remaining_ms = (cooldown - elapsed).num_milliseconds();
            let remaining_mins = (remaining_ms + 59_999) / 60_000;
            return AutoImportEligibility::ineligible(format!(
                "cooldown active, {remaining_mins} minutes remaining"
            ));
        }
    }

    if let Some(found) = find_keyword(texts, NEVER_AUTO_IMPORT_KEYWORDS)
        .or_else(|| find_keyword(texts, &settings.never_patterns))
    {
        return AutoImportEligibility::ineligible(format!(
            "never-import pattern matched: '{}'",
            found.keyword
        ));
    }

    if config.auto_import_safe_only {
        return match find_keyword(texts, SAFE_AUTO_IMPORT_KEYWORDS)
            .or_else(|| find_keyword(texts, &settings.custom_safe_patterns))
        {
            Some(found) => {
                AutoImportEligibility::eligible(format!("safe pattern matched: '{}'", found.keyword))
            }
            None => AutoImportEligibility::ineligible("no safe pattern matched"),
        };
    }

    AutoImportEligibility::eligible("no blocking pattern matched")
}

fn copy_if_present(source: &Value, target: &mut Map<String, Value>, key: &str) {
    if let Some(value) = field(source, &[key]) {
        target.insert(key.to_string(), value.clone());
    }
}

fn nested_or_flat_id(candidate: &Value, object: &str, flat: &str) -> Option<i64> {
    int_field(candidate, &[object, "id"]).or_else(|| int_field(candidate, &[flat]))
}

/// Build one `ManualImport` file entry from a `/manualimport` candidate. Files
/// that were not mapped to any library item cannot be imported and yield `None`.
pub fn manual_import_file(candidate: &Value, download_id: &str) -> Option<Value> {
    let path = str_field(candidate, &["path"])?;
    let mut file = Map::new();
    file.insert("path".to_string(), json!(path));
    file.insert("downloadId".to_string(), json!(download_id));
    for key in ["quality", "languages", "releaseGroup", "indexerFlags"] {
        copy_if_present(candidate, &mut file, key);
    }

    if let Some(series_id) = nested_or_flat_id(candidate, "series", "seriesId") {
        let episode_ids: Vec<i64> = field(candidate, &["episodes"])
            .and_then(Value::as_array)
            .map(|episodes| {
                episodes
                    .iter()
                    .filter_map(|episode| int_field(episode, &["id"]))
                    .collect()
            })
            .unwrap_or_default();
        if episode_ids.is_empty() {
            return None;
        }
        file.insert("seriesId".to_string(), json!(series_id));
        file.insert("episodeIds".to_string(), json!(episode_ids));
    } else if let Some(movie_id) = nested_or_flat_id(candidate, "movie", "movieId") {
        file.insert("movieId".to_string(), json!(movie_id));
    } else if let Some(album_id) = nested_or_flat_id(candidate, "album", "albumId") {
        file.insert("albumId".to_string(), json!(album_id));
        if let Some(artist_id) = nested_or_flat_id(candidate, "artist", "artistId") {
            file.insert("artistId".to_string(), json!(artist_id));
        }
        copy_if_present(candidate, &mut file, "albumReleaseId");
    } else if let Some(book_id) = nested_or_flat_id(candidate, "book", "bookId") {
        file.insert("bookId".to_string(), json!(book_id));
        if let Some(author_id) = nested_or_flat_id(candidate, "author", "authorId") {
            file.insert("authorId".to_string(), json!(author_id));
        }
    } else {
        return None;
    }

    Some(Value::Object(file))
}

/// Ask the instance for importable files of the item's download and import them.
pub async fn attempt_auto_import(
    client: &dyn ArrClient,
    ctx: &mut RunContext,
    item: &QueueItem,
) -> AutoImportOutcome {
    let failed = |error: String| AutoImportOutcome {
        attempted: true,
        success: false,
        error: Some(error),
    };

    let Some(download_id) = item.download_id.as_deref().filter(|id| !id.trim().is_empty())
    else {
        return AutoImportOutcome {
            attempted: false,
            success: false,
            error: Some("queue item has no download id".to_string()),
        };
    };

    ctx.record_api_call();
    let candidates = match client.manual_import_candidates(download_id).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(
                target: "queue_cleaner",
                queue_id = item.id,
                download_id,
                error = %err,
                "manual import lookup failed"
            );
            return failed(err.to_string());
        }
    };

    let files: Vec<Value> = candidates
        .iter()
        .filter_map(|candidate| manual_import_file(candidate, download_id))
        .collect();
    debug!(
        target: "queue_cleaner",
        queue_id = item.id,
        candidates = candidates.len(),
        importable = files.len(),
        "manual import candidates"
    );
    if files.is_empty() {
        return failed("no importable files found".to_string());
    }

    let file_count = files.len();
    ctx.record_api_call();
    match client
        .execute_command(&ArrCommand::ManualImport {
            files,
            import_mode: "auto".to_string(),
        })
        .await
    {
        Ok(_) => {
            info!(
                target: "queue_cleaner",
                queue_id = item.id,
                download_id,
                files = file_count,
                "manual import issued"
            );
            AutoImportOutcome {
                attempted: true,
                success: true,
                error: None,
            }
        }
        Err(err) => {
            warn!(
                target: "queue_cleaner",
                queue_id = item.id,
                download_id,
                error = %err,
                "manual import command failed"
            );
            failed(err.to_string())
        }
    }
}
