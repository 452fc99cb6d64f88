// SPDX-License-Identifier: GPL-3.0-or-later
//! Hunt executor: one missing or upgrade hunt against one *arr instance.

use std::collections::HashMap;
use std::time::Duration;

use arrbiter_domain::{
    HuntConfig, HuntResult, HuntType, InstanceId, MediaType, ProgressStage, RunStatus,
    SearchedItem, ServiceKind,
};
use arrbiter_infrastructure::SearchHistoryRepository;
use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::arr_client::{ArrClient, ArrClientError, ArrCommand, Page, SortDirection, WantedQuery};
use crate::batching::{plan_flat_searches, plan_sonarr_searches, shuffle, EpisodeCandidate};
use crate::context::RunContext;
use crate::filters::{is_content_released, CandidateItem, ParsedFilters};
use crate::grab_detection::{detect_grabs, SearchedIds};
use crate::pagination::{fetch_rotating_page, fetch_size_for_batch};
use crate::search_history::SearchHistoryManager;
use crate::wire::{bool_field, date_field, int_array, int_field, str_field};

pub const SEARCH_DELAY_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum HuntError {
    #[error(transparent)]
    Client(#[from] ArrClientError),
    #[error("search history unavailable: {0}")]
    History(String),
}

#[derive(Debug, Clone, Copy)]
pub struct HuntRequest<'a> {
    pub instance_id: &'a InstanceId,
    pub config: &'a HuntConfig,
    pub hunt_type: HuntType,
}

/// Run one hunt to completion. Never fails: every outcome, including errors,
/// is reported through the returned [`HuntResult`].
pub async fn run_hunt(
    client: &dyn ArrClient,
    history: &dyn SearchHistoryRepository,
    request: HuntRequest<'_>,
    ctx: &mut RunContext,
) -> HuntResult {
    let service = client.service();
    info!(
        target: "hunt",
        instance_id = %request.instance_id,
        %service,
        hunt_type = %request.hunt_type,
        run_id = %ctx.run_id,
        "hunt started"
    );
    ctx.emit(
        ProgressStage::Started,
        format!("{} hunt started on {}", request.hunt_type, request.instance_id),
    );

    let result = match execute(client, history, request, ctx).await {
        Ok(result) => result,
        Err(err) => {
            error!(
                target: "hunt",
                instance_id = %request.instance_id,
                error = %err,
                "hunt failed"
            );
            HuntResult::empty(RunStatus::Error, err.to_string(), ctx.api_calls())
        }
    };

    ctx.emit(ProgressStage::Finished, result.message.clone());
    info!(
        target: "hunt",
        instance_id = %request.instance_id,
        status = %result.status,
        searched = result.items_searched,
        grabbed = result.items_grabbed,
        api_calls = result.api_calls_made,
        "hunt finished"
    );
    result
}

async fn execute(
    client: &dyn ArrClient,
    history_repo: &dyn SearchHistoryRepository,
    request: HuntRequest<'_>,
    ctx: &mut RunContext,
) -> Result<HuntResult, HuntError> {
    let service = client.service();
    let config = request.config;
    let hunt_type = request.hunt_type;

    if !service.supports_hunting() {
        return Ok(HuntResult::empty(
            RunStatus::Skipped,
            format!("{service} does not support hunting"),
            ctx.api_calls(),
        ));
    }
    if !config.is_enabled(hunt_type) {
        return Ok(HuntResult::empty(
            RunStatus::Skipped,
            format!("{hunt_type} hunting is disabled"),
            ctx.api_calls(),
        ));
    }
    if let Some(skipped) = check_queue_threshold(client, ctx, config.queue_threshold).await {
        return Ok(skipped);
    }

    let now = Utc::now();
    let filters = ParsedFilters::from_config(config, service);
    let history = SearchHistoryManager::load(
        history_repo,
        request.instance_id,
        hunt_type,
        config.research_after_days,
        now,
    )
    .await
    .map_err(|err| HuntError::History(err.to_string()))?;

    let batch_size = config.batch_size(hunt_type);
    let fetch_size = fetch_size_for_batch(batch_size);
    let base_query = WantedQuery {
        page: 1,
        page_size: fetch_size,
        sort_key: release_sort_key(service).to_string(),
        sort_direction: SortDirection::Descending,
        monitored_only: config.monitored_only,
    };
    let records = fetch_rotating_page(ctx, history.recent_search_count(), fetch_size, |page| {
        let query = WantedQuery {
            page,
            ..base_query.clone()
        };
        async move { fetch_wanted(client, hunt_type, &query).await }
    })
    .await?;
    ctx.emit(
        ProgressStage::Fetched,
        format!("fetched {} wanted records", records.len()),
    );

    if records.is_empty() {
        return Ok(HuntResult::empty(
            RunStatus::Completed,
            match hunt_type {
                HuntType::Missing => "No missing items found".to_string(),
                HuntType::Upgrade => "No upgrade candidates found".to_string(),
            },
            ctx.api_calls(),
        ));
    }

    let catalog = load_catalog(client, ctx).await?;
    let plan = match service {
        ServiceKind::Sonarr => {
            plan_sonarr(&records, &catalog, &filters, &history, batch_size, now)
        }
        _ => plan_flat(service, &records, &catalog, &filters, &history, batch_size, now),
    };
    ctx.emit(
        ProgressStage::Filtered,
        format!(
            "{} eligible, {} recently searched, {} selected",
            plan.eligible,
            plan.history_filtered,
            plan.searches.len()
        ),
    );

    if plan.searches.is_empty() {
        let message = if plan.eligible == 0 {
            format!(
                "No items match the configured filters ({} fetched)",
                records.len()
            )
        } else if plan.candidates == 0 && plan.history_filtered > 0 {
            format!(
                "All {} eligible items were searched in the last {} days",
                plan.eligible,
                history.retention_days()
            )
        } else {
            format!(
                "No searches selected from {} candidates (batch size {})",
                plan.candidates, batch_size
            )
        };
        return Ok(HuntResult::empty(
            RunStatus::Completed,
            message,
            ctx.api_calls(),
        ));
    }

    ctx.emit(
        ProgressStage::Searching,
        format!("issuing {} searches", plan.searches.len()),
    );
    let outcome = issue_searches(client, ctx, &plan.searches).await;

    let attempted: Vec<SearchedItem> = plan
        .searches
        .iter()
        .map(|search| search.searched_item(now))
        .collect();
    if let Err(err) = history.record(history_repo, &attempted).await {
        warn!(
            target: "hunt",
            instance_id = %request.instance_id,
            error = %err,
            "failed to record search history"
        );
    }

    let mut searched_ids = SearchedIds::default();
    for search in &outcome.succeeded {
        search.grab_key.insert_into(&mut searched_ids);
    }
    let grabbed_items = if searched_ids.is_empty() {
        Vec::new()
    } else {
        ctx.emit(ProgressStage::GrabCheck, "checking for grabs");
        let since = ctx.started_at;
        detect_grabs(client, ctx, &searched_ids, since).await
    };

    let items_searched = outcome.succeeded.len() as u32;
    let items_grabbed = grabbed_items.len() as u32;
    let mut message = format!("Searched {items_searched} items, {items_grabbed} grabbed");
    if outcome.errors > 0 {
        message.push_str(&format!(", {} searches failed", outcome.errors));
    }

    Ok(HuntResult {
        items_searched,
        items_grabbed,
        searched_items: outcome.succeeded.iter().map(|s| s.label.clone()).collect(),
        grabbed_items,
        message,
        status: if outcome.errors > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        },
        api_calls_made: ctx.api_calls(),
    })
}

/// Skip the run when the download queue is already at or above the threshold,
/// or when its size cannot be read.
pub async fn check_queue_threshold(
    client: &dyn ArrClient,
    ctx: &mut RunContext,
    threshold: u32,
) -> Option<HuntResult> {
    if threshold == 0 {
        return None;
    }
    ctx.record_api_call();
    match client.queue(1).await {
        Ok(page) if page.total_records >= u64::from(threshold) => {
            info!(
                target: "hunt",
                service = %client.service(),
                queue_size = page.total_records,
                threshold,
                "queue threshold reached, skipping hunt"
            );
            Some(HuntResult::empty(
                RunStatus::Skipped,
                format!(
                    "Queue has {} items (threshold {threshold})",
                    page.total_records
                ),
                ctx.api_calls(),
            ))
        }
        Ok(_) => None,
        Err(err) => {
            warn!(
                target: "hunt",
                service = %client.service(),
                error = %err,
                "queue size check failed, skipping hunt"
            );
            Some(HuntResult::empty(
                RunStatus::Skipped,
                format!("Unable to verify queue size: {err}"),
                ctx.api_calls(),
            ))
        }
    }
}

fn release_sort_key(service: ServiceKind) -> &'static str {
    match service {
        ServiceKind::Sonarr => "airDateUtc",
        ServiceKind::Radarr => "digitalRelease",
        _ => "releaseDate",
    }
}

async fn fetch_wanted(
    client: &dyn ArrClient,
    hunt_type: HuntType,
    query: &WantedQuery,
) -> Result<Page, ArrClientError> {
    match hunt_type {
        HuntType::Missing => client.wanted_missing(query).await,
        HuntType::Upgrade => client.wanted_cutoff(query).await,
    }
}

/// Parent records by id: series for Sonarr, artists for Lidarr, authors for
/// Readarr. Radarr movie records carry their own metadata.
async fn load_catalog(
    client: &dyn ArrClient,
    ctx: &mut RunContext,
) -> Result<HashMap<i64, Value>, ArrClientError> {
    if client.service() == ServiceKind::Radarr {
        return Ok(HashMap::new());
    }
    ctx.record_api_call();
    let records = client.catalog().await?;
    Ok(records
        .into_iter()
        .filter_map(|record| int_field(&record, &["id"]).map(|id| (id, record)))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrabKey {
    Series(i64),
    Episode(i64),
    Movie(i64),
    Album(i64),
    Book(i64),
}

impl GrabKey {
    fn insert_into(&self, ids: &mut SearchedIds) {
        match *self {
            Self::Series(id) => ids.series_ids.insert(id),
            Self::Episode(id) => ids.episode_ids.insert(id),
            Self::Movie(id) => ids.movie_ids.insert(id),
            Self::Album(id) => ids.album_ids.insert(id),
            Self::Book(id) => ids.book_ids.insert(id),
        };
    }
}

#[derive(Debug, Clone)]
struct PlannedSearch {
    command: ArrCommand,
    label: String,
    media_type: MediaType,
    media_id: i64,
    season_number: Option<i32>,
    grab_key: GrabKey,
}

impl PlannedSearch {
    fn searched_item(&self, at: DateTime<Utc>) -> SearchedItem {
        SearchedItem {
            media_type: self.media_type,
            media_id: self.media_id,
            season_number: self.season_number,
            title: self.label.clone(),
            searched_at: at,
        }
    }
}

#[derive(Debug, Default)]
struct SearchPlan {
    searches: Vec<PlannedSearch>,
    eligible: usize,
    /// Searches left after the history filter, before the batch budget.
    candidates: usize,
    history_filtered: usize,
}

fn parent_record<'a>(
    record: &'a Value,
    embedded_key: &str,
    id_key: &str,
    catalog: &'a HashMap<i64, Value>,
) -> Option<&'a Value> {
    record
        .get(embedded_key)
        .filter(|parent| parent.is_object())
        .or_else(|| int_field(record, &[id_key]).and_then(|id| catalog.get(&id)))
}

fn parent_facts(parent: Option<&Value>) -> CandidateItem {
    let Some(parent) = parent else {
        return CandidateItem {
            monitored: true,
            ..Default::default()
        };
    };
    CandidateItem {
        tags: int_array(parent, &["tags"]),
        quality_profile_id: int_field(parent, &["qualityProfileId"]),
        status: str_field(parent, &["status"]).map(str::to_string),
        year: int_field(parent, &["year"]).and_then(|year| i32::try_from(year).ok()),
        monitored: bool_field(parent, &["monitored"]).unwrap_or(true),
        release_date: None,
    }
}

fn parse_episode(record: &Value, catalog: &HashMap<i64, Value>) -> Option<(EpisodeCandidate, CandidateItem)> {
    let episode_id = int_field(record, &["id"])?;
    let series_id = int_field(record, &["seriesId"])?;
    let series = parent_record(record, "series", "seriesId", catalog);
    let mut facts = parent_facts(series);
    facts.monitored = facts.monitored && bool_field(record, &["monitored"]).unwrap_or(true);
    facts.release_date = date_field(record, &["airDateUtc"]).or_else(|| date_field(record, &["airDate"]));

    let candidate = EpisodeCandidate {
        episode_id,
        series_id,
        season_number: int_field(record, &["seasonNumber"])
            .and_then(|season| i32::try_from(season).ok())
            .unwrap_or(0),
        episode_number: int_field(record, &["episodeNumber"]).and_then(|n| i32::try_from(n).ok()),
        series_title: series
            .and_then(|series| str_field(series, &["title"]))
            .unwrap_or("Unknown series")
            .to_string(),
        title: str_field(record, &["title"]).unwrap_or("TBA").to_string(),
    };
    Some((candidate, facts))
}

fn plan_sonarr(
    records: &[Value],
    catalog: &HashMap<i64, Value>,
    filters: &ParsedFilters,
    history: &SearchHistoryManager,
    batch_size: u32,
    now: DateTime<Utc>,
) -> SearchPlan {
    let mut episodes: Vec<EpisodeCandidate> = records
        .iter()
        .filter_map(|record| parse_episode(record, catalog))
        .filter(|(_, facts)| filters.matches(facts, now))
        .filter(|(_, facts)| is_content_released(facts.release_date, now))
        .map(|(episode, _)| episode)
        .collect();
    debug!(
        target: "hunt",
        fetched = records.len(),
        eligible = episodes.len(),
        "filtered sonarr episodes"
    );
    let eligible = episodes.len();
    shuffle(&mut episodes);

    let plan = plan_sonarr_searches(episodes, history, batch_size);
    let mut searches = Vec::with_capacity(plan.seasons.len() + plan.episodes.len());
    for season in &plan.seasons {
        searches.push(PlannedSearch {
            command: ArrCommand::SeasonSearch {
                series_id: season.series_id,
                season_number: season.season_number,
            },
            label: season.label(),
            media_type: MediaType::Season,
            media_id: season.series_id,
            season_number: Some(season.season_number),
            grab_key: GrabKey::Series(season.series_id),
        });
    }
    for episode in &plan.episodes {
        searches.push(PlannedSearch {
            command: ArrCommand::EpisodeSearch {
                episode_ids: vec![episode.episode_id],
            },
            label: episode.label(),
            media_type: MediaType::Episode,
            media_id: episode.episode_id,
            season_number: None,
            grab_key: GrabKey::Episode(episode.episode_id),
        });
    }

    SearchPlan {
        searches,
        eligible,
        candidates: plan.candidates,
        history_filtered: plan.history_filtered,
    }
}

struct FlatCandidate {
    id: i64,
    label: String,
    facts: CandidateItem,
}

/// Radarr releases in several ways; the earliest known date counts.
fn movie_release_date(record: &Value) -> Option<DateTime<Utc>> {
    ["digitalRelease", "physicalRelease", "inCinemas"]
        .iter()
        .filter_map(|key| date_field(record, &[*key]))
        .min()
}

fn parse_flat(service: ServiceKind, record: &Value, catalog: &HashMap<i64, Value>) -> Option<FlatCandidate> {
    let id = int_field(record, &["id"])?;
    let title = str_field(record, &["title"])?;

    let (facts, label) = match service {
        ServiceKind::Radarr => {
            let facts = CandidateItem {
                tags: int_array(record, &["tags"]),
                quality_profile_id: int_field(record, &["qualityProfileId"]),
                status: str_field(record, &["status"]).map(str::to_string),
                year: int_field(record, &["year"]).and_then(|year| i32::try_from(year).ok()),
                monitored: bool_field(record, &["monitored"]).unwrap_or(true),
                release_date: movie_release_date(record),
            };
            let label = match facts.year {
                Some(year) if year > 0 => format!("{title} ({year})"),
                _ => title.to_string(),
            };
            (facts, label)
        }
        ServiceKind::Lidarr | ServiceKind::Readarr => {
            let (embedded, id_key, name_key) = if service == ServiceKind::Lidarr {
                ("artist", "artistId", "artistName")
            } else {
                ("author", "authorId", "authorName")
            };
            let parent = parent_record(record, embedded, id_key, catalog);
            let mut facts = parent_facts(parent);
            facts.monitored = facts.monitored && bool_field(record, &["monitored"]).unwrap_or(true);
            facts.release_date = date_field(record, &["releaseDate"]);
            facts.year = facts.release_date.map(|date| date.year());
            let label = match parent.and_then(|parent| str_field(parent, &[name_key])) {
                Some(name) => format!("{name} - {title}"),
                None => title.to_string(),
            };
            (facts, label)
        }
        ServiceKind::Sonarr | ServiceKind::Prowlarr => return None,
    };

    Some(FlatCandidate { id, label, facts })
}

fn flat_search(service: ServiceKind, candidate: FlatCandidate) -> PlannedSearch {
    let (command, media_type, grab_key) = match service {
        ServiceKind::Lidarr => (
            ArrCommand::AlbumSearch {
                album_ids: vec![candidate.id],
            },
            MediaType::Album,
            GrabKey::Album(candidate.id),
        ),
        ServiceKind::Readarr => (
            ArrCommand::BookSearch {
                book_ids: vec![candidate.id],
            },
            MediaType::Book,
            GrabKey::Book(candidate.id),
        ),
        _ => (
            ArrCommand::MoviesSearch {
                movie_ids: vec![candidate.id],
            },
            MediaType::Movie,
            GrabKey::Movie(candidate.id),
        ),
    };
    PlannedSearch {
        command,
        label: candidate.label,
        media_type,
        media_id: candidate.id,
        season_number: None,
        grab_key,
    }
}

fn flat_media_type(service: ServiceKind) -> MediaType {
    match service {
        ServiceKind::Lidarr => MediaType::Album,
        ServiceKind::Readarr => MediaType::Book,
        _ => MediaType::Movie,
    }
}

fn plan_flat(
    service: ServiceKind,
    records: &[Value],
    catalog: &HashMap<i64, Value>,
    filters: &ParsedFilters,
    history: &SearchHistoryManager,
    batch_size: u32,
    now: DateTime<Utc>,
) -> SearchPlan {
    let mut candidates: Vec<FlatCandidate> = records
        .iter()
        .filter_map(|record| parse_flat(service, record, catalog))
        .filter(|candidate| filters.matches(&candidate.facts, now))
        .filter(|candidate| is_content_released(candidate.facts.release_date, now))
        .collect();
    debug!(
        target: "hunt",
        %service,
        fetched = records.len(),
        eligible = candidates.len(),
        "filtered wanted records"
    );
    let eligible = candidates.len();
    shuffle(&mut candidates);

    let media_type = flat_media_type(service);
    let plan = plan_flat_searches(candidates, history, batch_size, |candidate| {
        (media_type, candidate.id, None)
    });

    SearchPlan {
        searches: plan
            .selected
            .into_iter()
            .map(|candidate| flat_search(service, candidate))
            .collect(),
        eligible,
        candidates: plan.candidates,
        history_filtered: plan.history_filtered,
    }
}

struct SearchOutcome<'a> {
    succeeded: Vec<&'a PlannedSearch>,
    errors: u32,
}

/// Issue searches one at a time with a fixed pause between calls. A failed
/// command is counted and the batch continues.
async fn issue_searches<'a>(
    client: &dyn ArrClient,
    ctx: &mut RunContext,
    searches: &'a [PlannedSearch],
) -> SearchOutcome<'a> {
    let mut outcome = SearchOutcome {
        succeeded: Vec::with_capacity(searches.len()),
        errors: 0,
    };
    for (index, search) in searches.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(SEARCH_DELAY_MS)).await;
        }
        ctx.record_api_call();
        match client.execute_command(&search.command).await {
            Ok(_) => {
                debug!(
                    target: "hunt",
                    command = search.command.name(),
                    item = %search.label,
                    "search issued"
                );
                outcome.succeeded.push(search);
            }
            Err(err) => {
                warn!(
                    target: "hunt",
                    command = search.command.name(),
                    item = %search.label,
                    error = %err,
                    "search command failed"
                );
                outcome.errors += 1;
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArrClient;
    use arrbiter_infrastructure::InMemorySearchHistoryRepository;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn request<'a>(id: &'a InstanceId, config: &'a HuntConfig, hunt_type: HuntType) -> HuntRequest<'a> {
        HuntRequest {
            instance_id: id,
            config,
            hunt_type,
        }
    }

    fn released() -> String {
        (Utc::now() - ChronoDuration::days(30)).to_rfc3339()
    }

    fn movie(id: i64) -> Value {
        json!({
            "id": id,
            "title": format!("Movie {id}"),
            "year": 2020,
            "monitored": true,
            "tags": [],
            "qualityProfileId": 1,
            "status": "released",
            "digitalRelease": released()
        })
    }

    fn config() -> HuntConfig {
        HuntConfig {
            queue_threshold: 0,
            missing_batch_size: 2,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn radarr_searches_batch_and_records_history() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_wanted((1..=5).map(movie).collect())
            .with_history_records(Vec::new());
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = config();
        let mut ctx = RunContext::new();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut ctx).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.items_searched, 2);
        assert_eq!(client.commands().len(), 2);
        // wanted page + two commands + grab history
        assert_eq!(result.api_calls_made, 4);

        let stored = repo
            .list_since(&id, HuntType::Missing, Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_skips_recently_searched_items() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_wanted(vec![movie(1), movie(2)])
            .with_history_records(Vec::new());
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = config();

        let first = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;
        assert_eq!(first.items_searched, 2);

        let second = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.items_searched, 0);
        assert!(second.message.contains("searched in the last 7 days"));
        assert_eq!(client.commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_batch_is_not_reported_as_recently_searched() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_wanted(vec![movie(1), movie(2)])
            .with_history_records(Vec::new());
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = HuntConfig {
            missing_batch_size: 0,
            ..config()
        };

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.items_searched, 0);
        assert!(!result.message.contains("searched in the last"));
        assert!(result.message.contains("No searches selected from 2 candidates"));
        assert!(client.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_commands_make_the_run_partial() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_wanted(vec![movie(1), movie(2)])
            .with_history_records(Vec::new())
            .failing_command_calls(&[0]);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = config();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;

        assert_eq!(result.status, RunStatus::Partial);
        assert_eq!(result.items_searched, 1);
        assert!(result.message.contains("1 searches failed"));

        // both attempts are remembered
        let stored = repo
            .list_since(&id, HuntType::Missing, Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wanted_fetch_failure_is_an_error_result() {
        let client = FakeArrClient::new(ServiceKind::Radarr).failing_wanted("connection refused");
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = config();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;

        assert_eq!(result.status, RunStatus::Error);
        assert!(result.message.contains("connection refused"));
        assert_eq!(result.api_calls_made, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_skips_the_run() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_queue((0..30).map(|id| json!({ "id": id })).collect())
            .with_wanted(vec![movie(1)]);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = HuntConfig {
            queue_threshold: 25,
            ..Default::default()
        };

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;

        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(result.api_calls_made, 1);
        assert!(client.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_check_failure_skips_the_run() {
        let client = FakeArrClient::new(ServiceKind::Radarr)
            .failing_queue("timeout")
            .with_wanted(vec![movie(1)]);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = HuntConfig {
            queue_threshold: 10,
            ..Default::default()
        };

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;
        assert_eq!(result.status, RunStatus::Skipped);
        assert!(result.message.contains("Unable to verify queue size"));
    }

    #[tokio::test(start_paused = true)]
    async fn filters_reject_everything() {
        let client = FakeArrClient::new(ServiceKind::Radarr).with_wanted(vec![movie(1)]);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = HuntConfig {
            queue_threshold: 0,
            include_tags: Some("[99]".to_string()),
            ..Default::default()
        };

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.message.starts_with("No items match the configured filters"));
    }

    #[tokio::test(start_paused = true)]
    async fn unreleased_movies_are_not_searched() {
        let mut future = movie(1);
        future["digitalRelease"] = json!((Utc::now() + ChronoDuration::days(30)).to_rfc3339());
        let client = FakeArrClient::new(ServiceKind::Radarr).with_wanted(vec![future]);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = config();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;
        assert_eq!(result.items_searched, 0);
        assert!(client.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_wanted_list_completes() {
        let client = FakeArrClient::new(ServiceKind::Radarr);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = HuntConfig {
            queue_threshold: 0,
            hunt_upgrades_enabled: true,
            ..Default::default()
        };

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Upgrade), &mut RunContext::new()).await;
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.message, "No upgrade candidates found");
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_hunt_type_is_skipped() {
        let client = FakeArrClient::new(ServiceKind::Radarr);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = HuntConfig::default();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Upgrade), &mut RunContext::new()).await;
        assert_eq!(result.status, RunStatus::Skipped);
        assert_eq!(result.api_calls_made, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sonarr_groups_seasons_and_detects_grabs() {
        let series = json!({
            "id": 10, "title": "Show", "tags": [], "qualityProfileId": 1,
            "status": "continuing", "monitored": true, "year": 2019
        });
        let mut wanted: Vec<Value> = (1..=3)
            .map(|n| {
                json!({
                    "id": 100 + n, "seriesId": 10, "seasonNumber": 1, "episodeNumber": n,
                    "title": format!("Ep {n}"), "airDateUtc": released(), "monitored": true
                })
            })
            .collect();
        wanted.push(json!({
            "id": 200, "seriesId": 10, "seasonNumber": 2, "episodeNumber": 1,
            "title": "Premiere", "airDateUtc": released(), "monitored": true
        }));
        let grab = json!({
            "seriesId": 10, "episodeId": 101, "date": (Utc::now() + ChronoDuration::seconds(1)).to_rfc3339(),
            "downloadId": "PACK", "sourceTitle": "Show.S01.1080p",
            "quality": { "quality": { "name": "WEBDL-1080p" } },
            "data": { "indexer": "Tracker", "size": "5000" }
        });
        let client = FakeArrClient::new(ServiceKind::Sonarr)
            .with_catalog(vec![series])
            .with_wanted(wanted)
            .with_history_records(vec![grab]);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("sonarr");
        let config = HuntConfig {
            queue_threshold: 0,
            missing_batch_size: 10,
            ..Default::default()
        };

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;

        assert_eq!(result.status, RunStatus::Completed);
        let commands = client.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            ArrCommand::SeasonSearch {
                series_id: 10,
                season_number: 1
            }
        );
        assert_eq!(
            commands[1],
            ArrCommand::EpisodeSearch {
                episode_ids: vec![200]
            }
        );
        assert_eq!(result.items_grabbed, 1);
        assert_eq!(result.grabbed_items[0].title, "Show.S01.1080p");
        assert_eq!(result.grabbed_items[0].size, Some(5000));
        // queue skipped, wanted, catalog, two commands, history
        assert_eq!(result.api_calls_made, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn lidarr_searches_albums_with_artist_labels() {
        let album = json!({
            "id": 7, "title": "Album", "artistId": 3, "monitored": true,
            "releaseDate": released()
        });
        let client = FakeArrClient::new(ServiceKind::Lidarr)
            .with_catalog(vec![json!({ "id": 3, "artistName": "Band", "tags": [], "monitored": true })])
            .with_wanted(vec![album])
            .with_history_records(Vec::new());
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("lidarr");
        let config = config();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;

        assert_eq!(result.searched_items, vec!["Band - Album".to_string()]);
        assert_eq!(client.commands(), vec![ArrCommand::AlbumSearch { album_ids: vec![7] }]);
    }

    #[tokio::test(start_paused = true)]
    async fn prowlarr_is_skipped() {
        let client = FakeArrClient::new(ServiceKind::Prowlarr);
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("prowlarr");
        let config = config();

        let result = run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut RunContext::new()).await;
        assert_eq!(result.status, RunStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_stages_are_emitted_in_order() {
        use crate::events::progress_channel;
        use arrbiter_domain::ProgressStage as Stage;
        use std::sync::Arc;

        let client = FakeArrClient::new(ServiceKind::Radarr)
            .with_wanted(vec![movie(1)])
            .with_history_records(Vec::new());
        let repo = InMemorySearchHistoryRepository::new();
        let id = InstanceId::from("radarr");
        let config = config();
        let (sink, mut stream) = progress_channel();
        let mut ctx = RunContext::new().with_progress(Arc::new(sink));

        run_hunt(&client, &repo, request(&id, &config, HuntType::Missing), &mut ctx).await;
        drop(ctx);

        let mut stages = Vec::new();
        while let Some(event) = stream.next().await {
            stages.push(event.payload.stage);
        }
        assert_eq!(
            stages,
            vec![
                Stage::Started,
                Stage::Fetched,
                Stage::Filtered,
                Stage::Searching,
                Stage::GrabCheck,
                Stage::Finished
            ]
        );
    }

    #[test]
    fn movie_release_date_uses_earliest() {
        let record = json!({
            "digitalRelease": "2024-05-01T00:00:00Z",
            "inCinemas": "2024-03-01T00:00:00Z"
        });
        assert_eq!(
            movie_release_date(&record).unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
    }
}
