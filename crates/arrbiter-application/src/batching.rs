// SPDX-License-Identifier: GPL-3.0-or-later
//! Search batching: shuffling, Sonarr season grouping and the shared budget.

use arrbiter_domain::MediaType;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::search_history::{HistoryKey, SearchHistoryManager};

/// Missing episodes of one season at or above this count become a season search.
pub const SEASON_SEARCH_THRESHOLD: usize = 3;

/// Uniform random permutation so later items are not starved run after run.
pub fn shuffle<T>(items: &mut [T]) {
    shuffle_with(items, &mut rand::thread_rng());
}

pub fn shuffle_with<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    items.shuffle(rng);
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeCandidate {
    pub episode_id: i64,
    pub series_id: i64,
    pub season_number: i32,
    pub episode_number: Option<i32>,
    pub series_title: String,
    pub title: String,
}

impl EpisodeCandidate {
    pub fn label(&self) -> String {
        match self.episode_number {
            Some(episode) => format!(
                "{} - S{:02}E{:02} - {}",
                self.series_title, self.season_number, episode, self.title
            ),
            None => format!(
                "{} - Season {} - {}",
                self.series_title, self.season_number, self.title
            ),
        }
    }

    pub fn history_key(&self) -> HistoryKey {
        (MediaType::Episode, self.episode_id, None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonSearch {
    pub series_id: i64,
    pub season_number: i32,
    pub series_title: String,
    pub episode_ids: Vec<i64>,
}

impl SeasonSearch {
    pub fn episode_count(&self) -> usize {
        self.episode_ids.len()
    }

    pub fn label(&self) -> String {
        format!("{} - Season {}", self.series_title, self.season_number)
    }

    pub fn history_key(&self) -> HistoryKey {
        (MediaType::Season, self.series_id, Some(self.season_number))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SonarrSearchPlan {
    pub seasons: Vec<SeasonSearch>,
    pub episodes: Vec<EpisodeCandidate>,
    /// Season and episode candidates before the batch budget was applied.
    pub candidates: usize,
    pub history_filtered: usize,
}

impl SonarrSearchPlan {
    pub fn is_empty(&self) -> bool {
        self.seasons.is_empty() && self.episodes.is_empty()
    }
}

/// Group episodes by `(series, season)`, keeping the order in which each group
/// first appears.
pub fn group_by_season(episodes: Vec<EpisodeCandidate>) -> Vec<Vec<EpisodeCandidate>> {
    let mut groups: Vec<Vec<EpisodeCandidate>> = Vec::new();
    for episode in episodes {
        match groups.iter_mut().find(|group| {
            group[0].series_id == episode.series_id
                && group[0].season_number == episode.season_number
        }) {
            Some(group) => group.push(episode),
            None => groups.push(vec![episode]),
        }
    }
    groups
}

/// Build the Sonarr search plan from already shuffled, filtered episodes.
///
/// Season searches are taken first and consume one budget unit per episode. A
/// season that does not fit the remaining budget is deferred, except when it is
/// larger than the whole batch and nothing was taken yet. Episodes fill what is
/// left one unit each.
pub fn plan_sonarr_searches(
    episodes: Vec<EpisodeCandidate>,
    history: &SearchHistoryManager,
    batch_size: u32,
) -> SonarrSearchPlan {
    let mut season_candidates = Vec::new();
    let mut episode_candidates = Vec::new();
    let mut history_filtered = 0;

    for group in group_by_season(episodes) {
        if group.len() >= SEASON_SEARCH_THRESHOLD {
            let first = &group[0];
            let season = SeasonSearch {
                series_id: first.series_id,
                season_number: first.season_number,
                series_title: first.series_title.clone(),
                episode_ids: group.iter().map(|episode| episode.episode_id).collect(),
            };
            let (media_type, id, number) = season.history_key();
            if history.was_recently_searched(media_type, id, number) {
                history_filtered += 1;
            } else {
                season_candidates.push(season);
            }
        } else {
            let (kept, filtered) = history.filter_unsearched(group, EpisodeCandidate::history_key);
            history_filtered += filtered;
            episode_candidates.extend(kept);
        }
    }

    let candidates = season_candidates.len() + episode_candidates.len();
    let batch = batch_size as usize;
    let mut remaining = batch;
    let mut seasons = Vec::new();

    for season in season_candidates {
        if remaining == 0 {
            break;
        }
        let cost = season.episode_count();
        if cost <= remaining {
            remaining -= cost;
            seasons.push(season);
        } else if remaining == batch && cost > batch {
            remaining = 0;
            seasons.push(season);
        }
    }

    let episodes = episode_candidates.into_iter().take(remaining).collect();

    SonarrSearchPlan {
        seasons,
        episodes,
        candidates,
        history_filtered,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatSearchPlan<T> {
    pub selected: Vec<T>,
    pub candidates: usize,
    pub history_filtered: usize,
}

/// History-filter and slice to the batch size; for services without grouping.
pub fn plan_flat_searches<T, F>(
    items: Vec<T>,
    history: &SearchHistoryManager,
    batch_size: u32,
    key: F,
) -> FlatSearchPlan<T>
where
    F: Fn(&T) -> HistoryKey,
{
    let (kept, history_filtered) = history.filter_unsearched(items, key);
    let candidates = kept.len();
    FlatSearchPlan {
        selected: kept.into_iter().take(batch_size as usize).collect(),
        candidates,
        history_filtered,
    }
}
