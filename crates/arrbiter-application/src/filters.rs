// SPDX-License-Identifier: GPL-3.0-or-later
//! Composable include/exclude predicates for hunt candidates.
//!
//! Excludes always run first and always reject. Includes combine with the
//! configured [`FilterLogic`]; under `OR`, a config with no active include
//! condition lets every non-excluded item through.

use std::collections::HashSet;

use arrbiter_domain::{FilterLogic, HuntConfig, ServiceKind};
use chrono::{DateTime, Duration, Utc};

use crate::wire::decode_json_list;

/// Requesting a status selects itself plus every status "after" it.
pub const SONARR_STATUS_HIERARCHY: &[(&str, &[&str])] = &[
    ("upcoming", &["upcoming", "continuing", "ended"]),
    ("continuing", &["continuing", "ended"]),
    ("ended", &["ended"]),
    ("deleted", &["deleted"]),
];

pub const RADARR_STATUS_HIERARCHY: &[(&str, &[&str])] = &[
    ("tba", &["tba", "announced", "inCinemas", "released"]),
    ("announced", &["announced", "inCinemas", "released"]),
    ("inCinemas", &["inCinemas", "released"]),
    ("released", &["released"]),
    ("deleted", &["deleted"]),
];

fn status_hierarchy(service: ServiceKind) -> &'static [(&'static str, &'static [&'static str])] {
    match service {
        ServiceKind::Sonarr => SONARR_STATUS_HIERARCHY,
        ServiceKind::Radarr => RADARR_STATUS_HIERARCHY,
        _ => &[],
    }
}

/// Expand requested statuses through the service's hierarchy. The result is
/// lower-cased; unknown statuses pass through as themselves.
pub fn expand_statuses(service: ServiceKind, statuses: &[String]) -> HashSet<String> {
    let hierarchy = status_hierarchy(service);
    let mut expanded = HashSet::new();
    for status in statuses {
        let requested = status.trim();
        if requested.is_empty() {
            continue;
        }
        match hierarchy
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(requested))
        {
            Some((_, members)) => {
                expanded.extend(members.iter().map(|member| member.to_lowercase()));
            }
            None => {
                expanded.insert(requested.to_lowercase());
            }
        }
    }
    expanded
}

/// The facts a filter needs about one wanted item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateItem {
    pub tags: Vec<i64>,
    pub quality_profile_id: Option<i64>,
    pub status: Option<String>,
    pub year: Option<i32>,
    pub monitored: bool,
    pub release_date: Option<DateTime<Utc>>,
}

/// Hunt filters decoded once from their persisted JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilters {
    pub logic: FilterLogic,
    pub monitored_only: bool,
    pub include_tags: Vec<i64>,
    pub exclude_tags: Vec<i64>,
    pub include_quality_profiles: Vec<i64>,
    pub exclude_quality_profiles: Vec<i64>,
    pub include_statuses: HashSet<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub age_threshold_days: Option<u32>,
}

impl ParsedFilters {
    pub fn from_config(config: &HuntConfig, service: ServiceKind) -> Self {
        let statuses: Vec<String> =
            decode_json_list(config.include_statuses.as_deref(), "include_statuses");
        Self {
            logic: config.filter_logic,
            monitored_only: config.monitored_only,
            include_tags: decode_json_list(config.include_tags.as_deref(), "include_tags"),
            exclude_tags: decode_json_list(config.exclude_tags.as_deref(), "exclude_tags"),
            include_quality_profiles: decode_json_list(
                config.include_quality_profiles.as_deref(),
                "include_quality_profiles",
            ),
            exclude_quality_profiles: decode_json_list(
                config.exclude_quality_profiles.as_deref(),
                "exclude_quality_profiles",
            ),
            include_statuses: expand_statuses(service, &statuses),
            year_min: config.year_min,
            year_max: config.year_max,
            age_threshold_days: config.age_threshold_days,
        }
    }

    fn is_excluded(&self, item: &CandidateItem) -> bool {
        let tag_excluded = item.tags.iter().any(|tag| self.exclude_tags.contains(tag));
        let profile_excluded = item
            .quality_profile_id
            .is_some_and(|profile| self.exclude_quality_profiles.contains(&profile));
        tag_excluded || profile_excluded
    }

    /// Outcome of every configured include condition; unconfigured ones are absent.
    fn include_conditions(&self, item: &CandidateItem, now: DateTime<Utc>) -> Vec<bool> {
        let mut conditions = Vec::new();
        if self.monitored_only {
            conditions.push(item.monitored);
        }
        if !self.include_tags.is_empty() {
            conditions.push(item.tags.iter().any(|tag| self.include_tags.contains(tag)));
        }
        if !self.include_quality_profiles.is_empty() {
            conditions.push(
                item.quality_profile_id
                    .is_some_and(|profile| self.include_quality_profiles.contains(&profile)),
            );
        }
        if !self.include_statuses.is_empty() {
            conditions.push(
                item.status
                    .as_deref()
                    .is_some_and(|status| self.include_statuses.contains(&status.to_lowercase())),
            );
        }
        if let Some(min) = self.year_min {
            conditions.push(item.year.is_some_and(|year| year >= min));
        }
        if let Some(max) = self.year_max {
            conditions.push(item.year.is_some_and(|year| year <= max));
        }
        if let Some(days) = self.age_threshold_days {
            let cutoff = now - Duration::days(i64::from(days));
            conditions.push(item.release_date.map_or(true, |released| released <= cutoff));
        }
        conditions
    }

    pub fn matches(&self, item: &CandidateItem, now: DateTime<Utc>) -> bool {
        if self.is_excluded(item) {
            return false;
        }
        let conditions = self.include_conditions(item, now);
        match self.logic {
            FilterLogic::And => conditions.iter().all(|passed| *passed),
            FilterLogic::Or => conditions.is_empty() || conditions.iter().any(|passed| *passed),
        }
    }
}

/// Items without a release date, or dated in the future, are not searchable yet.
pub fn is_content_released(release_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    release_date.is_some_and(|released| released <= now)
}
