// SPDX-License-Identifier: GPL-3.0-or-later
//! Ordered cleanup rules for download-queue items. The first rule that fires
//! wins and the rest are not evaluated.

use arrbiter_domain::{
    CleanerRule, ImportBlockCleanupLevel, ImportBlockPatternMode, QueueCleanerConfig, QueueItem,
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::keywords::{
    collect_status_texts, find_keyword, FAILED_KEYWORDS, IMPORT_BLOCK_REVIEW_KEYWORDS,
    IMPORT_BLOCK_SAFE_KEYWORDS, IMPORT_BLOCK_TECHNICAL_KEYWORDS, STALL_KEYWORDS,
    TRANSIENT_IMPORT_KEYWORDS,
};
use crate::wire::decode_pattern_list;

/// Queue cleaner settings with every pattern list decoded once.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanerSettings {
    pub config: QueueCleanerConfig,
    pub error_patterns: Vec<String>,
    pub import_block_patterns: Vec<String>,
    pub never_patterns: Vec<String>,
    pub custom_safe_patterns: Vec<String>,
}

impl CleanerSettings {
    pub fn from_config(config: &QueueCleanerConfig) -> Self {
        Self {
            error_patterns: decode_pattern_list(config.error_patterns.as_deref(), "error_patterns"),
            import_block_patterns: decode_pattern_list(
                config.import_block_patterns.as_deref(),
                "import_block_patterns",
            ),
            never_patterns: decode_pattern_list(
                config.auto_import_never_patterns.as_deref(),
                "auto_import_never_patterns",
            ),
            custom_safe_patterns: decode_pattern_list(
                config.auto_import_custom_patterns.as_deref(),
                "auto_import_custom_patterns",
            ),
            config: config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule: CleanerRule,
    pub reason: String,
}

impl RuleMatch {
    fn new(rule: CleanerRule, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
        }
    }
}

pub fn queue_age_minutes(item: &QueueItem, now: DateTime<Utc>) -> Option<f64> {
    item.added
        .map(|added| (now - added).num_milliseconds() as f64 / 60_000.0)
}

fn eq_lower(value: Option<&str>, expected: &str) -> bool {
    value.is_some_and(|value| value.eq_ignore_ascii_case(expected))
}

fn contains_lower(value: Option<&str>, needle: &str) -> bool {
    value.is_some_and(|value| value.to_lowercase().contains(needle))
}

/// Decide whether an import-blocked or import-pending item should be cleaned up.
///
/// `include` patterns replace the built-in categories, `exclude` patterns veto
/// them. Otherwise SAFE matches always fire, REVIEW matches need `moderate`
/// and TECHNICAL matches need `aggressive`; the first category that matches
/// settles the outcome.
pub fn evaluate_import_block(
    texts: &[String],
    settings: &CleanerSettings,
    rule: CleanerRule,
) -> Option<RuleMatch> {
    let patterns = &settings.import_block_patterns;
    match settings.config.import_block_pattern_mode {
        ImportBlockPatternMode::Include if !patterns.is_empty() => {
            return find_keyword(texts, patterns).map(|found| {
                RuleMatch::new(
                    rule,
                    format!("Matched import pattern '{}': {}", found.keyword, found.text),
                )
            });
        }
        ImportBlockPatternMode::Exclude if !patterns.is_empty() => {
            if let Some(found) = find_keyword(texts, patterns) {
                debug!(
                    target: "queue_cleaner",
                    pattern = found.keyword,
                    "import block excluded by pattern"
                );
                return None;
            }
        }
        _ => {}
    }

    let level = settings.config.import_block_cleanup_level;
    if let Some(found) = find_keyword(texts, IMPORT_BLOCK_SAFE_KEYWORDS) {
        return Some(RuleMatch::new(rule, format!("Import blocked (safe): {}", found.text)));
    }
    if let Some(found) = find_keyword(texts, IMPORT_BLOCK_REVIEW_KEYWORDS) {
        return (level >= ImportBlockCleanupLevel::Moderate)
            .then(|| RuleMatch::new(rule, format!("Import blocked (review): {}", found.text)));
    }
    if let Some(found) = find_keyword(texts, IMPORT_BLOCK_TECHNICAL_KEYWORDS) {
        return (level >= ImportBlockCleanupLevel::Aggressive).then(|| {
            RuleMatch::new(rule, format!("Import blocked (technical): {}", found.text))
        });
    }

    (level >= ImportBlockCleanupLevel::Moderate).then(|| {
        let detail = texts
            .first()
            .map(String::as_str)
            .unwrap_or("no status message");
        RuleMatch::new(rule, format!("Import blocked: {detail}"))
    })
}

fn failed_rule(item: &QueueItem, texts: &[String]) -> Option<RuleMatch> {
    let state = item.tracked_download_state.as_deref();
    if eq_lower(state, "importFailed")
        || contains_lower(state, "failed")
        || eq_lower(item.tracked_download_status.as_deref(), "error")
        || eq_lower(item.status.as_deref(), "failed")
    {
        let detail = state
            .or(item.tracked_download_status.as_deref())
            .or(item.status.as_deref())
            .unwrap_or("failed");
        return Some(RuleMatch::new(CleanerRule::Failed, format!("Download failed ({detail})")));
    }
    find_keyword(texts, FAILED_KEYWORDS)
        .map(|found| RuleMatch::new(CleanerRule::Failed, format!("Download failed: {}", found.text)))
}

fn stalled_rule(
    item: &QueueItem,
    texts: &[String],
    config: &QueueCleanerConfig,
    age_mins: Option<f64>,
) -> Option<RuleMatch> {
    let warning = eq_lower(item.tracked_download_status.as_deref(), "warning")
        || eq_lower(item.status.as_deref(), "warning");
    if warning {
        if let Some(found) = find_keyword(texts, STALL_KEYWORDS) {
            return Some(RuleMatch::new(CleanerRule::Stalled, format!("Stalled: {}", found.text)));
        }
    }
    let no_progress = item.size > 0.0 && item.sizeleft >= item.size;
    match age_mins {
        Some(age) if no_progress && age > config.stalled_threshold_mins as f64 => Some(RuleMatch::new(
            CleanerRule::Stalled,
            format!("No download progress for {} minutes", age.floor()),
        )),
        _ => None,
    }
}

fn slow_rule(item: &QueueItem, config: &QueueCleanerConfig, age_mins: Option<f64>) -> Option<RuleMatch> {
    let age = age_mins?;
    if item.sizeleft <= 0.0 || age <= config.slow_grace_period_mins as f64 {
        return None;
    }
    let elapsed_secs = age * 60.0;
    let speed_kbps = (item.size - item.sizeleft).max(0.0) / 1024.0 / elapsed_secs;
    (speed_kbps < config.slow_speed_threshold).then(|| {
        RuleMatch::new(
            CleanerRule::Slow,
            format!(
                "Average speed {speed_kbps:.1} KB/s is below {} KB/s",
                config.slow_speed_threshold
            ),
        )
    })
}

fn estimated_completion_rule(
    item: &QueueItem,
    config: &QueueCleanerConfig,
    now: DateTime<Utc>,
) -> Option<RuleMatch> {
    let added = item.added?;
    let estimate = item.estimated_completion_time?;
    let expected_secs = (estimate - added).num_seconds() as f64;
    if expected_secs <= 0.0 {
        return None;
    }
    let elapsed_secs = (now - added).num_seconds() as f64;
    (elapsed_secs > expected_secs * config.estimated_completion_multiplier).then(|| {
        RuleMatch::new(
            CleanerRule::Stalled,
            format!(
                "Exceeded estimated completion: {} minutes elapsed, {} estimated",
                (elapsed_secs / 60.0).floor(),
                (expected_secs / 60.0).ceil()
            ),
        )
    })
}

fn seeding_timeout_rule(item: &QueueItem, config: &QueueCleanerConfig, age_mins: Option<f64>) -> Option<RuleMatch> {
    if !item.is_torrent() {
        return None;
    }
    let seeding = item.sizeleft <= 0.0
        || contains_lower(item.status.as_deref(), "seed")
        || eq_lower(item.tracked_download_state.as_deref(), "importing");
    let age_hours = age_mins? / 60.0;
    (seeding && age_hours > config.seeding_timeout_hours as f64).then(|| {
        RuleMatch::new(
            CleanerRule::SeedingTimeout,
            format!(
                "Seeding for {} hours (limit {})",
                age_hours.floor(),
                config.seeding_timeout_hours
            ),
        )
    })
}

/// Classify one queue item, or `None` when no rule applies.
pub fn evaluate_queue_item(
    item: &QueueItem,
    settings: &CleanerSettings,
    now: DateTime<Utc>,
) -> Option<RuleMatch> {
    let config = &settings.config;
    let texts = collect_status_texts(item);
    let age_mins = queue_age_minutes(item, now);
    let state = item.tracked_download_state.as_deref();

    if config.failed_enabled {
        if let Some(found) = failed_rule(item, &texts) {
            return Some(found);
        }
    }
    if config.stalled_enabled {
        if let Some(found) = stalled_rule(item, &texts, config, age_mins) {
            return Some(found);
        }
    }
    if config.slow_enabled {
        if let Some(found) = slow_rule(item, config, age_mins) {
            return Some(found);
        }
    }
    if config.error_patterns_enabled {
        if let Some(found) = find_keyword(&texts, &settings.error_patterns) {
            return Some(RuleMatch::new(
                CleanerRule::ErrorPattern,
                format!("Matched error pattern '{}': {}", found.keyword, found.text),
            ));
        }
    }
    if config.import_block_enabled && eq_lower(state, "importBlocked") {
        if let Some(found) = evaluate_import_block(&texts, settings, CleanerRule::ImportBlocked) {
            return Some(found);
        }
    }
    if config.estimated_completion_enabled {
        if let Some(found) = estimated_completion_rule(item, config, now) {
            return Some(found);
        }
    }
    if config.import_pending_enabled && eq_lower(state, "importPending") {
        if let Some(found) = find_keyword(&texts, TRANSIENT_IMPORT_KEYWORDS) {
            debug!(
                target: "queue_cleaner",
                queue_id = item.id,
                keyword = found.keyword,
                "import pending is transient, leaving it alone"
            );
            return None;
        }
        if let Some(found) = evaluate_import_block(&texts, settings, CleanerRule::ImportPending) {
            return Some(found);
        }
        if let Some(age) = age_mins.filter(|age| *age > config.import_pending_threshold_mins as f64) {
            return Some(RuleMatch::new(
                CleanerRule::ImportPending,
                format!("Import pending for {} minutes", age.floor()),
            ));
        }
    }
    if config.seeding_timeout_enabled {
        if let Some(found) = seeding_timeout_rule(item, config, age_mins) {
            return Some(found);
        }
    }
    None
}
