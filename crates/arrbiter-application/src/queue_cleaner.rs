// SPDX-License-Identifier: GPL-3.0-or-later
//! One queue-cleaner pass over an instance's download queue.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use arrbiter_domain::{
    CleanerRule, CleanerRunSummary, InstanceId, QueueAction, QueueCleanerConfig,
    QueueCleanerStrike, QueueItem, QueueItemDecision, RunStatus,
};
use arrbiter_infrastructure::StrikeRepository;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::arr_client::{ArrClient, RemovalOptions};
use crate::auto_import::{attempt_auto_import, check_auto_import_eligibility, AUTO_IMPORT_DELAY_MS};
use crate::context::RunContext;
use crate::keywords::collect_status_texts;
use crate::queue_rules::{evaluate_queue_item, queue_age_minutes, CleanerSettings};
use crate::wire::{parse_queue_item, Payload};

pub const QUEUE_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct CleanerRequest<'a> {
    pub instance_id: &'a InstanceId,
    pub config: &'a QueueCleanerConfig,
}

#[derive(Default)]
struct Tally {
    items_checked: u32,
    matched: u32,
    removed: u32,
    warned: u32,
    imported: u32,
    errors: u32,
    decisions: Vec<QueueItemDecision>,
}

/// Queue records sharing one download. Sonarr lists a season pack once per
/// episode, all under the same download id.
struct DownloadGroup<'a> {
    key: String,
    items: Vec<&'a QueueItem>,
}

/// Group queue records by strike key, keeping queue order.
fn group_by_download(items: &[QueueItem]) -> Vec<DownloadGroup<'_>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<DownloadGroup<'_>> = Vec::new();
    for item in items {
        let key = item.strike_key();
        match positions.get(&key) {
            Some(&at) => groups[at].items.push(item),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push(DownloadGroup {
                    key,
                    items: vec![item],
                });
            }
        }
    }
    groups
}

/// Run the queue cleaner once. Like the hunt executor it never fails; problems
/// end up in the summary's status and message.
pub async fn run_queue_cleaner(
    client: &dyn ArrClient,
    strikes: &dyn StrikeRepository,
    request: CleanerRequest<'_>,
    ctx: &mut RunContext,
) -> CleanerRunSummary {
    let instance_id = request.instance_id;
    let config = request.config;
    let service = client.service();

    if !service.supports_queue() {
        return CleanerRunSummary::empty(
            RunStatus::Skipped,
            format!("{service} has no download queue"),
            ctx.api_calls(),
        );
    }
    if !config.enabled {
        return CleanerRunSummary::empty(
            RunStatus::Skipped,
            "queue cleaner is disabled",
            ctx.api_calls(),
        );
    }

    info!(
        target: "queue_cleaner",
        %instance_id,
        %service,
        run_id = %ctx.run_id,
        dry_run = config.dry_run,
        "queue cleaner started"
    );
    let settings = CleanerSettings::from_config(config);

    ctx.record_api_call();
    let page = match client.queue(QUEUE_PAGE_SIZE).await {
        Ok(page) => page,
        Err(err) => {
            error!(target: "queue_cleaner", %instance_id, error = %err, "failed to fetch queue");
            return CleanerRunSummary::empty(
                RunStatus::Error,
                format!("Failed to fetch queue: {err}"),
                ctx.api_calls(),
            );
        }
    };

    let mut items = Vec::with_capacity(page.records.len());
    let mut unrecognized = 0usize;
    for record in page.records {
        match parse_queue_item(record) {
            Payload::Recognized(item) => items.push(item),
            Payload::Raw(_) => unrecognized += 1,
        }
    }
    if unrecognized > 0 {
        debug!(target: "queue_cleaner", %instance_id, unrecognized, "skipping queue records without id");
    }

    let stored = match strikes.list_for_instance(instance_id).await {
        Ok(stored) => stored,
        Err(err) => {
            error!(target: "queue_cleaner", %instance_id, error = %err, "failed to load strikes");
            return CleanerRunSummary::empty(
                RunStatus::Error,
                format!("Failed to load strikes: {err}"),
                ctx.api_calls(),
            );
        }
    };

    let groups = group_by_download(&items);
    let queue_keys: HashSet<&str> = groups.iter().map(|group| group.key.as_str()).collect();
    let mut strike_map: HashMap<String, QueueCleanerStrike> = HashMap::new();
    let mut to_delete: Vec<String> = Vec::new();
    for strike in stored {
        if queue_keys.contains(strike.download_id.as_str()) {
            strike_map.insert(strike.download_id.clone(), strike);
        } else {
            to_delete.push(strike.download_id);
        }
    }

    let mut tally = Tally::default();
    let mut touched: HashSet<String> = HashSet::new();
    let mut import_attempts = 0u32;

    for group in &groups {
        tally.items_checked += group.items.len() as u32;
        let now = Utc::now();

        let min_age = f64::from(config.min_queue_age_mins);
        let Some((item, found)) = group
            .items
            .iter()
            .copied()
            .filter(|item| match queue_age_minutes(item, now) {
                Some(age) if age < min_age => {
                    debug!(target: "queue_cleaner", queue_id = item.id, age, "too young to judge");
                    false
                }
                _ => true,
            })
            .find_map(|item| evaluate_queue_item(item, &settings, now).map(|found| (item, found)))
        else {
            continue;
        };
        tally.matched += 1;

        let key = group.key.clone();
        let strike = strike_map
            .entry(key.clone())
            .or_insert_with(|| QueueCleanerStrike::new(instance_id.clone(), key.clone()));
        strike.last_rule = found.rule.as_str().to_string();
        strike.last_reason = found.reason.clone();
        strike.updated_at = now;
        touched.insert(key.clone());

        let mut auto_import = None;
        if found.rule.is_import_related() {
            let texts = collect_status_texts(item);
            let verdict = check_auto_import_eligibility(&texts, &settings, Some(&*strike), now);
            debug!(
                target: "queue_cleaner",
                queue_id = item.id,
                eligible = verdict.eligible,
                reason = %verdict.reason,
                "auto-import check"
            );
            if verdict.eligible && config.dry_run {
                info!(target: "queue_cleaner", queue_id = item.id, "dry run, not importing");
            } else if verdict.eligible {
                if import_attempts > 0 {
                    tokio::time::sleep(Duration::from_millis(AUTO_IMPORT_DELAY_MS)).await;
                }
                import_attempts += 1;
                let outcome = attempt_auto_import(client, ctx, item).await;
                if outcome.attempted {
                    strike.import_attempts += 1;
                    strike.last_import_attempt = Some(now);
                }
                strike.last_import_error = outcome.error.clone();
                if outcome.success {
                    tally.imported += 1;
                    tally.decisions.push(QueueItemDecision {
                        queue_id: item.id,
                        download_id: key,
                        title: item.title.clone(),
                        rule: found.rule,
                        reason: found.reason,
                        action: QueueAction::Import,
                        strike_count: strike.strike_count,
                        auto_import: Some(outcome),
                    });
                    continue;
                }
                auto_import = Some(outcome);
            }
        }

        strike.strike_count += 1;
        let strike_count = strike.strike_count;
        let remove = found.rule == CleanerRule::Failed || strike_count >= config.max_strikes;
        let action = if remove {
            QueueAction::Remove
        } else {
            QueueAction::Warn
        };

        match action {
            QueueAction::Remove if config.dry_run => {
                info!(
                    target: "queue_cleaner",
                    queue_id = item.id,
                    records = group.items.len(),
                    rule = %found.rule,
                    reason = %found.reason,
                    "dry run, would remove"
                );
                tally.removed += 1;
            }
            QueueAction::Remove => {
                let options = RemovalOptions {
                    remove_from_client: config.remove_from_client,
                    blocklist: config.add_to_blocklist,
                };
                let mut failures = 0u32;
                for queued in &group.items {
                    ctx.record_api_call();
                    if let Err(err) = client.remove_queue_item(queued.id, options).await {
                        warn!(
                            target: "queue_cleaner",
                            queue_id = queued.id,
                            error = %err,
                            "failed to remove queue item"
                        );
                        failures += 1;
                    }
                }
                if failures == 0 {
                    info!(
                        target: "queue_cleaner",
                        download_id = %key,
                        records = group.items.len(),
                        title = %item.title,
                        rule = %found.rule,
                        reason = %found.reason,
                        "removed download"
                    );
                    tally.removed += 1;
                    strike_map.remove(&key);
                    touched.remove(&key);
                    to_delete.push(key.clone());
                } else {
                    tally.errors += failures;
                }
            }
            _ => {
                debug!(
                    target: "queue_cleaner",
                    download_id = %key,
                    rule = %found.rule,
                    strike_count,
                    max_strikes = config.max_strikes,
                    "strike recorded"
                );
                tally.warned += 1;
            }
        }

        tally.decisions.push(QueueItemDecision {
            queue_id: item.id,
            download_id: key,
            title: item.title.clone(),
            rule: found.rule,
            reason: found.reason,
            action,
            strike_count,
            auto_import,
        });
    }

    let to_save: Vec<QueueCleanerStrike> = touched
        .iter()
        .filter_map(|key| strike_map.get(key).cloned())
        .collect();
    if let Err(err) = strikes.save_all(&to_save).await {
        warn!(target: "queue_cleaner", %instance_id, error = %err, "failed to save strikes");
        tally.errors += 1;
    }
    if !to_delete.is_empty() {
        if let Err(err) = strikes.delete(instance_id, &to_delete).await {
            warn!(target: "queue_cleaner", %instance_id, error = %err, "failed to delete strikes");
            tally.errors += 1;
        }
    }

    let mut message = format!(
        "Checked {} items: {} matched, {} removed, {} warned, {} imported",
        tally.items_checked, tally.matched, tally.removed, tally.warned, tally.imported
    );
    if tally.errors > 0 {
        message.push_str(&format!(", {} errors", tally.errors));
    }
    if config.dry_run {
        message.push_str(" (dry run)");
    }

    let summary = CleanerRunSummary {
        items_checked: tally.items_checked,
        matched: tally.matched,
        removed: tally.removed,
        warned: tally.warned,
        imported: tally.imported,
        errors: tally.errors,
        decisions: tally.decisions,
        status: if tally.errors > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        },
        message,
        api_calls_made: ctx.api_calls(),
    };
    info!(
        target: "queue_cleaner",
        %instance_id,
        status = %summary.status,
        matched = summary.matched,
        removed = summary.removed,
        api_calls = summary.api_calls_made,
        "queue cleaner finished"
    );
    summary
}
