// SPDX-License-Identifier: GPL-3.0-or-later
use std::future::Future;

use serde_json::Value;
use tracing::{debug, warn};

use crate::arr_client::{ArrClientError, Page};
use crate::context::RunContext;

pub const MIN_FETCH_SIZE: u32 = 100;
pub const MAX_FETCH_SIZE: u32 = 1000;

/// Records fetched per wanted page: ten times the batch, within bounds.
pub fn fetch_size_for_batch(batch_size: u32) -> u32 {
    batch_size
        .saturating_mul(10)
        .clamp(MIN_FETCH_SIZE, MAX_FETCH_SIZE)
}

/// Page to start from so successive runs walk through the library instead of
/// re-reading the first page.
pub fn rotating_page(recent_search_count: usize, fetch_size: u32) -> u32 {
    let fetch_size = fetch_size.max(1) as usize;
    u32::try_from(recent_search_count / fetch_size)
        .unwrap_or(u32::MAX - 1)
        .saturating_add(1)
}

/// Fetch one rotating page of a wanted listing, wrapping to page 1 when the
/// computed page is past the end.
pub async fn fetch_rotating_page<F, Fut>(
    ctx: &mut RunContext,
    recent_search_count: usize,
    fetch_size: u32,
    mut fetch: F,
) -> Result<Vec<Value>, ArrClientError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page, ArrClientError>>,
{
    let page = rotating_page(recent_search_count, fetch_size);
    ctx.record_api_call();
    let first = fetch(page).await?;
    debug!(
        target: "hunt",
        page,
        fetch_size,
        fetched = first.records.len(),
        total = first.total_records,
        "fetched wanted page"
    );

    if !first.records.is_empty() || page == 1 {
        return Ok(first.records);
    }

    warn!(
        target: "hunt",
        page,
        recent_search_count,
        "rotating page is past the end of the listing, wrapping to page 1"
    );
    ctx.record_api_call();
    Ok(fetch(1).await?.records)
}
