// SPDX-License-Identifier: GPL-3.0-or-later
//! Guarded field extraction for *arr JSON payloads.
//!
//! The *arr APIs drift between versions: ids arrive as numbers or strings, sizes
//! as numbers or stringified numbers, dates with or without a time part. Records
//! are therefore read field by field instead of through a fixed schema.

use arrbiter_domain::{QueueItem, StatusMessage};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// A record either understood by this crate or carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Recognized(T),
    Raw(Value),
}

impl<T> Payload<T> {
    pub fn recognized(self) -> Option<T> {
        match self {
            Self::Recognized(value) => Some(value),
            Self::Raw(_) => None,
        }
    }
}

pub fn field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .filter(|found| !found.is_null())
}

pub fn int_field(value: &Value, path: &[&str]) -> Option<i64> {
    match field(value, path)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn float_field(value: &Value, path: &[&str]) -> Option<f64> {
    match field(value, path)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Byte sizes show up as numbers in queue records and as strings in history `data`.
pub fn size_field(value: &Value, path: &[&str]) -> Option<u64> {
    float_field(value, path)
        .filter(|size| size.is_finite() && *size >= 0.0)
        .map(|size| size as u64)
}

pub fn str_field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    field(value, path)?
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

pub fn bool_field(value: &Value, path: &[&str]) -> Option<bool> {
    match field(value, path)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339 timestamps, or bare `YYYY-MM-DD` dates taken as midnight UTC.
pub fn date_field(value: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    parse_date(str_field(value, path)?)
}

pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn int_array(value: &Value, path: &[&str]) -> Vec<i64> {
    field(value, path)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Number(number) => number.as_i64(),
                    Value::String(text) => text.trim().parse().ok(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a JSON-encoded list persisted as a string column.
///
/// Missing or blank values are an empty list. Malformed values are logged and
/// also treated as empty, so a broken field never blocks a run.
pub fn decode_json_list<T: DeserializeOwned>(raw: Option<&str>, field_name: &str) -> Vec<T> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<T>>(raw) {
        Ok(values) => values,
        Err(error) => {
            warn!(
                target: "config",
                field = field_name,
                %error,
                "ignoring malformed JSON list"
            );
            Vec::new()
        }
    }
}

/// Decode a pattern list: trimmed, lower-cased, blanks dropped.
pub fn decode_pattern_list(raw: Option<&str>, field_name: &str) -> Vec<String> {
    decode_json_list::<String>(raw, field_name)
        .into_iter()
        .map(|pattern| pattern.trim().to_lowercase())
        .filter(|pattern| !pattern.is_empty())
        .collect()
}

fn status_messages(value: &Value) -> Vec<StatusMessage> {
    field(value, &["statusMessages"])
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| StatusMessage {
                    title: str_field(entry, &["title"]).map(str::to_string),
                    messages: field(entry, &["messages"])
                        .and_then(Value::as_array)
                        .map(|messages| {
                            messages
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Read a queue record. Records without an id cannot be acted on and stay raw.
pub fn parse_queue_item(value: Value) -> Payload<QueueItem> {
    let Some(id) = int_field(&value, &["id"]) else {
        return Payload::Raw(value);
    };

    let item = QueueItem {
        id,
        title: str_field(&value, &["title"]).unwrap_or_default().to_string(),
        added: date_field(&value, &["added"]),
        size: float_field(&value, &["size"]).unwrap_or(0.0),
        sizeleft: float_field(&value, &["sizeleft"]).unwrap_or(0.0),
        estimated_completion_time: date_field(&value, &["estimatedCompletionTime"]),
        tracked_download_state: str_field(&value, &["trackedDownloadState"]).map(str::to_string),
        tracked_download_status: str_field(&value, &["trackedDownloadStatus"])
            .map(str::to_string),
        status: str_field(&value, &["status"]).map(str::to_string),
        status_messages: status_messages(&value),
        error_message: str_field(&value, &["errorMessage"]).map(str::to_string),
        indexer: str_field(&value, &["indexer"]).map(str::to_string),
        protocol: str_field(&value, &["protocol"]).map(str::to_string),
        download_id: str_field(&value, &["downloadId"]).map(str::to_string),
        tags: int_array(&value, &["tags"]),
        movie_id: int_field(&value, &["movieId"]),
        series_id: int_field(&value, &["seriesId"]),
        episode_id: int_field(&value, &["episodeId"]),
        album_id: int_field(&value, &["albumId"]),
        book_id: int_field(&value, &["bookId"]),
        quality: str_field(&value, &["quality", "quality", "name"]).map(str::to_string),
    };
    Payload::Recognized(item)
}
