// SPDX-License-Identifier: GPL-3.0-or-later
//! Case-insensitive keyword matching over queue status texts.

use arrbiter_domain::QueueItem;

pub const FAILED_KEYWORDS: &[&str] = &[
    "download failed",
    "failed to download",
    "unpack failed",
    "unpacking failed",
    "extraction failed",
    "crc failed",
    "repair failed",
    "not enough repair blocks",
    "missing articles",
    "password protected",
    "encrypted",
    "corrupt",
    "no space left",
];

pub const STALL_KEYWORDS: &[&str] = &[
    "stalled",
    "no connections",
    "no seeds",
    "no peers",
    "not enough peers",
    "downloading metadata",
    "unable to connect",
];

/// Import-pending states that resolve on their own.
pub const TRANSIENT_IMPORT_KEYWORDS: &[&str] = &[
    "extracting",
    "unpacking",
    "copying",
    "moving files",
    "scanning",
    "verifying",
    "repairing",
    "checking files",
    "post-processing",
];

/// Import blocks that are always safe to clean up.
pub const IMPORT_BLOCK_SAFE_KEYWORDS: &[&str] = &[
    "already exists",
    "quality not wanted",
    "not an upgrade",
    "not a custom format upgrade",
    "not a quality revision upgrade",
    "has existing file",
    "sample",
    "no files found are eligible for import",
    "already imported",
];

/// Import blocks worth a look before removal (matching/parsing trouble).
pub const IMPORT_BLOCK_REVIEW_KEYWORDS: &[&str] = &[
    "unknown series",
    "unknown movie",
    "unknown artist",
    "unknown author",
    "was matched by id",
    "not found in the grabbed release",
    "title mismatch",
    "episode was unexpected",
    "unexpected considering",
    "could not be parsed",
    "unable to parse",
    "invalid season or episode",
];

/// Import blocks caused by the host environment rather than the release.
pub const IMPORT_BLOCK_TECHNICAL_KEYWORDS: &[&str] = &[
    "permission",
    "access denied",
    "access to the path",
    "not enough free space",
    "path does not exist",
    "file is locked",
    "being used by another process",
    "i/o error",
    "no space left",
];

pub const NEVER_AUTO_IMPORT_KEYWORDS: &[&str] = &[
    "already exists",
    "already imported",
    "not an upgrade",
    "quality not wanted",
    "sample",
    "password protected",
    "encrypted",
    "corrupt",
    "unsupported extension",
    "no files found are eligible",
];

pub const SAFE_AUTO_IMPORT_KEYWORDS: &[&str] = &[
    "was matched by id",
    "found matching series via grab history",
    "found matching movie via grab history",
    "episode was unexpected",
    "unexpected considering",
    "manual import required",
    "manual interaction required",
    "title mismatch",
    "not found in the grabbed release",
    "waiting to import",
];

/// A keyword or pattern together with the status text it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch<'a> {
    pub keyword: &'a str,
    pub text: &'a str,
}

/// All status texts of a queue item: message titles, messages and the error
/// message, in that order. Blank entries are dropped.
pub fn collect_status_texts(item: &QueueItem) -> Vec<String> {
    let mut texts = Vec::new();
    for status in &item.status_messages {
        texts.extend(status.title.iter().cloned());
        texts.extend(status.messages.iter().cloned());
    }
    texts.extend(item.error_message.iter().cloned());
    texts.retain(|text| !text.trim().is_empty());
    texts
}

pub fn find_keyword<'a, K>(texts: &'a [String], keywords: &'a [K]) -> Option<KeywordMatch<'a>>
where
    K: AsRef<str>,
{
    for text in texts {
        let lowered = text.to_lowercase();
        if let Some(keyword) = keywords
            .iter()
            .map(AsRef::as_ref)
            .find(|keyword| !keyword.is_empty() && lowered.contains(&keyword.to_lowercase()))
        {
            return Some(KeywordMatch { keyword, text });
        }
    }
    None
}
