// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Value Objects & IDs
// ============================================================================

/// Identifier of a configured *arr instance (a stable slug from configuration).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Sonarr,
    Radarr,
    Lidarr,
    Readarr,
    Prowlarr,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sonarr => "sonarr",
            Self::Radarr => "radarr",
            Self::Lidarr => "lidarr",
            Self::Readarr => "readarr",
            Self::Prowlarr => "prowlarr",
        }
    }

    /// Versioned API prefix the service exposes.
    pub fn api_prefix(&self) -> &'static str {
        match self {
            Self::Sonarr | Self::Radarr => "/api/v3",
            Self::Lidarr | Self::Readarr | Self::Prowlarr => "/api/v1",
        }
    }

    /// Services that expose wanted/missing + wanted/cutoff listings.
    pub fn supports_hunting(&self) -> bool {
        !matches!(self, Self::Prowlarr)
    }

    /// Services that own a download queue.
    pub fn supports_queue(&self) -> bool {
        !matches!(self, Self::Prowlarr)
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HuntType {
    Missing,
    Upgrade,
}

impl HuntType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Upgrade => "upgrade",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "missing" => Some(Self::Missing),
            "upgrade" => Some(Self::Upgrade),
            _ => None,
        }
    }
}

impl std::fmt::Display for HuntType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterLogic {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Episode,
    Season,
    Movie,
    Album,
    Book,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Season => "season",
            Self::Movie => "movie",
            Self::Album => "album",
            Self::Book => "book",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "episode" => Some(Self::Episode),
            "season" => Some(Self::Season),
            "movie" => Some(Self::Movie),
            "album" => Some(Self::Album),
            "book" => Some(Self::Book),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Partial,
    Skipped,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Partial => write!(f, "partial"),
            Self::Skipped => write!(f, "skipped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// How aggressively import-blocked downloads are cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportBlockCleanupLevel {
    #[default]
    Safe,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportBlockPatternMode {
    #[default]
    Defaults,
    Include,
    Exclude,
}

/// Queue-cleaner rules, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanerRule {
    Failed,
    Stalled,
    Slow,
    ErrorPattern,
    ImportBlocked,
    ImportPending,
    SeedingTimeout,
}

impl CleanerRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Stalled => "stalled",
            Self::Slow => "slow",
            Self::ErrorPattern => "error_pattern",
            Self::ImportBlocked => "import_blocked",
            Self::ImportPending => "import_pending",
            Self::SeedingTimeout => "seeding_timeout",
        }
    }

    /// Import-related rules are the ones an automatic manual import can resolve.
    pub fn is_import_related(&self) -> bool {
        matches!(self, Self::ImportBlocked | Self::ImportPending)
    }
}

impl std::fmt::Display for CleanerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Remove,
    Warn,
    Import,
}

impl std::fmt::Display for QueueAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remove => write!(f, "remove"),
            Self::Warn => write!(f, "warn"),
            Self::Import => write!(f, "import"),
        }
    }
}

// ============================================================================
// Hunt configuration & history
// ============================================================================

/// Per-instance hunt automation settings.
///
/// Filter arrays keep their persisted form: JSON-encoded strings such as `"[1, 4]"`.
/// They are decoded exactly once per run into the application's `ParsedFilters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuntConfig {
    pub hunt_missing_enabled: bool,
    pub hunt_upgrades_enabled: bool,
    pub missing_interval_mins: u64,
    pub upgrade_interval_mins: u64,
    pub missing_batch_size: u32,
    pub upgrade_batch_size: u32,
    /// Skip the run when the download queue already holds this many items (0 disables).
    pub queue_threshold: u32,
    pub research_after_days: u32,
    pub filter_logic: FilterLogic,
    pub monitored_only: bool,
    pub include_tags: Option<String>,
    pub exclude_tags: Option<String>,
    pub include_quality_profiles: Option<String>,
    pub exclude_quality_profiles: Option<String>,
    pub include_statuses: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub age_threshold_days: Option<u32>,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            hunt_missing_enabled: true,
            hunt_upgrades_enabled: false,
            missing_interval_mins: 60,
            upgrade_interval_mins: 24 * 60,
            missing_batch_size: 5,
            upgrade_batch_size: 5,
            queue_threshold: 25,
            research_after_days: 7,
            filter_logic: FilterLogic::And,
            monitored_only: true,
            include_tags: None,
            exclude_tags: None,
            include_quality_profiles: None,
            exclude_quality_profiles: None,
            include_statuses: None,
            year_min: None,
            year_max: None,
            age_threshold_days: None,
        }
    }
}

impl HuntConfig {
    pub fn batch_size(&self, hunt_type: HuntType) -> u32 {
        match hunt_type {
            HuntType::Missing => self.missing_batch_size,
            HuntType::Upgrade => self.upgrade_batch_size,
        }
    }

    pub fn is_enabled(&self, hunt_type: HuntType) -> bool {
        match hunt_type {
            HuntType::Missing => self.hunt_missing_enabled,
            HuntType::Upgrade => self.hunt_upgrades_enabled,
        }
    }

    pub fn interval_mins(&self, hunt_type: HuntType) -> u64 {
        match hunt_type {
            HuntType::Missing => self.missing_interval_mins,
            HuntType::Upgrade => self.upgrade_interval_mins,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchedItem {
    pub media_type: MediaType,
    pub media_id: i64,
    pub season_number: Option<i32>,
    pub title: String,
    pub searched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabbedItem {
    pub title: String,
    pub quality: Option<String>,
    pub indexer: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuntResult {
    pub items_searched: u32,
    pub items_grabbed: u32,
    pub searched_items: Vec<String>,
    pub grabbed_items: Vec<GrabbedItem>,
    pub message: String,
    pub status: RunStatus,
    pub api_calls_made: u32,
}

impl HuntResult {
    pub fn empty(status: RunStatus, message: impl Into<String>, api_calls_made: u32) -> Self {
        Self {
            items_searched: 0,
            items_grabbed: 0,
            searched_items: Vec::new(),
            grabbed_items: Vec::new(),
            message: message.into(),
            status,
            api_calls_made,
        }
    }
}

// ============================================================================
// Download queue & cleaner
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusMessage {
    pub title: Option<String>,
    pub messages: Vec<String>,
}

/// Snapshot of one live download-queue record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub title: String,
    pub added: Option<DateTime<Utc>>,
    pub size: f64,
    pub sizeleft: f64,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub tracked_download_state: Option<String>,
    pub tracked_download_status: Option<String>,
    pub status: Option<String>,
    pub status_messages: Vec<StatusMessage>,
    pub error_message: Option<String>,
    pub indexer: Option<String>,
    pub protocol: Option<String>,
    pub download_id: Option<String>,
    pub tags: Vec<i64>,
    pub movie_id: Option<i64>,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub album_id: Option<i64>,
    pub book_id: Option<i64>,
    pub quality: Option<String>,
}

impl QueueItem {
    /// Key used for strike bookkeeping; falls back to the queue id when the
    /// download client did not report a download id.
    pub fn strike_key(&self) -> String {
        match self.download_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => format!("queue-{}", self.id),
        }
    }

    pub fn is_torrent(&self) -> bool {
        self.protocol
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case("torrent"))
            .unwrap_or(false)
    }
}

/// Per-instance queue cleaner settings. Pattern lists are JSON-encoded string arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCleanerConfig {
    pub enabled: bool,
    pub interval_mins: u64,
    pub dry_run: bool,
    pub max_strikes: u32,
    pub remove_from_client: bool,
    pub add_to_blocklist: bool,
    pub min_queue_age_mins: u32,
    pub failed_enabled: bool,
    pub stalled_enabled: bool,
    pub stalled_threshold_mins: u32,
    pub slow_enabled: bool,
    pub slow_grace_period_mins: u32,
    /// KB/s
    pub slow_speed_threshold: f64,
    pub error_patterns_enabled: bool,
    pub error_patterns: Option<String>,
    pub estimated_completion_enabled: bool,
    pub estimated_completion_multiplier: f64,
    pub import_block_enabled: bool,
    pub import_pending_enabled: bool,
    pub import_pending_threshold_mins: u32,
    pub import_block_cleanup_level: ImportBlockCleanupLevel,
    pub import_block_pattern_mode: ImportBlockPatternMode,
    pub import_block_patterns: Option<String>,
    pub seeding_timeout_enabled: bool,
    pub seeding_timeout_hours: u32,
    pub auto_import_enabled: bool,
    pub auto_import_max_attempts: u32,
    pub auto_import_cooldown_mins: u32,
    pub auto_import_safe_only: bool,
    pub auto_import_never_patterns: Option<String>,
    pub auto_import_custom_patterns: Option<String>,
}

impl Default for QueueCleanerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_mins: 30,
            dry_run: false,
            max_strikes: 3,
            remove_from_client: true,
            add_to_blocklist: false,
            min_queue_age_mins: 10,
            failed_enabled: true,
            stalled_enabled: true,
            stalled_threshold_mins: 60,
            slow_enabled: false,
            slow_grace_period_mins: 30,
            slow_speed_threshold: 100.0,
            error_patterns_enabled: false,
            error_patterns: None,
            estimated_completion_enabled: false,
            estimated_completion_multiplier: 2.0,
            import_block_enabled: true,
            import_pending_enabled: true,
            import_pending_threshold_mins: 60,
            import_block_cleanup_level: ImportBlockCleanupLevel::Safe,
            import_block_pattern_mode: ImportBlockPatternMode::Defaults,
            import_block_patterns: None,
            seeding_timeout_enabled: false,
            seeding_timeout_hours: 72,
            auto_import_enabled: false,
            auto_import_max_attempts: 2,
            auto_import_cooldown_mins: 30,
            auto_import_safe_only: true,
            auto_import_never_patterns: None,
            auto_import_custom_patterns: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCleanerStrike {
    pub instance_id: InstanceId,
    pub download_id: String,
    pub strike_count: u32,
    pub last_rule: String,
    pub last_reason: String,
    pub import_attempts: u32,
    pub last_import_attempt: Option<DateTime<Utc>>,
    pub last_import_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueCleanerStrike {
    pub fn new(instance_id: InstanceId, download_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            download_id: download_id.into(),
            strike_count: 0,
            last_rule: String::new(),
            last_reason: String::new(),
            import_attempts: 0,
            last_import_attempt: None,
            last_import_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoImportOutcome {
    pub attempted: bool,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemDecision {
    pub queue_id: i64,
    pub download_id: String,
    pub title: String,
    pub rule: CleanerRule,
    pub reason: String,
    pub action: QueueAction,
    pub strike_count: u32,
    pub auto_import: Option<AutoImportOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerRunSummary {
    pub items_checked: u32,
    pub matched: u32,
    pub removed: u32,
    pub warned: u32,
    pub imported: u32,
    pub errors: u32,
    pub decisions: Vec<QueueItemDecision>,
    pub status: RunStatus,
    pub message: String,
    pub api_calls_made: u32,
}

impl CleanerRunSummary {
    pub fn empty(status: RunStatus, message: impl Into<String>, api_calls_made: u32) -> Self {
        Self {
            items_checked: 0,
            matched: 0,
            removed: 0,
            warned: 0,
            imported: 0,
            errors: 0,
            decisions: Vec::new(),
            status,
            message: message.into(),
            api_calls_made,
        }
    }
}

// ============================================================================
// Domain Events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent<TPayload> {
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: TPayload,
}

impl<TPayload> DomainEvent<TPayload> {
    pub fn new(name: &'static str, payload: TPayload) -> Self {
        Self {
            name,
            occurred_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Started,
    Fetched,
    Filtered,
    Searching,
    GrabCheck,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuntProgressPayload {
    pub run_id: RunId,
    pub stage: ProgressStage,
    pub message: String,
    pub api_calls: u32,
}

pub type HuntProgress = DomainEvent<HuntProgressPayload>;
