// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};
use arrbiter_domain::{HuntConfig, HuntType, InstanceId, QueueCleanerConfig, ServiceKind};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://arrbiter.db".to_string(),
            pool_max_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout for calls to *arr services.
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7979,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    /// Hours between pruning of expired search history rows.
    pub history_prune_interval_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            history_prune_interval_hours: 24,
        }
    }
}

/// One managed *arr instance together with its automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: InstanceId,
    pub name: String,
    pub service: ServiceKind,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub hunt: Option<HuntConfig>,
    #[serde(default)]
    pub queue_cleaner: Option<QueueCleanerConfig>,
}

impl InstanceConfig {
    pub fn hunt_enabled(&self, hunt_type: HuntType) -> bool {
        self.service.supports_hunting()
            && self
                .hunt
                .as_ref()
                .map(|hunt| hunt.is_enabled(hunt_type))
                .unwrap_or(false)
    }

    pub fn queue_cleaner_enabled(&self) -> bool {
        self.service.supports_queue()
            && self
                .queue_cleaner
                .as_ref()
                .map(|cleaner| cleaner.enabled)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl AppConfig {
    /// Reject configurations the scheduler could not run sensibly.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_jobs == 0 {
            bail!("scheduler.max_concurrent_jobs must be at least 1");
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.id.clone()) {
                bail!("duplicate instance id '{}'", instance.id);
            }
            if instance.base_url.trim().is_empty() {
                bail!("instance '{}' has an empty base_url", instance.id);
            }
            if instance.api_key.trim().is_empty() {
                bail!("instance '{}' has an empty api_key", instance.id);
            }
            if let Some(hunt) = &instance.hunt {
                for hunt_type in [HuntType::Missing, HuntType::Upgrade] {
                    if !hunt.is_enabled(hunt_type) {
                        continue;
                    }
                    if hunt.interval_mins(hunt_type) == 0 {
                        bail!(
                            "instance '{}' has a zero {} hunt interval",
                            instance.id,
                            hunt_type
                        );
                    }
                    if hunt.batch_size(hunt_type) == 0 {
                        bail!(
                            "instance '{}' has a zero {} batch size",
                            instance.id,
                            hunt_type
                        );
                    }
                }
            }
            if let Some(cleaner) = &instance.queue_cleaner {
                if cleaner.enabled && cleaner.interval_mins == 0 {
                    bail!("instance '{}' has a zero queue cleaner interval", instance.id);
                }
            }
        }
        Ok(())
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&InstanceConfig> {
        self.instances.iter().find(|instance| &instance.id == id)
    }
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: ARRBITER_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("ARRBITER_").split("__"));

    let config: AppConfig = figment.extract()?;
    config.validate()?;
    info!(
        target: "config",
        instances = config.instances.len(),
        "configuration loaded"
    );
    Ok(config)
}
