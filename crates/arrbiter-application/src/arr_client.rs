// SPDX-License-Identifier: GPL-3.0-or-later
use arrbiter_domain::ServiceKind;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::wire::int_field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort_key: String,
    pub sort_direction: SortDirection,
    pub monitored_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page_size: u32,
    pub sort_key: String,
    pub sort_direction: SortDirection,
    pub grabbed_only: bool,
}

impl HistoryQuery {
    pub fn recent_grabs(page_size: u32) -> Self {
        Self {
            page_size,
            sort_key: "date".to_string(),
            sort_direction: SortDirection::Descending,
            grabbed_only: true,
        }
    }
}

/// One page of a paged *arr listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub total_records: u64,
}

impl Page {
    /// Accepts both the paged envelope and a bare array (older API versions).
    pub fn from_value(value: Value) -> Result<Self, ArrClientError> {
        match value {
            Value::Array(records) => Ok(Self {
                total_records: records.len() as u64,
                records,
            }),
            Value::Object(_) => {
                let records = match value.get("records") {
                    Some(Value::Array(records)) => records.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => {
                        return Err(ArrClientError::Deserialization(
                            "records is not an array".to_string(),
                        ))
                    }
                };
                let total_records = int_field(&value, &["totalRecords"])
                    .and_then(|total| u64::try_from(total).ok())
                    .unwrap_or(records.len() as u64);
                Ok(Self {
                    records,
                    total_records,
                })
            }
            other => Err(ArrClientError::Deserialization(format!(
                "expected a page object or array, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrCommand {
    SeasonSearch { series_id: i64, season_number: i32 },
    EpisodeSearch { episode_ids: Vec<i64> },
    MoviesSearch { movie_ids: Vec<i64> },
    AlbumSearch { album_ids: Vec<i64> },
    BookSearch { book_ids: Vec<i64> },
    ManualImport { files: Vec<Value>, import_mode: String },
}

impl ArrCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SeasonSearch { .. } => "SeasonSearch",
            Self::EpisodeSearch { .. } => "EpisodeSearch",
            Self::MoviesSearch { .. } => "MoviesSearch",
            Self::AlbumSearch { .. } => "AlbumSearch",
            Self::BookSearch { .. } => "BookSearch",
            Self::ManualImport { .. } => "ManualImport",
        }
    }

    pub fn to_body(&self) -> Value {
        let name = self.name();
        match self {
            Self::SeasonSearch {
                series_id,
                season_number,
            } => json!({ "name": name, "seriesId": series_id, "seasonNumber": season_number }),
            Self::EpisodeSearch { episode_ids } => json!({ "name": name, "episodeIds": episode_ids }),
            Self::MoviesSearch { movie_ids } => json!({ "name": name, "movieIds": movie_ids }),
            Self::AlbumSearch { album_ids } => json!({ "name": name, "albumIds": album_ids }),
            Self::BookSearch { book_ids } => json!({ "name": name, "bookIds": book_ids }),
            Self::ManualImport { files, import_mode } => {
                json!({ "name": name, "files": files, "importMode": import_mode })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemovalOptions {
    pub remove_from_client: bool,
    pub blocklist: bool,
}

#[derive(Debug, Error)]
pub enum ArrClientError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
    #[error("{service} responded with status {status}: {body}")]
    HttpStatus {
        service: ServiceKind,
        status: u16,
        body: String,
    },
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("{operation} is not supported by {service}")]
    Unsupported {
        service: ServiceKind,
        operation: &'static str,
    },
}

/// The operations the hunt executor and queue cleaner need from an *arr instance.
#[async_trait]
pub trait ArrClient: Send + Sync {
    fn service(&self) -> ServiceKind;
    async fn wanted_missing(&self, query: &WantedQuery) -> Result<Page, ArrClientError>;
    async fn wanted_cutoff(&self, query: &WantedQuery) -> Result<Page, ArrClientError>;
    /// Full series (Sonarr) or artist/author listing used to enrich wanted records.
    async fn catalog(&self) -> Result<Vec<Value>, ArrClientError>;
    async fn queue(&self, page_size: u32) -> Result<Page, ArrClientError>;
    async fn history(&self, query: &HistoryQuery) -> Result<Page, ArrClientError>;
    async fn execute_command(&self, command: &ArrCommand) -> Result<Value, ArrClientError>;
    async fn remove_queue_item(
        &self,
        queue_id: i64,
        options: RemovalOptions,
    ) -> Result<(), ArrClientError>;
    async fn manual_import_candidates(&self, download_id: &str)
        -> Result<Vec<Value>, ArrClientError>;
}

pub struct ArrHttpClient {
    client: Client,
    service: ServiceKind,
    base_url: String,
    api_key: String,
}

impl ArrHttpClient {
    pub fn new(service: ServiceKind, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), service, base_url, api_key)
    }

    pub fn with_client(
        client: Client,
        service: ServiceKind,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            service,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ArrClientError> {
        Url::parse(&format!(
            "{}{}{}",
            self.base_url,
            self.service.api_prefix(),
            path
        ))
        .map_err(|err| ArrClientError::InvalidBaseUrl(err.to_string()))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ArrClientError> {
        let url = self.endpoint(path)?;
        Ok(self
            .client
            .request(method, url)
            .header("X-Api-Key", &self.api_key))
    }

    fn unsupported(&self, operation: &'static str) -> ArrClientError {
        ArrClientError::Unsupported {
            service: self.service,
            operation,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<String, ArrClientError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ArrClientError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ArrClientError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(ArrClientError::HttpStatus {
                service: self.service,
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, ArrClientError> {
        let body = self.send(builder).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ArrClientError::Deserialization(e.to_string()))
    }

    /// Extra query flag that embeds the parent record in wanted listings.
    fn include_parent_param(&self) -> Option<&'static str> {
        match self.service {
            ServiceKind::Sonarr => Some("includeSeries"),
            ServiceKind::Lidarr => Some("includeArtist"),
            ServiceKind::Readarr => Some("includeAuthor"),
            ServiceKind::Radarr | ServiceKind::Prowlarr => None,
        }
    }

    async fn wanted(&self, path: &str, query: &WantedQuery) -> Result<Page, ArrClientError> {
        if !self.service.supports_hunting() {
            return Err(self.unsupported("wanted listing"));
        }
        let mut params = vec![
            ("page", query.page.to_string()),
            ("pageSize", query.page_size.to_string()),
            ("sortKey", query.sort_key.clone()),
            ("sortDirection", query.sort_direction.as_str().to_string()),
            ("monitored", query.monitored_only.to_string()),
        ];
        if let Some(flag) = self.include_parent_param() {
            params.push((flag, "true".to_string()));
        }
        debug!(
            target: "arr_client",
            service = %self.service,
            path,
            page = query.page,
            page_size = query.page_size,
            "fetching wanted page"
        );
        let value = self
            .send_json(self.request(Method::GET, path)?.query(&params))
            .await?;
        Page::from_value(value)
    }
}

#[async_trait]
impl ArrClient for ArrHttpClient {
    fn service(&self) -> ServiceKind {
        self.service
    }

    async fn wanted_missing(&self, query: &WantedQuery) -> Result<Page, ArrClientError> {
        self.wanted("/wanted/missing", query).await
    }

    async fn wanted_cutoff(&self, query: &WantedQuery) -> Result<Page, ArrClientError> {
        self.wanted("/wanted/cutoff", query).await
    }

    async fn catalog(&self) -> Result<Vec<Value>, ArrClientError> {
        let path = match self.service {
            ServiceKind::Sonarr => "/series",
            ServiceKind::Radarr => "/movie",
            ServiceKind::Lidarr => "/artist",
            ServiceKind::Readarr => "/author",
            ServiceKind::Prowlarr => return Err(self.unsupported("catalog")),
        };
        match self.send_json(self.request(Method::GET, path)?).await? {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(ArrClientError::Deserialization(format!(
                "expected an array from {path}, got {other}"
            ))),
        }
    }

    async fn queue(&self, page_size: u32) -> Result<Page, ArrClientError> {
        if !self.service.supports_queue() {
            return Err(self.unsupported("queue"));
        }
        let params = [("page", "1".to_string()), ("pageSize", page_size.to_string())];
        let value = self
            .send_json(self.request(Method::GET, "/queue")?.query(&params))
            .await?;
        Page::from_value(value)
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Page, ArrClientError> {
        let mut params = vec![
            ("page", "1".to_string()),
            ("pageSize", query.page_size.to_string()),
            ("sortKey", query.sort_key.clone()),
            ("sortDirection", query.sort_direction.as_str().to_string()),
        ];
        if query.grabbed_only {
            params.push(("eventType", "1".to_string()));
        }
        let value = self
            .send_json(self.request(Method::GET, "/history")?.query(&params))
            .await?;
        Page::from_value(value)
    }

    async fn execute_command(&self, command: &ArrCommand) -> Result<Value, ArrClientError> {
        debug!(
            target: "arr_client",
            service = %self.service,
            command = command.name(),
            "posting command"
        );
        self.send_json(self.request(Method::POST, "/command")?.json(&command.to_body()))
            .await
    }

    async fn remove_queue_item(
        &self,
        queue_id: i64,
        options: RemovalOptions,
    ) -> Result<(), ArrClientError> {
        let params = [
            ("removeFromClient", options.remove_from_client.to_string()),
            ("blocklist", options.blocklist.to_string()),
        ];
        self.send(
            self.request(Method::DELETE, &format!("/queue/{queue_id}"))?
                .query(&params),
        )
        .await?;
        Ok(())
    }

    async fn manual_import_candidates(
        &self,
        download_id: &str,
    ) -> Result<Vec<Value>, ArrClientError> {
        let params = [
            ("downloadId", download_id.to_string()),
            ("filterExistingFiles", "true".to_string()),
        ];
        match self
            .send_json(self.request(Method::GET, "/manualimport")?.query(&params))
            .await?
        {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(ArrClientError::Deserialization(format!(
                "expected an array of manual import candidates, got {other}"
            ))),
        }
    }
}
