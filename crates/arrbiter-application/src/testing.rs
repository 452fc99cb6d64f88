// SPDX-License-Identifier: GPL-3.0-or-later
//! In-process `ArrClient` double for executor tests.

use std::collections::HashSet;
use std::sync::Mutex;

use arrbiter_domain::ServiceKind;
use async_trait::async_trait;
use serde_json::Value;

use crate::arr_client::{
    ArrClient, ArrClientError, ArrCommand, HistoryQuery, Page, RemovalOptions, WantedQuery,
};

pub struct FakeArrClient {
    service: ServiceKind,
    wanted: Result<Vec<Value>, String>,
    catalog: Vec<Value>,
    queue: Result<Vec<Value>, String>,
    history: Result<Vec<Value>, String>,
    manual_import: Result<Vec<Value>, String>,
    failing_commands: HashSet<usize>,
    failing_removals: HashSet<i64>,
    commands: Mutex<Vec<ArrCommand>>,
    removals: Mutex<Vec<(i64, RemovalOptions)>>,
}

impl FakeArrClient {
    pub fn new(service: ServiceKind) -> Self {
        Self {
            service,
            wanted: Ok(Vec::new()),
            catalog: Vec::new(),
            queue: Ok(Vec::new()),
            history: Err("history not configured".to_string()),
            manual_import: Ok(Vec::new()),
            failing_commands: HashSet::new(),
            failing_removals: HashSet::new(),
            commands: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
        }
    }

    pub fn with_wanted(mut self, records: Vec<Value>) -> Self {
        self.wanted = Ok(records);
        self
    }

    pub fn failing_wanted(mut self, message: &str) -> Self {
        self.wanted = Err(message.to_string());
        self
    }

    pub fn with_catalog(mut self, records: Vec<Value>) -> Self {
        self.catalog = records;
        self
    }

    pub fn with_queue(mut self, records: Vec<Value>) -> Self {
        self.queue = Ok(records);
        self
    }

    pub fn failing_queue(mut self, message: &str) -> Self {
        self.queue = Err(message.to_string());
        self
    }

    pub fn with_history_records(mut self, records: Vec<Value>) -> Self {
        self.history = Ok(records);
        self
    }

    pub fn with_manual_import(mut self, candidates: Vec<Value>) -> Self {
        self.manual_import = Ok(candidates);
        self
    }

    pub fn failing_manual_import(mut self, message: &str) -> Self {
        self.manual_import = Err(message.to_string());
        self
    }

    /// Zero-based indexes of `execute_command` calls that should fail.
    pub fn failing_command_calls(mut self, calls: &[usize]) -> Self {
        self.failing_commands = calls.iter().copied().collect();
        self
    }

    pub fn failing_removal_of(mut self, queue_id: i64) -> Self {
        self.failing_removals.insert(queue_id);
        self
    }

    pub fn commands(&self) -> Vec<ArrCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<(i64, RemovalOptions)> {
        self.removals.lock().unwrap().clone()
    }

    fn paged(records: &Result<Vec<Value>, String>, page: u32, page_size: u32) -> Result<Page, ArrClientError> {
        let records = records
            .as_ref()
            .map_err(|message| ArrClientError::Request(message.clone()))?;
        let start = (page.saturating_sub(1) as usize).saturating_mul(page_size as usize);
        Ok(Page {
            records: records
                .iter()
                .skip(start)
                .take(page_size as usize)
                .cloned()
                .collect(),
            total_records: records.len() as u64,
        })
    }
}

#[async_trait]
impl ArrClient for FakeArrClient {
    fn service(&self) -> ServiceKind {
        self.service
    }

    async fn wanted_missing(&self, query: &WantedQuery) -> Result<Page, ArrClientError> {
        Self::paged(&self.wanted, query.page, query.page_size)
    }

    async fn wanted_cutoff(&self, query: &WantedQuery) -> Result<Page, ArrClientError> {
        Self::paged(&self.wanted, query.page, query.page_size)
    }

    async fn catalog(&self) -> Result<Vec<Value>, ArrClientError> {
        Ok(self.catalog.clone())
    }

    async fn queue(&self, page_size: u32) -> Result<Page, ArrClientError> {
        Self::paged(&self.queue, 1, page_size)
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Page, ArrClientError> {
        Self::paged(&self.history, 1, query.page_size)
    }

    async fn execute_command(&self, command: &ArrCommand) -> Result<Value, ArrClientError> {
        let mut commands = self.commands.lock().unwrap();
        let index = commands.len();
        commands.push(command.clone());
        if self.failing_commands.contains(&index) {
            return Err(ArrClientError::Request(format!("{} rejected", command.name())));
        }
        Ok(serde_json::json!({ "id": index + 1, "name": command.name() }))
    }

    async fn remove_queue_item(
        &self,
        queue_id: i64,
        options: RemovalOptions,
    ) -> Result<(), ArrClientError> {
        if self.failing_removals.contains(&queue_id) {
            return Err(ArrClientError::Request("removal rejected".to_string()));
        }
        self.removals.lock().unwrap().push((queue_id, options));
        Ok(())
    }

    async fn manual_import_candidates(
        &self,
        _download_id: &str,
    ) -> Result<Vec<Value>, ArrClientError> {
        self.manual_import
            .clone()
            .map_err(ArrClientError::Request)
    }
}
