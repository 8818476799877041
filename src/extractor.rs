//! One-shot extraction of vendor messages to the staging directory
//!
//! A run resolves a selector to its ordered queries, gathers up to the
//! requested number of message ids, saves each one as `<id>.<ext>` and then
//! marks it done by adding the completion label and archiving it as read.
//! Finally a downstream command is started to pick the files up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::GmailClient;
use crate::config::ExtractorConfig;
use crate::error::{Result, TriageError};
use crate::label_manager::LabelManager;
use crate::models::{ExtractionBatch, Selector, SelectorTable, INBOX_LABEL, UNREAD_LABEL};
use crate::search::fill_batch;

/// A message that was not fully processed
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedMessage {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub run_id: Uuid,
    pub selector: String,
    pub requested: usize,
    /// Ids in the order they were gathered
    pub batch: Vec<String>,
    pub written: Vec<PathBuf>,
    pub labeled: usize,
    pub failed: Vec<FailedMessage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub handoff_pid: Option<u32>,
}

impl ExtractionReport {
    pub fn is_partial(&self) -> bool {
        self.batch.len() < self.requested
    }
}

pub struct Extractor<C: GmailClient> {
    client: C,
    selectors: SelectorTable,
    completion_label: String,
    staging_dir: PathBuf,
    file_extension: String,
    handoff_command: Vec<String>,
    page_size: u32,
}

impl<C: GmailClient> Extractor<C> {
    pub fn new(client: C, config: &ExtractorConfig, page_size: u32) -> Self {
        Self {
            client,
            selectors: config.selector_table(),
            completion_label: config.completion_label.clone(),
            staging_dir: config.staging_dir.clone(),
            file_extension: config.file_extension.clone(),
            handoff_command: config.handoff_command.clone(),
            page_size,
        }
    }

    /// Extract up to `count` messages for `selector`.
    ///
    /// Unknown selectors, a zero count and a missing completion label end the
    /// run before anything is touched. Failures on individual messages are
    /// recorded in the report and never abort the batch.
    pub async fn run(&self, selector: &str, count: usize) -> Result<ExtractionReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let selector = self.selectors.resolve(selector)?;
        if count == 0 {
            return Err(TriageError::InvalidCount(
                "count must be a positive integer".to_string(),
            ));
        }

        let completion_label_id = LabelManager::new(&self.client)
            .find_label_id(&self.completion_label)
            .await?
            .ok_or_else(|| TriageError::MissingCompletionLabel(self.completion_label.clone()))?;
        debug!(
            "Completion label '{}' has ID {}",
            self.completion_label, completion_label_id
        );

        info!(
            "Extraction run {} for '{}' (up to {} message(s))",
            run_id, selector.key, count
        );

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let cleared = clear_staging_dir(&self.staging_dir).await;
        debug!("Cleared {} file(s) from {:?}", cleared, self.staging_dir);

        let batch = self.accumulate_batch(selector, count).await;
        if batch.len() < count {
            warn!(
                "Not enough emails found: {} of {} requested, proceeding with what we have",
                batch.len(),
                count
            );
        }

        let mut report = ExtractionReport {
            run_id,
            selector: selector.key.clone(),
            requested: count,
            batch: batch.ids().to_vec(),
            written: Vec::new(),
            labeled: 0,
            failed: Vec::new(),
            started_at,
            finished_at: started_at,
            handoff_pid: None,
        };

        self.process_batch(&batch, &completion_label_id, &mut report)
            .await;

        info!(
            "Emails have been saved, labeled, and removed from the inbox ({} written, {} labeled, {} failed)",
            report.written.len(),
            report.labeled,
            report.failed.len()
        );

        report.handoff_pid = self.spawn_handoff();
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Run the selector's queries in order until `count` ids are held.
    /// Later queries are never executed once the batch is full.
    async fn accumulate_batch(&self, selector: &Selector, count: usize) -> ExtractionBatch {
        let mut batch = ExtractionBatch::with_capacity(count);

        for query in &selector.queries {
            if batch.is_full() {
                break;
            }

            match fill_batch(&self.client, query, &mut batch, self.page_size).await {
                Ok(added) => info!(
                    "Query '{}' added {} message(s) ({}/{})",
                    query,
                    added,
                    batch.len(),
                    count
                ),
                Err(e) => warn!("Query '{}' failed, keeping what it found: {}", query, e),
            }
        }

        batch
    }

    async fn process_batch(
        &self,
        batch: &ExtractionBatch,
        completion_label_id: &str,
        report: &mut ExtractionReport,
    ) {
        let add = [completion_label_id.to_string()];
        let remove = [UNREAD_LABEL.to_string(), INBOX_LABEL.to_string()];

        for id in batch.ids() {
            let path = match self.save_message(id).await {
                Ok(path) => path,
                Err(e) => {
                    error!("Failed to save message {}: {}", id, e);
                    report.failed.push(FailedMessage {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            report.written.push(path);
            info!(
                "Extracted {} of {} email(s)",
                report.written.len(),
                batch.len()
            );

            match self.client.modify_message(id, &add, &remove).await {
                Ok(()) => report.labeled += 1,
                Err(e) => {
                    error!("Failed to mark message {} as extracted: {}", id, e);
                    report.failed.push(FailedMessage {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn save_message(&self, id: &str) -> Result<PathBuf> {
        let raw = self.client.get_raw_message(id).await?;
        let path = self
            .staging_dir
            .join(format!("{}.{}", id, self.file_extension));
        tokio::fs::write(&path, &raw).await?;
        debug!("Wrote {} bytes to {:?}", raw.len(), path);
        Ok(path)
    }

    /// Start the downstream command without waiting for it
    fn spawn_handoff(&self) -> Option<u32> {
        let (program, args) = match self.handoff_command.split_first() {
            Some(parts) => parts,
            None => {
                debug!("No hand-off command configured");
                return None;
            }
        };

        info!("Running '{}'...", self.handoff_command.join(" "));
        match Command::new(program).args(args).spawn() {
            Ok(child) => child.id(),
            Err(e) => {
                error!("Failed to start hand-off '{}': {}", program, e);
                None
            }
        }
    }
}

/// Remove the regular files in `dir`, leaving subdirectories alone.
/// Nothing here is fatal: a directory that can't be listed, and entries that
/// can't be inspected or deleted, are logged and skipped.
pub async fn clear_staging_dir(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list staging directory {:?}: {}", dir, e);
            return 0;
        }
    };
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped clearing {:?} early: {}", dir, e);
                break;
            }
        };

        let is_file = match entry.file_type().await {
            Ok(file_type) => file_type.is_file(),
            Err(e) => {
                warn!("Could not inspect {:?}: {}", entry.path(), e);
                continue;
            }
        };
        if !is_file {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove {:?}: {}", entry.path(), e),
        }
    }

    removed
}
