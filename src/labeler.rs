//! Continuous vendor classification
//!
//! Each cycle walks the classification table in order, makes sure every
//! label exists and applies it to every message its rules match. Rules
//! carry a `-label:` clause for their own label, so a message that is
//! already labeled never matches again and re-running a cycle is harmless.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::GmailClient;
use crate::config::Schedule;
use crate::label_manager::LabelManager;
use crate::models::{ClassificationTable, LabelRules};
use crate::search::collect_message_ids;

/// Outcome of one rule within a cycle
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleReport {
    pub query: String,
    pub matched: usize,
    pub labeled: usize,
    pub error: Option<String>,
}

/// Outcome of one label within a cycle
#[derive(Debug, Clone, Serialize)]
pub struct LabelReport {
    pub label: String,
    pub label_id: Option<String>,
    pub rules: Vec<RuleReport>,
    /// Set when the label could not be resolved and its rules were skipped
    pub error: Option<String>,
}

impl LabelReport {
    pub fn matched(&self) -> usize {
        self.rules.iter().map(|r| r.matched).sum()
    }

    pub fn labeled(&self) -> usize {
        self.rules.iter().map(|r| r.labeled).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub labels: Vec<LabelReport>,
    /// Ids of labels this cycle had to create
    pub created_labels: Vec<String>,
}

impl CycleReport {
    pub fn total_matched(&self) -> usize {
        self.labels.iter().map(LabelReport::matched).sum()
    }

    pub fn total_labeled(&self) -> usize {
        self.labels.iter().map(LabelReport::labeled).sum()
    }

    /// Rules and labels that hit an error this cycle
    pub fn failures(&self) -> usize {
        self.labels
            .iter()
            .map(|l| {
                usize::from(l.error.is_some()) + l.rules.iter().filter(|r| r.error.is_some()).count()
            })
            .sum()
    }

    pub fn label(&self, name: &str) -> Option<&LabelReport> {
        self.labels.iter().find(|l| l.label == name)
    }
}

/// What happened in one supervised step of the classifier loop
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The session check failed; nothing was searched
    AuthFailed(String),
    /// The cycle panicked part way through
    Aborted(String),
}

impl CycleOutcome {
    /// How long to wait before the next step
    pub fn next_delay(&self, schedule: &Schedule) -> Duration {
        match self {
            CycleOutcome::Completed(_) => schedule.interval,
            CycleOutcome::AuthFailed(_) | CycleOutcome::Aborted(_) => schedule.cooldown,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }
}

pub struct Labeler<C: GmailClient> {
    client: C,
    table: ClassificationTable,
    schedule: Schedule,
    page_size: u32,
}

impl<C: GmailClient> Labeler<C> {
    pub fn new(client: C, table: ClassificationTable, schedule: Schedule, page_size: u32) -> Self {
        Self {
            client,
            table,
            schedule,
            page_size,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Run the table once. Service errors are logged and recorded in the
    /// report; they never end the cycle early.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);

        async move {
            let started_at = Utc::now();
            info!("Starting classification cycle over {} labels", self.table.len());

            let mut label_manager = LabelManager::new(&self.client);
            let mut labels = Vec::with_capacity(self.table.len());

            for entry in self.table.iter() {
                labels.push(self.classify_label(&mut label_manager, entry).await);
            }

            let created_labels = label_manager.created_labels().to_vec();
            if !created_labels.is_empty() {
                info!("Created {} new label(s) this cycle", created_labels.len());
            }

            let report = CycleReport {
                cycle_id,
                started_at,
                finished_at: Utc::now(),
                labels,
                created_labels,
            };

            info!(
                "Cycle finished: {} matched, {} labeled, {} failure(s)",
                report.total_matched(),
                report.total_labeled(),
                report.failures()
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn classify_label(
        &self,
        label_manager: &mut LabelManager<'_, C>,
        entry: &LabelRules,
    ) -> LabelReport {
        let label_id = match label_manager.get_or_create_label(&entry.label).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping label '{}' this cycle: {}", entry.label, e);
                return LabelReport {
                    label: entry.label.clone(),
                    label_id: None,
                    rules: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut rules = Vec::with_capacity(entry.rules.len());
        for rule in &entry.rules {
            rules.push(self.apply_rule(&label_id, rule).await);
        }

        let report = LabelReport {
            label: entry.label.clone(),
            label_id: Some(label_id),
            rules,
            error: None,
        };
        info!(
            "Label '{}': {} matched, {} labeled",
            report.label,
            report.matched(),
            report.labeled()
        );
        report
    }

    async fn apply_rule(&self, label_id: &str, rule: &str) -> RuleReport {
        let mut report = RuleReport {
            query: rule.to_string(),
            matched: 0,
            labeled: 0,
            error: None,
        };

        let ids = match collect_message_ids(&self.client, rule, self.page_size).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Query '{}' failed, treating as no matches: {}", rule, e);
                report.error = Some(e.to_string());
                return report;
            }
        };

        report.matched = ids.len();
        if ids.is_empty() {
            info!("No messages match '{}'", rule);
            return report;
        }

        let add = [label_id.to_string()];
        for id in &ids {
            if let Err(e) = self.client.modify_message(id, &add, &[]).await {
                warn!(
                    "Applying label to {} failed, abandoning rule '{}': {}",
                    id, rule, e
                );
                report.error = Some(e.to_string());
                break;
            }
            report.labeled += 1;
        }

        info!(
            "Rule '{}': {} matched, {} labeled",
            rule, report.matched, report.labeled
        );
        report
    }

    /// One supervised step: check the session, then run a cycle, turning a
    /// panic into [`CycleOutcome::Aborted`].
    pub async fn tick(&self) -> CycleOutcome {
        match self.client.verify_session().await {
            Ok(account) => debug!("Session valid for {}", account),
            Err(e) => {
                error!("Authentication failed, abandoning cycle: {}", e);
                return CycleOutcome::AuthFailed(e.to_string());
            }
        }

        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(report) => CycleOutcome::Completed(report),
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("Classification cycle aborted: {}", message);
                CycleOutcome::Aborted(message)
            }
        }
    }

    /// Run cycles until the process is killed
    pub async fn run_forever(&self) {
        info!(
            "Classifier running every {:?} (cooldown {:?} after failures)",
            self.schedule.interval, self.schedule.cooldown
        );

        loop {
            let outcome = self.tick().await;
            let delay = outcome.next_delay(&self.schedule);
            if outcome.is_completed() {
                info!("Next cycle in {:?}", delay);
            } else {
                warn!("Cooling down for {:?} before retrying", delay);
            }
            tokio::time::sleep(delay).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
