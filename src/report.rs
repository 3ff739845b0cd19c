//! Run state and the structured report every sync run returns.

use crate::model::TranslationJob;
use crate::planner::Conflict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Pipeline run state machine: `Idle -> Planning -> Executing -> Completed | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Planning,
    Executing,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

/// Why a run stopped before finishing its plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AbortReason {
    /// The provider rejected the credential
    ProviderAuth { message: String },
    /// A target locale could not be registered in the store
    LocaleRegistration { locale: String, message: String },
    /// Current state could not be read, so no plan was made
    StoreRead { message: String },
    /// The operator asked the run to stop
    Cancelled,
}

/// One entry of the per-job error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub base_id: String,
    pub target_locale: String,
    pub reason: String,
}

/// Outcome of one `run_sync` call. Produced fresh per run and never read back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source_locale: String,
    pub target_locales: Vec<String>,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    pub already_translated: usize,
    pub translated: usize,
    pub failed: usize,
    pub skipped_quota: usize,
    pub not_attempted: usize,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<JobError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn new(source_locale: impl Into<String>, target_locales: Vec<String>) -> Self {
        Self {
            source_locale: source_locale.into(),
            target_locales,
            state: RunState::Idle,
            abort_reason: None,
            already_translated: 0,
            translated: 0,
            failed: 0,
            skipped_quota: 0,
            not_attempted: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_failure(&mut self, job: &TranslationJob, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.push(JobError {
            base_id: job.base_id.clone(),
            target_locale: job.target_locale.to_string(),
            reason: reason.into(),
        });
    }

    pub fn complete(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn abort(&mut self, reason: AbortReason) {
        self.state = RunState::Aborted;
        self.abort_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }

    /// Jobs the run accounted for in one of the outcome buckets
    pub fn jobs_accounted(&self) -> usize {
        self.translated + self.failed + self.skipped_quota + self.not_attempted
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
    }
}
