//! Pipeline runner: executes a freshly derived plan in quota-checked batches.
//!
//! Jobs for one `base_id` run sequentially so the linker's upsert never races
//! with itself; different `base_id`s within a batch run concurrently up to
//! `max_concurrency`. Cancellation is only observed between batches, so a job
//! is never left half-written.

use crate::config::Config;
use crate::error::{LinkError, ProviderError, StoreError};
use crate::linker::DocumentLinker;
use crate::locale::LocaleCode;
use crate::model::{Record, TranslationJob};
use crate::planner::{self, Plan};
use crate::provider::{translate_content, TranslationProvider};
use crate::quota::{classify, ErrorClass, QuotaGuard, Reservation};
use crate::report::{AbortReason, RunState, SyncReport};
use crate::retry::{with_backoff, RetryConfig, Retryable};
use crate::store::{list_all, DocumentStore};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Knobs for one runner instance.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_concurrency: usize,
    pub page_size: u32,
    /// Applied to the whole translate + attach unit of one job
    pub job_retry: RetryConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause: Duration::from_secs(1),
            max_concurrency: 4,
            page_size: 100,
            job_retry: RetryConfig::translation_job(),
        }
    }
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_pause: config.batch_pause,
            max_concurrency: config.max_concurrency,
            page_size: config.store_page_size,
            job_retry: RetryConfig::translation_job().with_max_attempts(config.max_attempts),
        }
    }
}

/// Failure of one translate + attach unit
#[derive(Debug, Error)]
enum JobFailure {
    #[error(transparent)]
    Provider(ProviderError),
    #[error(transparent)]
    Link(LinkError),
}

impl Retryable for JobFailure {
    fn is_retryable(&self) -> bool {
        match self {
            JobFailure::Provider(e) => e.is_retryable(),
            // Writes are not retried: a failed attach leaves the job for the next run
            JobFailure::Link(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            JobFailure::Provider(e) => e.retry_after(),
            JobFailure::Link(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobOutcome {
    Translated,
    Failed(String),
    SkippedQuota,
    NotAttempted,
    /// Credential rejected; the job counts as failed and the run aborts
    AuthRejected(String),
}

pub struct PipelineRunner<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    provider: Arc<P>,
    linker: DocumentLinker<S>,
    guard: QuotaGuard<P>,
    settings: RunSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S, P> PipelineRunner<S, P>
where
    S: DocumentStore + ?Sized,
    P: TranslationProvider + ?Sized,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, settings: RunSettings) -> Self {
        Self {
            linker: DocumentLinker::new(store.clone()),
            guard: QuotaGuard::new(provider.clone()),
            store,
            provider,
            settings,
            cancel: None,
        }
    }

    /// Replace the default quota guard (reserve margin, usage retry policy)
    pub fn with_guard(mut self, guard: QuotaGuard<P>) -> Self {
        self.guard = guard;
        self
    }

    /// Stop between batches once the channel carries `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Bring every target locale up to date with the source locale.
    ///
    /// Always returns a report; failures are recorded in it rather than
    /// propagated.
    pub async fn run_sync(&self, source_locale: &LocaleCode, targets: &[LocaleCode]) -> SyncReport {
        let mut report = SyncReport::new(
            source_locale.as_str(),
            targets.iter().map(LocaleCode::to_string).collect(),
        );
        info!(
            "Starting sync {} -> [{}]",
            source_locale,
            report.target_locales.join(", ")
        );

        transition(&mut report, RunState::Planning);
        let (plan, sources) = match self.plan(source_locale, targets).await {
            Ok(planned) => planned,
            Err(e) => {
                error!("Failed to read current store state: {}", e);
                report.abort(AbortReason::StoreRead {
                    message: e.to_string(),
                });
                return report;
            }
        };

        report.already_translated = plan.already_translated;
        for conflict in &plan.conflicts {
            warn!("Conflict left for the auditor: {:?}", conflict);
        }
        report.conflicts = plan.conflicts.clone();
        info!(
            "Plan: {} jobs (~{} chars), {} already translated, {} conflicts",
            plan.jobs.len(),
            plan.estimated_chars(),
            plan.already_translated,
            plan.conflicts.len()
        );

        if plan.jobs.is_empty() {
            report.complete();
            info!("Nothing to translate");
            return report;
        }

        transition(&mut report, RunState::Executing);
        for target in targets {
            if let Err(e) = self.store.ensure_locale_exists(target).await {
                error!("Could not register locale {}: {}", target, e);
                report.not_attempted = plan.jobs.len();
                report.abort(AbortReason::LocaleRegistration {
                    locale: target.to_string(),
                    message: e.to_string(),
                });
                return report;
            }
        }

        self.execute(&plan, &sources, source_locale, &mut report).await;
        info!(
            "Sync finished ({:?}): translated={} already={} failed={} skippedQuota={} notAttempted={}",
            report.state,
            report.translated,
            report.already_translated,
            report.failed,
            report.skipped_quota,
            report.not_attempted
        );
        report
    }

    async fn plan(
        &self,
        source_locale: &LocaleCode,
        targets: &[LocaleCode],
    ) -> Result<(Plan, HashMap<String, Record>), StoreError> {
        let page_size = self.settings.page_size;
        let sources = list_all(self.store.as_ref(), source_locale, page_size).await?;

        let mut existing = Vec::new();
        for target in targets {
            existing.extend(list_all(self.store.as_ref(), target, page_size).await?);
        }

        let plan = planner::plan(&sources, targets, &existing);
        let by_base = sources
            .into_iter()
            .map(|record| (record.base_id.clone(), record))
            .collect();
        Ok((plan, by_base))
    }

    async fn execute(
        &self,
        plan: &Plan,
        sources: &HashMap<String, Record>,
        source_locale: &LocaleCode,
        report: &mut SyncReport,
    ) {
        let mut pending = plan.jobs.len();
        let batch_count = pending.div_ceil(self.settings.batch_size.max(1));

        for (index, batch) in plan.jobs.chunks(self.settings.batch_size.max(1)).enumerate() {
            if self.is_cancelled() {
                warn!("Cancellation requested, {} jobs not attempted", pending);
                report.not_attempted += pending;
                report.abort(AbortReason::Cancelled);
                return;
            }

            let estimate: u64 = batch.iter().map(|j| j.estimated_chars).sum();
            match self.guard.reserve(estimate).await {
                Ok(Reservation::Allowed { .. }) => {}
                Ok(Reservation::Denied { reason, .. }) => {
                    info!(
                        "Quota guard denied batch {}/{} ({:?}); skipping {} jobs",
                        index + 1,
                        batch_count,
                        reason,
                        pending
                    );
                    report.skipped_quota += pending;
                    break;
                }
                Err(e) => {
                    error!("Provider credential rejected during usage check: {}", e);
                    report.not_attempted += pending;
                    report.abort(AbortReason::ProviderAuth {
                        message: e.to_string(),
                    });
                    return;
                }
            }

            pending -= batch.len();
            info!(
                "Executing batch {}/{} ({} jobs, ~{} chars)",
                index + 1,
                batch_count,
                batch.len(),
                estimate
            );

            let outcomes = self.execute_batch(batch, sources, source_locale).await;

            let mut auth_error = None;
            let mut quota_exhausted = false;
            for (job, outcome) in outcomes {
                match outcome {
                    JobOutcome::Translated => report.translated += 1,
                    JobOutcome::Failed(reason) => report.record_failure(job, reason),
                    JobOutcome::SkippedQuota => {
                        quota_exhausted = true;
                        report.skipped_quota += 1;
                    }
                    JobOutcome::NotAttempted => report.not_attempted += 1,
                    JobOutcome::AuthRejected(reason) => {
                        report.record_failure(job, reason.clone());
                        auth_error.get_or_insert(reason);
                    }
                }
            }

            if let Some(message) = auth_error {
                error!("Provider credential rejected, aborting run");
                report.not_attempted += pending;
                report.abort(AbortReason::ProviderAuth { message });
                return;
            }

            if quota_exhausted {
                info!("Provider quota exhausted mid-run; skipping {} jobs", pending);
                report.skipped_quota += pending;
                break;
            }

            if pending > 0 && !self.settings.batch_pause.is_zero() {
                debug!("Pausing {:?} before next batch", self.settings.batch_pause);
                sleep(self.settings.batch_pause).await;
            }
        }

        report.complete();
    }

    /// Run one batch: groups by `base_id` run concurrently, jobs within a group in order.
    async fn execute_batch<'a>(
        &self,
        batch: &'a [TranslationJob],
        sources: &HashMap<String, Record>,
        source_locale: &LocaleCode,
    ) -> Vec<(&'a TranslationJob, JobOutcome)> {
        let mut groups: Vec<(&str, Vec<&'a TranslationJob>)> = Vec::new();
        for job in batch {
            match groups.iter_mut().find(|(base_id, _)| *base_id == job.base_id) {
                Some((_, jobs)) => jobs.push(job),
                None => groups.push((job.base_id.as_str(), vec![job])),
            }
        }

        let halt = AtomicBool::new(false);
        let halt = &halt;
        stream::iter(groups)
            .map(move |(base_id, jobs)| {
                self.execute_group(sources.get(base_id), jobs, source_locale, halt)
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn execute_group<'a>(
        &self,
        source: Option<&Record>,
        jobs: Vec<&'a TranslationJob>,
        source_locale: &LocaleCode,
        halt: &AtomicBool,
    ) -> Vec<(&'a TranslationJob, JobOutcome)> {
        let Some(source) = source else {
            return jobs
                .into_iter()
                .map(|job| {
                    let reason = LinkError::MissingSource(job.base_id.clone()).to_string();
                    (job, JobOutcome::Failed(reason))
                })
                .collect();
        };

        if halt.load(Ordering::SeqCst) {
            return jobs.into_iter().map(|j| (j, JobOutcome::NotAttempted)).collect();
        }

        // Link before translating so a crash never strands a variant
        let link_id = match self.linker.ensure_link(source).await {
            Ok(link_id) => link_id,
            Err(e) => {
                warn!("Could not link source {}: {}", source.base_id, e);
                let reason = format!("link failed: {}", e);
                return jobs
                    .into_iter()
                    .map(|job| (job, JobOutcome::Failed(reason.clone())))
                    .collect();
            }
        };

        let mut outcomes = Vec::with_capacity(jobs.len());
        let mut quota_exhausted = false;
        for job in jobs {
            if halt.load(Ordering::SeqCst) {
                outcomes.push((job, JobOutcome::NotAttempted));
                continue;
            }
            if quota_exhausted {
                outcomes.push((job, JobOutcome::SkippedQuota));
                continue;
            }

            let outcome = self.execute_job(job, source, &link_id, source_locale).await;
            match &outcome {
                JobOutcome::AuthRejected(_) => halt.store(true, Ordering::SeqCst),
                JobOutcome::SkippedQuota => quota_exhausted = true,
                _ => {}
            }
            outcomes.push((job, outcome));
        }
        outcomes
    }

    async fn execute_job(
        &self,
        job: &TranslationJob,
        source: &Record,
        link_id: &str,
        source_locale: &LocaleCode,
    ) -> JobOutcome {
        let provider = self.provider.as_ref();
        let linker = &self.linker;
        let target = &job.target_locale;
        let name = format!("Translate {} -> {}", job.base_id, target);

        let result = with_backoff(&self.settings.job_retry, &name, || async move {
            let translated = translate_content(provider, &source.content, source_locale, target)
                .await
                .map_err(JobFailure::Provider)?;
            linker
                .attach_variant(&source.base_id, link_id, target, translated)
                .await
                .map_err(JobFailure::Link)
        })
        .await;

        match result {
            Ok(variant) => {
                debug!(
                    "Attached {} variant {} for {}",
                    target, variant.record_id, job.base_id
                );
                JobOutcome::Translated
            }
            Err(JobFailure::Provider(e)) => match classify(&e) {
                ErrorClass::Abort => JobOutcome::AuthRejected(e.to_string()),
                ErrorClass::QuotaExhausted => JobOutcome::SkippedQuota,
                ErrorClass::Retry | ErrorClass::FailJob => {
                    warn!("Job {} -> {} failed: {}", job.base_id, target, e);
                    JobOutcome::Failed(e.to_string())
                }
            },
            Err(JobFailure::Link(e)) => {
                warn!("Write-back for {} -> {} failed: {}", job.base_id, target, e);
                JobOutcome::Failed(e.to_string())
            }
        }
    }
}

fn transition(report: &mut SyncReport, next: RunState) {
    info!("Run state {:?} -> {:?}", report.state, next);
    report.state = next;
}
