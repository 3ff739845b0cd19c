//! Consistency auditor: read-only diagnostics plus the operator-confirmed
//! corrective operations they feed.
//!
//! Every destructive operation is two-step. `plan` derives the affected
//! records and a confirmation token from current store state; `execute`
//! derives the plan again and only proceeds when the supplied token matches.

use crate::error::{CorrectiveError, LinkError, StoreError};
use crate::linker::{DocumentLinker, LinkStatus};
use crate::locale::LocaleCode;
use crate::model::{Pagination, Record};
use crate::planner::{self, Conflict};
use crate::security::{confirmation_token, confirms};
use crate::store::{list_all, DocumentStore};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Which checks an audit runs. All are on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditChecks {
    pub count_parity: bool,
    pub linkage: bool,
    pub duplicates: bool,
}

impl Default for AuditChecks {
    fn default() -> Self {
        Self {
            count_parity: true,
            linkage: true,
            duplicates: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditScope {
    pub locales: Vec<LocaleCode>,
    pub checks: AuditChecks,
    /// Verify linkage for at most this many variants per locale
    pub sample_size: Option<usize>,
}

impl AuditScope {
    pub fn new(locales: Vec<LocaleCode>) -> Self {
        Self {
            locales,
            checks: AuditChecks::default(),
            sample_size: None,
        }
    }

    pub fn with_checks(mut self, checks: AuditChecks) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_sample(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleCount {
    pub locale: String,
    pub count: u64,
    /// Shortfall against the source locale: missing translations
    pub missing: u64,
    /// Surplus over the source locale: possible duplicates
    pub excess: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Orphan {
    pub record_id: String,
    pub base_id: String,
    pub locale: String,
    pub link_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub base_id: String,
    pub locale: String,
    pub record_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub source_locale: String,
    pub source_count: u64,
    pub checks: AuditChecks,
    pub counts: Vec<LocaleCount>,
    pub orphans: Vec<Orphan>,
    pub duplicates: Vec<DuplicateGroup>,
    /// Variants whose linkage was verified
    pub scanned_variants: usize,
    pub consistent: bool,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.counts.iter().all(|c| c.missing == 0 && c.excess == 0)
            && self.orphans.is_empty()
            && self.duplicates.is_empty()
    }
}

/// The explicit corrective operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrectiveOperation {
    DeleteOrphans,
    PurgeLocale,
    Relink,
}

impl CorrectiveOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrectiveOperation::DeleteOrphans => "delete-orphans",
            CorrectiveOperation::PurgeLocale => "purge-locale",
            CorrectiveOperation::Relink => "relink",
        }
    }
}

impl fmt::Display for CorrectiveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dry-run result of a corrective operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestructivePlan {
    pub operation: CorrectiveOperation,
    pub locale: String,
    pub record_ids: Vec<String>,
    /// Echo this back to `execute` to proceed
    pub token: String,
}

impl DestructivePlan {
    fn new(operation: CorrectiveOperation, locale: &LocaleCode, mut record_ids: Vec<String>) -> Self {
        record_ids.sort();
        let token = confirmation_token(operation.as_str(), locale.as_str(), record_ids.len());
        Self {
            operation,
            locale: locale.to_string(),
            record_ids,
            token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectiveOutcome {
    pub operation: CorrectiveOperation,
    pub locale: String,
    pub deleted_count: usize,
    /// Variants re-created under their source's link (relink only)
    pub relinked_count: usize,
    /// Records the operation could not finish. Everything else was applied.
    pub failures: Vec<RecordFailure>,
}

impl CorrectiveOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, record_id: &str, step: CorrectiveStep, err: impl fmt::Display) {
        warn!("{:?} of {} failed: {}", step, record_id, err);
        self.failures.push(RecordFailure {
            record_id: record_id.to_string(),
            step,
            reason: err.to_string(),
        });
    }
}

/// Step of a corrective operation that failed for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CorrectiveStep {
    /// Content was not re-attached under the source's link
    Relink,
    /// The record is still in the store
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub record_id: String,
    pub step: CorrectiveStep,
    pub reason: String,
}

pub struct ConsistencyAuditor<S: ?Sized> {
    store: Arc<S>,
    linker: DocumentLinker<S>,
    source_locale: LocaleCode,
    page_size: u32,
}

impl<S> ConsistencyAuditor<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>, source_locale: LocaleCode) -> Self {
        Self {
            linker: DocumentLinker::new(store.clone()),
            store,
            source_locale,
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn records(&self, locale: &LocaleCode) -> Result<Vec<Record>, StoreError> {
        list_all(self.store.as_ref(), locale, self.page_size).await
    }

    async fn count(&self, locale: &LocaleCode) -> Result<u64, StoreError> {
        let page = self
            .store
            .list_records(locale, Pagination::first(1))
            .await?;
        Ok(page.total)
    }

    /// Run the checks selected in `scope`. Never writes.
    pub async fn audit(&self, scope: &AuditScope) -> Result<AuditReport, StoreError> {
        let locales: Vec<&LocaleCode> = scope
            .locales
            .iter()
            .filter(|l| **l != self.source_locale)
            .collect();
        let checks = scope.checks;
        let needs_records = checks.linkage || checks.duplicates;

        let sources = if needs_records {
            self.records(&self.source_locale).await?
        } else {
            Vec::new()
        };
        let source_count = if needs_records {
            sources.len() as u64
        } else {
            self.count(&self.source_locale).await?
        };
        let source_links: HashSet<&str> = sources
            .iter()
            .filter_map(|s| s.link_id.as_deref())
            .collect();

        let mut report = AuditReport {
            source_locale: self.source_locale.to_string(),
            source_count,
            checks,
            counts: Vec::new(),
            orphans: Vec::new(),
            duplicates: Vec::new(),
            scanned_variants: 0,
            consistent: true,
        };

        for locale in locales {
            let variants = if needs_records {
                self.records(locale).await?
            } else {
                Vec::new()
            };

            if checks.count_parity {
                let count = if needs_records {
                    variants.len() as u64
                } else {
                    self.count(locale).await?
                };
                report.counts.push(LocaleCount {
                    locale: locale.to_string(),
                    count,
                    missing: source_count.saturating_sub(count),
                    excess: count.saturating_sub(source_count),
                });
            }

            if checks.linkage {
                let sample = scope.sample_size.unwrap_or(variants.len());
                for variant in variants.iter().take(sample) {
                    report.scanned_variants += 1;
                    if is_orphan(variant, &source_links) {
                        report.orphans.push(Orphan {
                            record_id: variant.record_id.clone(),
                            base_id: variant.base_id.clone(),
                            locale: variant.locale.clone(),
                            link_id: variant.link_id.clone(),
                        });
                    }
                }
            }

            if checks.duplicates {
                report
                    .duplicates
                    .extend(duplicate_groups(locale, &variants));
            }
        }

        report.consistent = report.is_consistent();
        info!(
            "Audit of {}: {} locales, {} orphans, {} duplicate groups",
            report.source_locale,
            report.counts.len(),
            report.orphans.len(),
            report.duplicates.len()
        );
        Ok(report)
    }

    /// Linkage of a single business key.
    pub async fn verify(&self, base_id: &str) -> Result<LinkStatus, LinkError> {
        self.linker.verify_link(base_id, &self.source_locale).await
    }

    /// Dry run: derive the affected records and the confirmation token.
    pub async fn plan(
        &self,
        operation: CorrectiveOperation,
        locale: &LocaleCode,
    ) -> Result<DestructivePlan, CorrectiveError> {
        if *locale == self.source_locale {
            return Err(CorrectiveError::SourceLocale(locale.to_string()));
        }

        let variants = self.records(locale).await?;
        let record_ids = match operation {
            CorrectiveOperation::PurgeLocale => {
                variants.into_iter().map(|v| v.record_id).collect()
            }
            CorrectiveOperation::DeleteOrphans => {
                let sources = self.records(&self.source_locale).await?;
                let source_links: HashSet<&str> = sources
                    .iter()
                    .filter_map(|s| s.link_id.as_deref())
                    .collect();
                variants
                    .iter()
                    .filter(|v| is_orphan(v, &source_links))
                    .map(|v| v.record_id.clone())
                    .collect()
            }
            CorrectiveOperation::Relink => {
                let sources = self.records(&self.source_locale).await?;
                relink_candidates(&sources, locale, &variants)
            }
        };

        Ok(DestructivePlan::new(operation, locale, record_ids))
    }

    /// Re-derive the plan and carry it out if `token` still matches.
    pub async fn execute(
        &self,
        operation: CorrectiveOperation,
        locale: &LocaleCode,
        token: &str,
    ) -> Result<CorrectiveOutcome, CorrectiveError> {
        let plan = self.plan(operation, locale).await?;
        if !confirms(&plan.token, token) {
            warn!("{} on {} refused: confirmation token mismatch", operation, locale);
            return Err(CorrectiveError::ConfirmationMismatch {
                expected: plan.token,
            });
        }

        let mut outcome = CorrectiveOutcome {
            operation,
            locale: locale.to_string(),
            deleted_count: 0,
            relinked_count: 0,
            failures: Vec::new(),
        };

        let relink_from = match operation {
            CorrectiveOperation::Relink => Some((
                self.records(&self.source_locale).await?,
                self.records(locale).await?,
            )),
            _ => None,
        };

        for record_id in &plan.record_ids {
            if let Some((sources, variants)) = &relink_from {
                if let Err(err) = self.relink_one(record_id, sources, variants, locale).await {
                    outcome.fail(record_id, CorrectiveStep::Relink, err);
                    continue;
                }
                outcome.relinked_count += 1;
            }

            match self.store.delete_record(record_id).await {
                Ok(()) => outcome.deleted_count += 1,
                Err(err) => outcome.fail(record_id, CorrectiveStep::Delete, err),
            }
        }

        if outcome.is_complete() {
            info!(
                "{} on {}: deleted {}, relinked {}",
                operation, locale, outcome.deleted_count, outcome.relinked_count
            );
        } else {
            warn!(
                "{} on {} stopped short: deleted {}, relinked {}, {} records failed",
                operation,
                locale,
                outcome.deleted_count,
                outcome.relinked_count,
                outcome.failures.len()
            );
        }
        Ok(outcome)
    }

    /// Copy one stale variant's content under its source's link.
    async fn relink_one(
        &self,
        record_id: &str,
        sources: &[Record],
        variants: &[Record],
        locale: &LocaleCode,
    ) -> Result<(), CorrectiveError> {
        let variant = variants
            .iter()
            .find(|v| v.record_id == record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;
        let source = sources
            .iter()
            .find(|s| s.base_id == variant.base_id)
            .ok_or_else(|| LinkError::MissingSource(variant.base_id.clone()))?;

        let link_id = self.linker.ensure_link(source).await?;
        self.linker
            .attach_variant(&variant.base_id, &link_id, locale, variant.content.clone())
            .await?;
        Ok(())
    }
}

fn is_orphan(variant: &Record, source_links: &HashSet<&str>) -> bool {
    match variant.link_id.as_deref() {
        Some(link_id) => !source_links.contains(link_id),
        None => true,
    }
}

fn duplicate_groups(locale: &LocaleCode, variants: &[Record]) -> Vec<DuplicateGroup> {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for variant in variants {
        groups
            .entry(variant.base_id.as_str())
            .or_default()
            .push(variant.record_id.clone());
    }

    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(base_id, mut record_ids)| {
            record_ids.sort();
            DuplicateGroup {
                base_id: base_id.to_string(),
                locale: locale.to_string(),
                record_ids,
            }
        })
        .collect()
}

/// Single variants that do not share their source's link.
///
/// Duplicates and duplicate sources are left alone: they need a human to pick.
fn relink_candidates(sources: &[Record], locale: &LocaleCode, variants: &[Record]) -> Vec<String> {
    planner::plan(sources, std::slice::from_ref(locale), variants)
        .conflicts
        .into_iter()
        .filter_map(|conflict| match conflict {
            Conflict::Unlinked { record_id, .. } => Some(record_id),
            _ => None,
        })
        .collect()
}
