//! Sync planner: diffs source records against existing variants.
//!
//! Planning is a pure function of store state, so every run re-derives the
//! remaining work and a crashed or aborted run resumes without redoing
//! anything that already landed.

use crate::locale::LocaleCode;
use crate::model::{Record, TranslationJob};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// A state the planner refuses to guess its way out of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Conflict {
    /// Several variants exist for the same `(baseId, locale)`
    #[serde(rename_all = "camelCase")]
    Duplicate {
        base_id: String,
        locale: String,
        record_ids: Vec<String>,
    },
    /// One variant exists but does not share the source's link
    #[serde(rename_all = "camelCase")]
    Unlinked {
        base_id: String,
        locale: String,
        record_id: String,
    },
    /// Several source records claim the same business key
    #[serde(rename_all = "camelCase")]
    DuplicateSource {
        base_id: String,
        record_ids: Vec<String>,
    },
}

impl Conflict {
    pub fn base_id(&self) -> &str {
        match self {
            Conflict::Duplicate { base_id, .. }
            | Conflict::Unlinked { base_id, .. }
            | Conflict::DuplicateSource { base_id, .. } => base_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub jobs: Vec<TranslationJob>,
    /// Pairs with a linked, fully translated variant already in place
    pub already_translated: usize,
    pub conflicts: Vec<Conflict>,
}

impl Plan {
    pub fn estimated_chars(&self) -> u64 {
        self.jobs.iter().map(|j| j.estimated_chars).sum()
    }
}

/// Compute the jobs needed to bring every target locale up to date.
///
/// Output is ordered by `base_id`, then by the order of `targets`.
pub fn plan(sources: &[Record], targets: &[LocaleCode], existing: &[Record]) -> Plan {
    let mut by_base: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
    for source in sources {
        by_base.entry(source.base_id.as_str()).or_default().push(source);
    }

    let mut variants: HashMap<(&str, LocaleCode), Vec<&Record>> = HashMap::new();
    for variant in existing {
        if let Some(locale) = variant.locale_code() {
            variants
                .entry((variant.base_id.as_str(), locale))
                .or_default()
                .push(variant);
        }
    }

    let mut unique_targets: Vec<&LocaleCode> = Vec::with_capacity(targets.len());
    for target in targets {
        if !unique_targets.contains(&target) {
            unique_targets.push(target);
        }
    }

    let mut plan = Plan::default();

    for (base_id, group) in by_base {
        let source = match group.as_slice() {
            [source] => *source,
            many => {
                plan.conflicts.push(Conflict::DuplicateSource {
                    base_id: base_id.to_string(),
                    record_ids: sorted_ids(many),
                });
                continue;
            }
        };

        for target in &unique_targets {
            if source.is_in(target) {
                continue;
            }

            let found = variants
                .get(&(base_id, LocaleCode::clone(target)))
                .map(Vec::as_slice)
                .unwrap_or_default();

            match found {
                [] => plan.jobs.push(job(source, target)),
                [variant] if source.shares_link_with(variant) => {
                    if variant.content.mirrors(&source.content) {
                        plan.already_translated += 1;
                    } else {
                        plan.jobs.push(job(source, target));
                    }
                }
                [variant] => plan.conflicts.push(Conflict::Unlinked {
                    base_id: base_id.to_string(),
                    locale: target.to_string(),
                    record_id: variant.record_id.clone(),
                }),
                many => plan.conflicts.push(Conflict::Duplicate {
                    base_id: base_id.to_string(),
                    locale: target.to_string(),
                    record_ids: sorted_ids(many),
                }),
            }
        }
    }

    plan
}

fn job(source: &Record, target: &LocaleCode) -> TranslationJob {
    TranslationJob {
        base_id: source.base_id.clone(),
        target_locale: target.clone(),
        estimated_chars: source.content.billable_chars(),
    }
}

fn sorted_ids(records: &[&Record]) -> Vec<String> {
    let mut ids: Vec<String> = records.iter().map(|r| r.record_id.clone()).collect();
    ids.sort();
    ids
}
