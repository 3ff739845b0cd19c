//! Records, jobs and quota snapshots shared by every pipeline component.

use crate::locale::LocaleCode;
use serde::{Deserialize, Deserializer, Serialize};

/// Structured body of a quiz question.
///
/// `prompt`, `topic`, `explanation` and `choices` are translated;
/// `answer_index` and `level` are copied verbatim into every variant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionContent {
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub answer_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub level: String,
}

impl QuestionContent {
    /// Texts to send to the provider, in a fixed order:
    /// prompt, topic, explanation (when present), then each choice.
    pub fn segments(&self) -> Vec<String> {
        let mut segments = Vec::with_capacity(self.choices.len() + 3);
        segments.push(self.prompt.clone());
        segments.push(self.topic.clone());
        if let Some(explanation) = &self.explanation {
            segments.push(explanation.clone());
        }
        segments.extend(self.choices.iter().cloned());
        segments
    }

    /// Rebuild content from translated segments produced in `segments()` order.
    ///
    /// Returns `None` when the segment count does not match this content.
    pub fn with_segments(&self, segments: Vec<String>) -> Option<QuestionContent> {
        if segments.len() != self.segments_len() {
            return None;
        }

        let mut iter = segments.into_iter();
        let prompt = iter.next()?;
        let topic = iter.next()?;
        let explanation = match self.explanation {
            Some(_) => Some(iter.next()?),
            None => None,
        };
        let choices: Vec<String> = iter.collect();

        Some(QuestionContent {
            prompt,
            choices,
            answer_index: self.answer_index,
            explanation,
            topic,
            level: self.level.clone(),
        })
    }

    fn segments_len(&self) -> usize {
        2 + usize::from(self.explanation.is_some()) + self.choices.len()
    }

    /// Characters the provider will bill for translating this content.
    pub fn billable_chars(&self) -> u64 {
        self.segments()
            .iter()
            .map(|s| s.chars().count() as u64)
            .sum()
    }

    /// True when no segment carries any text.
    pub fn is_empty(&self) -> bool {
        self.segments().iter().all(|s| s.trim().is_empty())
    }

    /// True when this content has the same segment layout as `source` and
    /// every segment with text in `source` has text here too.
    ///
    /// A linked variant that does not mirror its source is refilled. Segments
    /// left blank in the source are never sent, so they stay blank here.
    pub fn mirrors(&self, source: &QuestionContent) -> bool {
        let ours = self.segments();
        let theirs = source.segments();
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(&theirs)
                .all(|(ours, theirs)| theirs.trim().is_empty() || !ours.trim().is_empty())
    }
}

/// A question record as stored in the document store.
///
/// Records in the canonical locale are source records; records in any other
/// locale are locale variants. Both carry the author-assigned `base_id`, and
/// `link_id` is the store-level token that groups a source with its variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub record_id: String,
    pub base_id: String,
    #[serde(deserialize_with = "normalized_locale")]
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    pub content: QuestionContent,
    #[serde(default)]
    pub published: bool,
}

/// Valid codes are stored normalised (`pt-br` becomes `pt-BR`); anything
/// else is kept verbatim so the auditor can still report it.
fn normalized_locale<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(LocaleCode::parse(&raw).map(String::from).unwrap_or(raw))
}

impl Record {
    /// The record's locale, normalised. `None` when the store holds an invalid code.
    pub fn locale_code(&self) -> Option<LocaleCode> {
        LocaleCode::parse(&self.locale).ok()
    }

    pub fn is_in(&self, locale: &LocaleCode) -> bool {
        self.locale_code().as_ref() == Some(locale)
    }

    /// True when both records carry the same, non-empty link.
    pub fn shares_link_with(&self, other: &Record) -> bool {
        matches!((&self.link_id, &other.link_id), (Some(a), Some(b)) if a == b)
    }
}

/// Payload for creating a variant under an existing link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVariant {
    pub link_id: String,
    pub locale: String,
    pub base_id: String,
    pub content: QuestionContent,
}

/// One `(base_id, target_locale)` pair awaiting translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationJob {
    pub base_id: String,
    pub target_locale: LocaleCode,
    /// Characters the job will consume, fixed at planning time
    pub estimated_chars: u64,
}

/// Provider usage snapshot. Always fetched fresh; never tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub characters_used: u64,
    pub character_limit: u64,
}

impl QuotaState {
    pub fn remaining(&self) -> u64 {
        self.character_limit.saturating_sub(self.characters_used)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn first(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }
}

/// One page of records plus the store's page accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<Record>,
    pub page: u32,
    pub page_count: u32,
    pub total: u64,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.page >= self.page_count || self.records.is_empty()
    }
}
