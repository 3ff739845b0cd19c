//! Deterministic in-process provider for tests and dry runs.
//!
//! Tracks billed characters against a configurable limit so quota behaviour can
//! be exercised without network access.

use super::TranslationProvider;
use crate::error::ProviderError;
use crate::locale::LocaleCode;
use crate::model::QuotaState;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// How the mock produces translations.
#[derive(Debug, Clone)]
pub enum MockMode {
    /// Append the target locale: "hello" → "hello_fr"
    Suffix,

    /// Predefined `(text, target_locale)` → translation; unknown texts get the suffix
    Mappings(HashMap<(String, String), String>),

    /// Every translate call fails with this error
    Fail(ProviderError),
}

/// Mock provider with a simulated, externally shared character budget.
#[derive(Debug)]
pub struct MockProvider {
    mode: MockMode,
    characters_used: AtomicU64,
    character_limit: AtomicU64,
    translate_calls: AtomicUsize,
    usage_calls: AtomicUsize,
    scripted_failures: Mutex<VecDeque<ProviderError>>,
}

impl MockProvider {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            characters_used: AtomicU64::new(0),
            character_limit: AtomicU64::new(500_000),
            translate_calls: AtomicUsize::new(0),
            usage_calls: AtomicUsize::new(0),
            scripted_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Start from a given usage snapshot
    pub fn with_quota(self, characters_used: u64, character_limit: u64) -> Self {
        self.characters_used.store(characters_used, Ordering::SeqCst);
        self.character_limit.store(character_limit, Ordering::SeqCst);
        self
    }

    /// Queue errors returned by the next translate calls, in order
    pub fn fail_next(&self, errors: impl IntoIterator<Item = ProviderError>) {
        if let Ok(mut queue) = self.scripted_failures.lock() {
            queue.extend(errors);
        }
    }

    /// Simulate another consumer of the same credential
    pub fn consume_externally(&self, characters: u64) {
        self.characters_used.fetch_add(characters, Ordering::SeqCst);
    }

    pub fn characters_used(&self) -> u64 {
        self.characters_used.load(Ordering::SeqCst)
    }

    /// Number of translate calls that reached the provider (including failures)
    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }

    pub fn usage_calls(&self) -> usize {
        self.usage_calls.load(Ordering::SeqCst)
    }

    fn render(&self, text: &str, target: &LocaleCode) -> String {
        match &self.mode {
            MockMode::Mappings(map) => map
                .get(&(text.to_string(), target.to_string()))
                .cloned()
                .unwrap_or_else(|| format!("{}_{}", text, target)),
            _ => format!("{}_{}", text, target),
        }
    }
}

#[async_trait]
impl TranslationProvider for MockProvider {
    async fn translate_batch(
        &self,
        texts: &[String],
        _source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<Vec<String>, ProviderError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .scripted_failures
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        if let MockMode::Fail(error) = &self.mode {
            return Err(error.clone());
        }

        let billed: u64 = texts.iter().map(|t| t.chars().count() as u64).sum();
        let used = self.characters_used.load(Ordering::SeqCst);
        if used + billed > self.character_limit.load(Ordering::SeqCst) {
            return Err(ProviderError::QuotaExceeded);
        }
        self.characters_used.fetch_add(billed, Ordering::SeqCst);

        Ok(texts.iter().map(|t| self.render(t, target)).collect())
    }

    async fn usage(&self) -> Result<QuotaState, ProviderError> {
        self.usage_calls.fetch_add(1, Ordering::SeqCst);
        Ok(QuotaState {
            characters_used: self.characters_used.load(Ordering::SeqCst),
            character_limit: self.character_limit.load(Ordering::SeqCst),
        })
    }

    fn provider_name(&self) -> &str {
        "Mock Provider"
    }
}
