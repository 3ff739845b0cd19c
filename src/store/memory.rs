//! In-process document store.
//!
//! Behaves like the REST store (pagination, link checks, idempotent locale
//! registration) and supports write-failure injection for tests.

use super::DocumentStore;
use crate::error::StoreError;
use crate::locale::LocaleCode;
use crate::model::{NewVariant, Page, Pagination, QuestionContent, Record};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    records: Vec<Record>,
    locales: BTreeSet<String>,
    next_id: u64,
    failing_writes: usize,
    /// Ordinals of upcoming write attempts that fail, counted from 1
    failing_attempts: BTreeSet<usize>,
    write_attempts: usize,
    writes: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn take_injected_failure(&mut self) -> Result<(), StoreError> {
        self.write_attempts += 1;
        let fails = if self.failing_attempts.remove(&self.write_attempts) {
            true
        } else if self.failing_writes > 0 {
            self.failing_writes -= 1;
            true
        } else {
            false
        };
        if fails {
            return Err(StoreError::Status {
                status: 500,
                body: "injected write failure".to_string(),
            });
        }
        self.writes += 1;
        Ok(())
    }
}

/// Document store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a record as-is (no link checks). Its locale is registered.
    pub fn insert(&self, record: Record) {
        let mut state = self.state();
        state.locales.insert(record.locale.clone());
        state.records.push(record);
    }

    /// Make the next `count` writes (create/update/delete/link) fail with HTTP 500
    pub fn fail_next_writes(&self, count: usize) {
        self.state().failing_writes = count;
    }

    /// Make only the `nth` write from now fail (1 = the next write)
    pub fn fail_nth_write(&self, nth: usize) {
        let mut state = self.state();
        let attempt = state.write_attempts + nth.max(1);
        state.failing_attempts.insert(attempt);
    }

    /// Snapshot of every record
    pub fn records(&self) -> Vec<Record> {
        self.state().records.clone()
    }

    pub fn records_in(&self, locale: &str) -> Vec<Record> {
        self.state()
            .records
            .iter()
            .filter(|r| r.locale == locale)
            .cloned()
            .collect()
    }

    pub fn locales(&self) -> Vec<String> {
        self.state().locales.iter().cloned().collect()
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.state().writes
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn list_records(
        &self,
        locale: &LocaleCode,
        pagination: Pagination,
    ) -> Result<Page, StoreError> {
        let state = self.state();
        let matching: Vec<&Record> = state
            .records
            .iter()
            .filter(|r| r.is_in(locale))
            .collect();

        let page_size = pagination.page_size.max(1) as usize;
        let total = matching.len();
        let page_count = total.div_ceil(page_size) as u32;
        let start = (pagination.page.saturating_sub(1) as usize) * page_size;

        Ok(Page {
            records: matching
                .into_iter()
                .skip(start)
                .take(page_size)
                .cloned()
                .collect(),
            page: pagination.page,
            page_count,
            total: total as u64,
        })
    }

    async fn get_record(
        &self,
        base_id: &str,
        locale: &LocaleCode,
    ) -> Result<Option<Record>, StoreError> {
        Ok(self
            .state()
            .records
            .iter()
            .find(|r| r.base_id == base_id && r.is_in(locale))
            .cloned())
    }

    async fn list_linked(&self, link_id: &str) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .state()
            .records
            .iter()
            .filter(|r| r.link_id.as_deref() == Some(link_id))
            .cloned()
            .collect())
    }

    async fn link_record(&self, record_id: &str) -> Result<String, StoreError> {
        let mut state = self.state();
        let position = state
            .records
            .iter()
            .position(|r| r.record_id == record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;

        if let Some(link_id) = state.records[position].link_id.clone() {
            return Ok(link_id);
        }

        state.take_injected_failure()?;
        let link_id = state.next_id("link");
        state.records[position].link_id = Some(link_id.clone());
        Ok(link_id)
    }

    async fn create_variant(&self, variant: NewVariant) -> Result<Record, StoreError> {
        let mut state = self.state();
        if !state
            .records
            .iter()
            .any(|r| r.link_id.as_deref() == Some(variant.link_id.as_str()))
        {
            return Err(StoreError::NotFound(format!("link {}", variant.link_id)));
        }

        state.take_injected_failure()?;
        let record = Record {
            record_id: state.next_id("rec"),
            base_id: variant.base_id,
            locale: variant.locale,
            link_id: Some(variant.link_id),
            content: variant.content,
            published: false,
        };
        state.locales.insert(record.locale.clone());
        state.records.push(record.clone());
        Ok(record)
    }

    async fn update_variant(
        &self,
        record_id: &str,
        content: &QuestionContent,
    ) -> Result<Record, StoreError> {
        let mut state = self.state();
        let position = state
            .records
            .iter()
            .position(|r| r.record_id == record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;

        state.take_injected_failure()?;
        state.records[position].content = content.clone();
        Ok(state.records[position].clone())
    }

    async fn delete_record(&self, record_id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let position = state
            .records
            .iter()
            .position(|r| r.record_id == record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;

        state.take_injected_failure()?;
        state.records.remove(position);
        Ok(())
    }

    async fn ensure_locale_exists(&self, locale: &LocaleCode) -> Result<(), StoreError> {
        self.state().locales.insert(locale.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn en() -> LocaleCode {
        LocaleCode::parse("en").unwrap()
    }

    fn source(base_id: &str) -> Record {
        Record {
            record_id: format!("src-{}", base_id),
            base_id: base_id.to_string(),
            locale: "en".to_string(),
            link_id: None,
            content: QuestionContent {
                prompt: "Prompt".into(),
                choices: vec!["A".into()],
                ..Default::default()
            },
            published: true,
        }
    }

    #[tokio::test]
    async fn test_link_record_is_idempotent() {
        let store = InMemoryStore::new();
        store.insert(source("Q1"));

        let first = store.link_record("src-Q1").await.unwrap();
        let second = store.link_record("src-Q1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_create_variant_requires_existing_link() {
        let store = InMemoryStore::new();
        let err = store
            .create_variant(NewVariant {
                link_id: "nope".into(),
                locale: "fr".into(),
                base_id: "Q1".into(),
                content: QuestionContent::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = InMemoryStore::new();
        store.insert(source("Q1"));
        store.fail_next_writes(1);

        assert!(store.link_record("src-Q1").await.is_err());
        assert!(store.link_record("src-Q1").await.is_ok());
    }

    #[tokio::test]
    async fn test_nth_write_failure() {
        let store = InMemoryStore::new();
        for base_id in ["Q1", "Q2", "Q3"] {
            store.insert(source(base_id));
        }
        store.fail_nth_write(2);

        assert!(store.delete_record("src-Q1").await.is_ok());
        assert!(store.delete_record("src-Q2").await.is_err());
        assert!(store.delete_record("src-Q3").await.is_ok());
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_pagination_accounting() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.insert(source(&format!("Q{}", i)));
        }

        let page = store
            .list_records(&en(), Pagination { page: 2, page_size: 2 })
            .await
            .unwrap();
        assert_eq!(page.page_count, 3);
        assert_eq!(page.total, 5);
        assert_eq!(page.records[0].base_id, "Q2");
        assert!(!page.is_last());
    }

    #[tokio::test]
    async fn test_ensure_locale_exists_is_idempotent() {
        let store = InMemoryStore::new();
        let pt = LocaleCode::parse("pt").unwrap();
        store.ensure_locale_exists(&pt).await.unwrap();
        store.ensure_locale_exists(&pt).await.unwrap();
        assert_eq!(store.locales(), vec!["pt"]);
    }
}
