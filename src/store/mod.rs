//! Document store interface consumed by the pipeline.
//!
//! - `rest`: HTTP client for the content API
//! - `memory`: in-process store used by tests and local dry runs

mod memory;
mod rest;

pub use memory::InMemoryStore;
pub use rest::RestStore;

use crate::error::StoreError;
use crate::locale::LocaleCode;
use crate::model::{NewVariant, Page, Pagination, QuestionContent, Record};
use async_trait::async_trait;
use tracing::debug;

/// Generic document API over question records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One page of records in `locale`
    async fn list_records(
        &self,
        locale: &LocaleCode,
        pagination: Pagination,
    ) -> Result<Page, StoreError>;

    /// First record with this business key in `locale`
    async fn get_record(
        &self,
        base_id: &str,
        locale: &LocaleCode,
    ) -> Result<Option<Record>, StoreError>;

    /// Every record, in any locale, grouped under `link_id`
    async fn list_linked(&self, link_id: &str) -> Result<Vec<Record>, StoreError>;

    /// Locale-linking primitive: give the record a link id (or return its existing one)
    async fn link_record(&self, record_id: &str) -> Result<String, StoreError>;

    async fn create_variant(&self, variant: NewVariant) -> Result<Record, StoreError>;

    async fn update_variant(
        &self,
        record_id: &str,
        content: &QuestionContent,
    ) -> Result<Record, StoreError>;

    async fn delete_record(&self, record_id: &str) -> Result<(), StoreError>;

    /// Register a locale. "Already exists" is success.
    async fn ensure_locale_exists(&self, locale: &LocaleCode) -> Result<(), StoreError>;
}

/// Walk every page of `locale`.
pub async fn list_all<S>(
    store: &S,
    locale: &LocaleCode,
    page_size: u32,
) -> Result<Vec<Record>, StoreError>
where
    S: DocumentStore + ?Sized,
{
    let mut records = Vec::new();
    let mut pagination = Pagination::first(page_size);

    loop {
        let page = store.list_records(locale, pagination).await?;
        let last = page.is_last();
        debug!(
            "Fetched page {}/{} of {} ({} records)",
            page.page,
            page.page_count,
            locale,
            page.records.len()
        );
        records.extend(page.records);
        if last {
            break;
        }
        pagination = pagination.next();
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize) -> Record {
        Record {
            record_id: format!("r{}", i),
            base_id: format!("Q{}", i),
            locale: "en".to_string(),
            link_id: None,
            content: QuestionContent {
                prompt: format!("Question {}", i),
                choices: vec!["a".into(), "b".into()],
                ..Default::default()
            },
            published: true,
        }
    }

    #[tokio::test]
    async fn test_list_all_walks_every_page() {
        let store = InMemoryStore::new();
        for i in 0..7 {
            store.insert(record(i));
        }

        let en = LocaleCode::parse("en").unwrap();
        let all = list_all(&store, &en, 3).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[6].base_id, "Q6");
    }

    #[tokio::test]
    async fn test_list_all_empty_locale() {
        let store = InMemoryStore::new();
        let fr = LocaleCode::parse("fr").unwrap();
        assert!(list_all(&store, &fr, 10).await.unwrap().is_empty());
    }
}
