//! Document linker: owns the relationship between a source record and its
//! locale variants.
//!
//! The link is created before any translation is attempted, so a crash
//! between translate and write-back never leaves a variant that cannot be
//! attached to its source.

use crate::error::LinkError;
use crate::locale::LocaleCode;
use crate::model::{NewVariant, QuestionContent, Record};
use crate::store::DocumentStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of `verify_link` for one business key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub base_id: String,
    pub link_id: Option<String>,
    pub linked: bool,
    /// Every non-source record grouped under the source's link
    pub variants: Vec<Record>,
}

pub struct DocumentLinker<S: ?Sized> {
    store: Arc<S>,
}

impl<S> DocumentLinker<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Return the source's link id, establishing one if it has none.
    pub async fn ensure_link(&self, source: &Record) -> Result<String, LinkError> {
        if let Some(link_id) = &source.link_id {
            return Ok(link_id.clone());
        }

        let link_id = self.store.link_record(&source.record_id).await?;
        info!("Linked source {} as {}", source.base_id, link_id);
        Ok(link_id)
    }

    /// Upsert the variant for `(link_id, locale)`.
    ///
    /// Updates the existing variant in place, creates one when none exists,
    /// and refuses to pick when several already share the link.
    pub async fn attach_variant(
        &self,
        base_id: &str,
        link_id: &str,
        locale: &LocaleCode,
        content: QuestionContent,
    ) -> Result<Record, LinkError> {
        let existing: Vec<Record> = self
            .store
            .list_linked(link_id)
            .await?
            .into_iter()
            .filter(|r| r.is_in(locale))
            .collect();

        match existing.as_slice() {
            [] => {
                debug!("Creating {} variant for {}", locale, base_id);
                let created = self
                    .store
                    .create_variant(NewVariant {
                        link_id: link_id.to_string(),
                        locale: locale.to_string(),
                        base_id: base_id.to_string(),
                        content,
                    })
                    .await?;
                Ok(created)
            }
            [variant] => {
                debug!(
                    "Replacing {} variant {} for {}",
                    locale, variant.record_id, base_id
                );
                Ok(self
                    .store
                    .update_variant(&variant.record_id, &content)
                    .await?)
            }
            many => Err(LinkError::Conflict {
                link_id: link_id.to_string(),
                locale: locale.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Inspect the link of one business key without changing anything.
    pub async fn verify_link(
        &self,
        base_id: &str,
        source_locale: &LocaleCode,
    ) -> Result<LinkStatus, LinkError> {
        let source = self
            .store
            .get_record(base_id, source_locale)
            .await?
            .ok_or_else(|| LinkError::MissingSource(base_id.to_string()))?;

        let Some(link_id) = source.link_id.clone() else {
            return Ok(LinkStatus {
                base_id: base_id.to_string(),
                link_id: None,
                linked: false,
                variants: Vec::new(),
            });
        };

        let variants = self
            .store
            .list_linked(&link_id)
            .await?
            .into_iter()
            .filter(|r| r.record_id != source.record_id)
            .collect();

        Ok(LinkStatus {
            base_id: base_id.to_string(),
            link_id: Some(link_id),
            linked: true,
            variants,
        })
    }
}
