//! Translation provider client.
//!
//! - `deepl`: HTTP client for a DeepL v2 compatible API
//! - `mock`: deterministic in-process provider with a simulated quota

mod deepl;
mod mock;

pub use deepl::DeepLProvider;
pub use mock::{MockMode, MockProvider};

use crate::error::ProviderError;
use crate::locale::LocaleCode;
use crate::model::{QuestionContent, QuotaState};
use async_trait::async_trait;

/// Machine translation backend with quota reporting.
///
/// Every successful translate call consumes provider quota; calls rejected
/// before the provider accepts them consume none.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate texts into `target`.
    ///
    /// # Guarantees
    /// - Output order matches input order
    /// - Output length equals input length
    async fn translate_batch(
        &self,
        texts: &[String],
        source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<Vec<String>, ProviderError>;

    /// Current character usage for the credential. Shared with every other
    /// consumer of the same key, so callers must not cache it.
    async fn usage(&self) -> Result<QuotaState, ProviderError>;

    /// Name used in logs
    fn provider_name(&self) -> &str;

    /// Translate a single text
    async fn translate(
        &self,
        text: &str,
        source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<String, ProviderError> {
        let mut translated = self
            .translate_batch(&[text.to_string()], source, target)
            .await?;
        translated
            .pop()
            .ok_or_else(|| ProviderError::Malformed("empty translation batch".to_string()))
    }
}

/// Translate every non-empty field of a question in one provider call.
///
/// Blank segments are passed through untouched so they are neither billed nor
/// replaced by provider noise.
pub async fn translate_content<P>(
    provider: &P,
    content: &QuestionContent,
    source: &LocaleCode,
    target: &LocaleCode,
) -> Result<QuestionContent, ProviderError>
where
    P: TranslationProvider + ?Sized,
{
    let segments = content.segments();
    let pending: Vec<(usize, String)> = segments
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| (i, text.clone()))
        .collect();

    let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
    let translated = if texts.is_empty() {
        Vec::new()
    } else {
        provider.translate_batch(&texts, source, target).await?
    };

    if translated.len() != pending.len() {
        return Err(ProviderError::Malformed(format!(
            "expected {} translations, got {}",
            pending.len(),
            translated.len()
        )));
    }

    let mut merged = segments;
    for ((index, _), text) in pending.into_iter().zip(translated) {
        merged[index] = text;
    }

    content
        .with_segments(merged)
        .ok_or_else(|| ProviderError::Malformed("segment count changed".to_string()))
}
