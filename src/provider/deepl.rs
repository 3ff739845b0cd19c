//! DeepL v2 compatible HTTP client.
//!
//! The client performs exactly one HTTP exchange per call and classifies the
//! outcome; retrying is the caller's decision (see `runner` and `quota`).

use super::TranslationProvider;
use crate::config::Config;
use crate::error::ProviderError;
use crate::locale::LocaleCode;
use crate::model::QuotaState;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// DeepL accepts at most 50 texts per translate request
const MAX_TEXTS_PER_REQUEST: usize = 50;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a [String],
    target_lang: String,
    source_lang: String,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    character_count: u64,
    character_limit: u64,
}

/// Translation provider backed by the DeepL REST API.
#[derive(Debug, Clone)]
pub struct DeepLProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl DeepLProvider {
    /// Create a client whose every request is bounded by `timeout`.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(
            config.translate_api_url.clone(),
            config.translate_api_key.clone(),
            config.provider_timeout,
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("DeepL-Auth-Key {}", self.api_key)
    }

    async fn translate_chunk(
        &self,
        texts: &[String],
        source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<Vec<String>, ProviderError> {
        let request = TranslateRequest {
            text: texts,
            target_lang: target.provider_target_code(),
            source_lang: source.provider_source_code(),
        };

        let response = self
            .client
            .post(self.endpoint("v2/translate"))
            .header("Authorization", self.auth_header())
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: TranslateResponse = response.json().await?;
        if body.translations.len() != texts.len() {
            return Err(ProviderError::Malformed(format!(
                "sent {} texts, received {} translations",
                texts.len(),
                body.translations.len()
            )));
        }

        Ok(body.translations.into_iter().map(|t| t.text).collect())
    }
}

/// Turn a non-success response into the matching `ProviderError`
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));

    Err(ProviderError::from_status(status.as_u16(), body, retry_after))
}

#[async_trait]
impl TranslationProvider for DeepLProvider {
    async fn translate_batch(
        &self,
        texts: &[String],
        source: &LocaleCode,
        target: &LocaleCode,
    ) -> Result<Vec<String>, ProviderError> {
        let mut translated = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_TEXTS_PER_REQUEST) {
            debug!("Translating {} texts to {}", chunk.len(), target);
            translated.extend(self.translate_chunk(chunk, source, target).await?);
        }
        Ok(translated)
    }

    async fn usage(&self) -> Result<QuotaState, ProviderError> {
        let response = self
            .client
            .get(self.endpoint("v2/usage"))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let response = check_status(response).await?;
        let usage: UsageResponse = response.json().await?;

        Ok(QuotaState {
            characters_used: usage.character_count,
            character_limit: usage.character_limit,
        })
    }

    fn provider_name(&self) -> &str {
        "DeepL"
    }
}
