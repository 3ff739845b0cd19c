use super::DocumentStore;
use crate::config::Config;
use crate::error::StoreError;
use crate::locale::LocaleCode;
use crate::model::{NewVariant, Page, Pagination, QuestionContent, Record};
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    data: Vec<Record>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    page: u32,
    page_count: u32,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkData {
    link_id: String,
}

#[derive(Debug, Serialize)]
struct WriteEnvelope<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct ContentUpdate<'a> {
    content: &'a QuestionContent,
}

#[derive(Debug, Serialize)]
struct LocaleRegistration<'a> {
    code: &'a str,
}

/// REST client for the content API.
///
/// Reads are retried on transient failures; writes are sent once and the
/// runner decides whether the job is retried.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    collection: String,
    read_retry: RetryConfig,
}

impl RestStore {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        collection: impl Into<String>,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            collection: collection.into(),
            read_retry: RetryConfig::store_read(),
        })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(
            config.store_api_url.clone(),
            config.store_api_token.clone(),
            config.store_collection.clone(),
        )
    }

    pub fn with_read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn collection_url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.api_url(&self.collection)
        } else {
            self.api_url(&format!("{}/{}", self.collection, suffix))
        }
    }

    /// GET with query parameters, retried on transient failures
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, StoreError> {
        let client = &self.client;
        let token = self.token.as_str();
        with_retry_if(
            &self.read_retry,
            &format!("GET {}", url),
            || async move {
                let response = client
                    .get(url)
                    .bearer_auth(token)
                    .query(query)
                    .send()
                    .await?;
                decode(response).await
            },
            StoreError::is_transient,
        )
        .await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<failed to read body: {}>", e));

    if status.as_u16() == 404 {
        return Err(StoreError::NotFound(url));
    }
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let response = check_status(response).await?;
    Ok(response.json::<T>().await?)
}

#[async_trait]
impl DocumentStore for RestStore {
    async fn list_records(
        &self,
        locale: &LocaleCode,
        pagination: Pagination,
    ) -> Result<Page, StoreError> {
        let envelope: ListEnvelope = self
            .get_json(
                &self.collection_url(""),
                &[
                    ("locale", locale.to_string()),
                    ("page", pagination.page.to_string()),
                    ("pageSize", pagination.page_size.to_string()),
                ],
            )
            .await?;

        let (page, page_count, total) = match envelope.meta {
            Some(meta) => (meta.page, meta.page_count, meta.total),
            None => (pagination.page, pagination.page, envelope.data.len() as u64),
        };

        Ok(Page {
            records: envelope.data,
            page,
            page_count,
            total,
        })
    }

    async fn get_record(
        &self,
        base_id: &str,
        locale: &LocaleCode,
    ) -> Result<Option<Record>, StoreError> {
        let envelope: ListEnvelope = self
            .get_json(
                &self.collection_url(""),
                &[("locale", locale.to_string()), ("baseId", base_id.to_string())],
            )
            .await?;
        Ok(envelope.data.into_iter().next())
    }

    async fn list_linked(&self, link_id: &str) -> Result<Vec<Record>, StoreError> {
        let envelope: DataEnvelope<Vec<Record>> = self
            .get_json(&self.collection_url(&format!("links/{}", link_id)), &[])
            .await?;
        Ok(envelope.data)
    }

    async fn link_record(&self, record_id: &str) -> Result<String, StoreError> {
        debug!("Linking record {}", record_id);
        let response = self
            .client
            .post(self.collection_url(&format!("{}/link", record_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let envelope: DataEnvelope<LinkData> = decode(response).await?;
        Ok(envelope.data.link_id)
    }

    async fn create_variant(&self, variant: NewVariant) -> Result<Record, StoreError> {
        debug!(
            "Creating {} variant of {} under link {}",
            variant.locale, variant.base_id, variant.link_id
        );
        let response = self
            .client
            .post(self.collection_url("localizations"))
            .bearer_auth(&self.token)
            .json(&WriteEnvelope { data: variant })
            .send()
            .await?;
        let envelope: DataEnvelope<Record> = decode(response).await?;
        Ok(envelope.data)
    }

    async fn update_variant(
        &self,
        record_id: &str,
        content: &QuestionContent,
    ) -> Result<Record, StoreError> {
        let response = self
            .client
            .put(self.collection_url(record_id))
            .bearer_auth(&self.token)
            .json(&WriteEnvelope {
                data: ContentUpdate { content },
            })
            .send()
            .await?;
        let envelope: DataEnvelope<Record> = decode(response).await?;
        Ok(envelope.data)
    }

    async fn delete_record(&self, record_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.collection_url(record_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn ensure_locale_exists(&self, locale: &LocaleCode) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.api_url("i18n/locales"))
            .bearer_auth(&self.token)
            .json(&LocaleRegistration {
                code: locale.as_str(),
            })
            .send()
            .await?;

        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(StoreError::Status { status, body })
                if (status == 400 || status == 409)
                    && body.to_lowercase().contains("already exists") =>
            {
                debug!("Locale {} already registered", locale);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
