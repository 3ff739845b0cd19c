use crate::locale::{parse_locale_list, LocaleCode};
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Document store
    pub store_api_url: String,
    pub store_api_token: String,
    pub store_collection: String,
    pub store_page_size: u32,

    // Translation provider
    pub translate_api_url: String,
    pub translate_api_key: String,
    pub provider_timeout: Duration,

    // Locales
    pub source_locale: LocaleCode,
    pub target_locales: Vec<LocaleCode>,

    // Pipeline tuning
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_concurrency: usize,
    pub max_attempts: u32,
    pub quota_reserve_chars: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source_locale = std::env::var("SOURCE_LOCALE").unwrap_or_else(|_| "en".to_string());
        let source_locale = LocaleCode::parse(&source_locale).context("SOURCE_LOCALE is invalid")?;

        let target_locales = match std::env::var("TARGET_LOCALES") {
            Ok(raw) => parse_locale_list(&raw).context("TARGET_LOCALES is invalid")?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            // Document store
            store_api_url: std::env::var("STORE_API_URL").context("STORE_API_URL not set")?,
            store_api_token: std::env::var("STORE_API_TOKEN")
                .context("STORE_API_TOKEN not set")?,
            store_collection: std::env::var("STORE_COLLECTION")
                .unwrap_or_else(|_| "questions".to_string()),
            store_page_size: positive_var("STORE_PAGE_SIZE", 100),

            // Translation provider
            translate_api_url: std::env::var("TRANSLATE_API_URL")
                .unwrap_or_else(|_| "https://api-free.deepl.com".to_string()),
            translate_api_key: std::env::var("TRANSLATE_API_KEY")
                .context("TRANSLATE_API_KEY not set")?,
            provider_timeout: Duration::from_secs(positive_var("PROVIDER_TIMEOUT_SECS", 30)),

            source_locale,
            target_locales,

            // Pipeline tuning
            batch_size: positive_var("SYNC_BATCH_SIZE", 10),
            batch_pause: Duration::from_millis(
                std::env::var("SYNC_BATCH_PAUSE_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            max_concurrency: positive_var("SYNC_MAX_CONCURRENCY", 4),
            max_attempts: positive_var("SYNC_MAX_ATTEMPTS", 3),
            quota_reserve_chars: std::env::var("QUOTA_RESERVE_CHARS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }
}

/// Numeric setting that must be at least 1. Unparseable values use the default.
fn positive_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let value = std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default);
    if value < T::from(1) {
        T::from(1)
    } else {
        value
    }
}
