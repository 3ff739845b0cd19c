//! Locale codes: validated, normalised representation.
//!
//! Locales reach the pipeline from the environment, the operator CLI and the
//! document store. They are normalised once (`pt_br` → `pt-BR`) so that
//! comparisons against stored records are plain string equality.

use crate::error::LocaleError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

static LOCALE_REGEX: OnceLock<Regex> = OnceLock::new();

fn locale_regex() -> &'static Regex {
    LOCALE_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{2,3}([-_][A-Za-z0-9]{2,8})*$").expect("locale regex is valid")
    })
}

/// A validated BCP 47-style locale code (e.g. "en", "pt-BR", "zh-Hans").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocaleCode(String);

impl LocaleCode {
    /// Parse and normalise a locale code.
    ///
    /// The language subtag is lowercased, two-letter regions are uppercased and
    /// four-letter scripts are title-cased. Underscores become hyphens.
    ///
    /// # Example
    /// ```
    /// use quiz_locale_sync::locale::LocaleCode;
    ///
    /// let locale = LocaleCode::parse("pt_br").unwrap();
    /// assert_eq!(locale.as_str(), "pt-BR");
    /// ```
    pub fn parse(code: &str) -> Result<Self, LocaleError> {
        let trimmed = code.trim();
        if !locale_regex().is_match(trimmed) {
            return Err(LocaleError(code.to_string()));
        }

        let normalized = trimmed
            .split(['-', '_'])
            .enumerate()
            .map(|(i, part)| match (i, part.len()) {
                (0, _) => part.to_ascii_lowercase(),
                (_, 2) => part.to_ascii_uppercase(),
                (_, 4) => {
                    let lower = part.to_ascii_lowercase();
                    let mut chars = lower.chars();
                    match chars.next() {
                        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                        None => lower,
                    }
                }
                _ => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join("-");

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The language subtag only ("pt" for "pt-BR").
    pub fn language(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// Code sent as the provider's `target_lang` ("PT-BR").
    pub fn provider_target_code(&self) -> String {
        self.0.to_ascii_uppercase()
    }

    /// Code sent as the provider's `source_lang`. Source languages carry no region.
    pub fn provider_source_code(&self) -> String {
        self.language().to_ascii_uppercase()
    }
}

impl fmt::Display for LocaleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LocaleCode {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LocaleCode {
    type Error = LocaleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LocaleCode> for String {
    fn from(locale: LocaleCode) -> Self {
        locale.0
    }
}

impl PartialEq<str> for LocaleCode {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Parse a comma-separated locale list, dropping blanks and duplicates.
pub fn parse_locale_list(list: &str) -> Result<Vec<LocaleCode>, LocaleError> {
    let mut locales: Vec<LocaleCode> = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let locale = LocaleCode::parse(part)?;
        if !locales.contains(&locale) {
            locales.push(locale);
        }
    }
    Ok(locales)
}
