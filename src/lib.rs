//! Translation and locale-linking pipeline for quiz questions.
//!
//! Source-locale records are machine translated into target locales, written
//! back as locale variants linked to their source, and audited for
//! duplicates, orphans and count drift.

pub mod auditor;
pub mod config;
pub mod error;
pub mod linker;
pub mod locale;
pub mod model;
pub mod planner;
pub mod provider;
pub mod quota;
pub mod report;
pub mod retry;
pub mod runner;
pub mod security;
pub mod store;
