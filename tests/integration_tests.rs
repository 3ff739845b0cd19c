//! Integration tests for the quiz locale sync pipeline
//!
//! These tests drive the runner and auditor together against the in-memory
//! store and the mock provider, plus one full run over HTTP against mocked
//! store and provider endpoints.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_test::assert_ok;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use quiz_locale_sync::{
    auditor::{AuditScope, ConsistencyAuditor, CorrectiveOperation},
    error::ProviderError,
    locale::LocaleCode,
    model::{QuestionContent, Record},
    provider::{DeepLProvider, MockMode, MockProvider},
    quota::QuotaGuard,
    report::{AbortReason, RunState, SyncReport},
    retry::RetryConfig,
    runner::{PipelineRunner, RunSettings},
    store::{InMemoryStore, RestStore},
};

// ==================== Test Helpers ====================

fn locale(code: &str) -> LocaleCode {
    LocaleCode::parse(code).expect("valid locale")
}

fn question(base_id: &str) -> QuestionContent {
    QuestionContent {
        prompt: format!("What is the answer to {}?", base_id),
        choices: vec!["Forty-two".into(), "Seven".into(), "Zero".into()],
        answer_index: 0,
        explanation: Some("It is always forty-two.".into()),
        topic: "Trivia".into(),
        level: "medium".into(),
    }
}

fn source(base_id: &str, link_id: Option<&str>) -> Record {
    Record {
        record_id: format!("src-{}", base_id),
        base_id: base_id.to_string(),
        locale: "en".to_string(),
        link_id: link_id.map(str::to_string),
        content: question(base_id),
        published: true,
    }
}

fn variant(record_id: &str, base_id: &str, locale: &str, link_id: Option<&str>) -> Record {
    Record {
        record_id: record_id.to_string(),
        base_id: base_id.to_string(),
        locale: locale.to_string(),
        link_id: link_id.map(str::to_string),
        content: question(base_id),
        published: false,
    }
}

/// Store seeded with Q1..Q3 in "en"
fn three_questions() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for base_id in ["Q1", "Q2", "Q3"] {
        store.insert(source(base_id, None));
    }
    store
}

fn fast_settings() -> RunSettings {
    RunSettings {
        batch_size: 2,
        batch_pause: Duration::ZERO,
        max_concurrency: 1,
        page_size: 2,
        job_retry: RetryConfig::new(3, Duration::from_millis(1)),
    }
}

fn runner(
    store: &Arc<InMemoryStore>,
    provider: &Arc<MockProvider>,
) -> PipelineRunner<InMemoryStore, MockProvider> {
    PipelineRunner::new(store.clone(), provider.clone(), fast_settings()).with_guard(
        QuotaGuard::new(provider.clone()).with_retry(RetryConfig::new(1, Duration::ZERO)),
    )
}

async fn sync_pt(store: &Arc<InMemoryStore>, provider: &Arc<MockProvider>) -> SyncReport {
    runner(store, provider)
        .run_sync(&locale("en"), &[locale("pt")])
        .await
}

fn assert_linked_to_source(store: &InMemoryStore, variant: &Record) {
    let source = store
        .records_in("en")
        .into_iter()
        .find(|s| s.base_id == variant.base_id)
        .expect("source exists");
    assert!(
        variant.shares_link_with(&source),
        "{} is not linked to its source",
        variant.record_id
    );
}

// ==================== End-to-End Sync Tests ====================

#[tokio::test]
async fn test_sync_three_questions_to_pt() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));

    let report = sync_pt(&store, &provider).await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.translated, 3);
    assert_eq!(report.already_translated, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped_quota, 0);

    let variants = store.records_in("pt");
    assert_eq!(variants.len(), 3);
    for variant in &variants {
        assert_linked_to_source(&store, variant);
        assert_eq!(
            variant.content.prompt,
            format!("What is the answer to {}?_pt", variant.base_id)
        );
        assert_eq!(variant.content.answer_index, 0);
        assert_eq!(variant.content.level, "medium");
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));

    let first = sync_pt(&store, &provider).await;
    assert_eq!(first.translated, 3);
    let variants_before = store.records_in("pt");
    let calls_before = provider.translate_calls();

    let second = sync_pt(&store, &provider).await;

    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.translated, 0);
    assert_eq!(second.already_translated, 3);
    assert_eq!(provider.translate_calls(), calls_before);
    assert_eq!(store.records_in("pt"), variants_before);
}

#[tokio::test]
async fn test_question_without_choices_is_translated_once() {
    let store = Arc::new(InMemoryStore::new());
    let mut open = source("Q1", None);
    open.content.choices.clear();
    open.content.explanation = None;
    store.insert(open);
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));

    let first = sync_pt(&store, &provider).await;
    assert_eq!(first.translated, 1);
    let used = provider.characters_used();
    let calls = provider.translate_calls();

    let second = sync_pt(&store, &provider).await;

    assert_eq!(second.state, RunState::Completed);
    assert_eq!(second.translated, 0);
    assert_eq!(second.already_translated, 1);
    assert_eq!(provider.translate_calls(), calls);
    assert_eq!(provider.characters_used(), used);
    assert_eq!(store.records_in("pt").len(), 1);
}

#[tokio::test]
async fn test_multiple_targets_conserve_one_variant_per_pair() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));

    let report = runner(&store, &provider)
        .run_sync(&locale("en"), &[locale("pt"), locale("fr"), locale("de")])
        .await;

    assert_eq!(report.translated, 9);
    for code in ["pt", "fr", "de"] {
        let variants = store.records_in(code);
        assert_eq!(variants.len(), 3);
        variants
            .iter()
            .for_each(|v| assert_linked_to_source(&store, v));
    }
}

// ==================== Quota Tests ====================

#[tokio::test]
async fn test_quota_safety_withholds_batch() {
    let store = three_questions();
    let per_job = question("Q1").billable_chars();
    // Less than a single batch of two jobs
    let provider = Arc::new(MockProvider::new(MockMode::Suffix).with_quota(0, per_job * 2 - 1));

    let report = sync_pt(&store, &provider).await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(provider.translate_calls(), 0);
    assert_eq!(report.skipped_quota, 3);
    assert_eq!(report.translated, 0);
    assert!(store.records_in("pt").is_empty());
}

#[tokio::test]
async fn test_quota_shared_with_other_consumers() {
    let store = three_questions();
    let per_job = question("Q1").billable_chars();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix).with_quota(0, per_job * 3));
    // Another process spends most of the budget before the run starts
    provider.consume_externally(per_job * 2);

    let report = sync_pt(&store, &provider).await;

    assert_eq!(report.skipped_quota, 3);
    assert_eq!(provider.translate_calls(), 0);
}

#[tokio::test]
async fn test_usage_unavailable_denies_spend() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/usage"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/translate"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = three_questions();
    let provider = Arc::new(
        DeepLProvider::new(mock_server.uri(), "key", Duration::from_secs(5)).expect("client"),
    );
    let report = PipelineRunner::new(store.clone(), provider.clone(), fast_settings())
        .with_guard(QuotaGuard::new(provider).with_retry(RetryConfig::new(2, Duration::ZERO)))
        .run_sync(&locale("en"), &[locale("pt")])
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.skipped_quota, 3);
}

// ==================== Failure Handling Tests ====================

#[tokio::test]
async fn test_write_failure_after_translate_is_retried_next_run() {
    let store = Arc::new(InMemoryStore::new());
    for (base_id, link) in [("Q1", "d1"), ("Q2", "d2"), ("Q3", "d3")] {
        store.insert(source(base_id, Some(link)));
    }
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));
    // Sources are already linked, so the first write is Q1's create_variant
    store.fail_next_writes(1);

    let first = sync_pt(&store, &provider).await;

    assert_eq!(first.state, RunState::Completed);
    assert_eq!(first.failed, 1);
    assert_eq!(first.translated, 2);
    assert_eq!(first.already_translated, 0);
    assert_eq!(first.errors[0].base_id, "Q1");
    assert_eq!(first.errors[0].target_locale, "pt");
    assert_eq!(store.records_in("pt").len(), 2);

    let second = sync_pt(&store, &provider).await;

    assert_eq!(second.translated, 1);
    assert_eq!(second.already_translated, 2);
    assert_eq!(store.records_in("pt").len(), 3);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));
    provider.fail_next([
        ProviderError::Transient("connection reset".into()),
        ProviderError::RateLimited {
            retry_after: Some(Duration::ZERO),
        },
    ]);

    let report = sync_pt(&store, &provider).await;

    assert_eq!(report.translated, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(provider.translate_calls(), 5);
}

#[tokio::test]
async fn test_retries_exhausted_marks_job_failed() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));
    provider.fail_next((0..3).map(|_| ProviderError::Transient("HTTP 502".into())));

    let report = sync_pt(&store, &provider).await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.failed, 1);
    assert_eq!(report.translated, 2);
    assert!(report.errors[0].reason.contains("502"));
}

#[tokio::test]
async fn test_auth_failure_aborts_run() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Fail(ProviderError::Auth {
        status: 403,
    })));

    let report = sync_pt(&store, &provider).await;

    assert!(report.is_aborted());
    assert!(matches!(
        report.abort_reason,
        Some(AbortReason::ProviderAuth { .. })
    ));
    assert_eq!(report.translated, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.not_attempted, 2);
    assert_eq!(provider.translate_calls(), 1);
    assert!(store.records_in("pt").is_empty());
}

#[tokio::test]
async fn test_cancellation_between_batches() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    assert_ok!(cancel_tx.send(true));

    let report = runner(&store, &provider)
        .with_cancellation(cancel_rx)
        .run_sync(&locale("en"), &[locale("pt")])
        .await;

    assert!(report.is_aborted());
    assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    assert_eq!(report.not_attempted, 3);
    assert_eq!(provider.translate_calls(), 0);

    // A later run picks up exactly the remaining work
    let resumed = sync_pt(&store, &provider).await;
    assert_eq!(resumed.translated, 3);
}

// ==================== Auditor Tests ====================

#[tokio::test]
async fn test_duplicate_variants_reported_as_one_group() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(source("Q1", Some("d1")));
    store.insert(variant("fr-a", "Q1", "fr", Some("d1")));
    store.insert(variant("fr-b", "Q1", "fr", Some("d1")));

    let auditor = ConsistencyAuditor::new(store.clone(), locale("en"));
    let report = assert_ok!(auditor.audit(&AuditScope::new(vec![locale("fr")])).await);

    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].record_ids, vec!["fr-a", "fr-b"]);

    // The runner never guesses between duplicates
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));
    let sync = runner(&store, &provider)
        .run_sync(&locale("en"), &[locale("fr")])
        .await;
    assert_eq!(sync.translated, 0);
    assert_eq!(sync.conflicts.len(), 1);
    assert_eq!(store.records_in("fr").len(), 2);
}

#[tokio::test]
async fn test_orphan_is_the_only_record_deleted() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(source("Q1", Some("d1")));
    store.insert(source("Q2", Some("d2")));
    store.insert(variant("fr-1", "Q1", "fr", Some("d1")));
    store.insert(variant("fr-2", "Q2", "fr", Some("d2")));
    store.insert(variant("fr-x", "Q7", "fr", Some("deleted-source")));

    let auditor = ConsistencyAuditor::new(store.clone(), locale("en"));
    let fr = locale("fr");

    let report = assert_ok!(auditor.audit(&AuditScope::new(vec![fr.clone()])).await);
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].record_id, "fr-x");

    let plan = assert_ok!(auditor.plan(CorrectiveOperation::DeleteOrphans, &fr).await);
    let outcome = assert_ok!(
        auditor
            .execute(CorrectiveOperation::DeleteOrphans, &fr, &plan.token)
            .await
    );

    assert_eq!(outcome.deleted_count, 1);
    let remaining: Vec<String> = store
        .records_in("fr")
        .into_iter()
        .map(|r| r.record_id)
        .collect();
    assert_eq!(remaining, vec!["fr-1", "fr-2"]);
    assert_eq!(store.records_in("en").len(), 2);

    let after = assert_ok!(auditor.audit(&AuditScope::new(vec![fr])).await);
    assert!(after.is_consistent());
}

#[tokio::test]
async fn test_partial_orphan_cleanup_reports_what_was_deleted() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(source("Q1", Some("d1")));
    store.insert(variant("fr-x", "Q7", "fr", Some("gone-7")));
    store.insert(variant("fr-y", "Q8", "fr", Some("gone-8")));

    let auditor = ConsistencyAuditor::new(store.clone(), locale("en"));
    let fr = locale("fr");
    let plan = assert_ok!(auditor.plan(CorrectiveOperation::DeleteOrphans, &fr).await);
    store.fail_nth_write(2);

    let outcome = assert_ok!(
        auditor
            .execute(CorrectiveOperation::DeleteOrphans, &fr, &plan.token)
            .await
    );

    assert_eq!(outcome.deleted_count, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].record_id, "fr-y");
    let remaining: Vec<String> = store
        .records_in("fr")
        .into_iter()
        .map(|r| r.record_id)
        .collect();
    assert_eq!(remaining, vec!["fr-y"]);
}

#[tokio::test]
async fn test_audit_after_sync_is_consistent() {
    let store = three_questions();
    let provider = Arc::new(MockProvider::new(MockMode::Suffix));
    sync_pt(&store, &provider).await;

    let report = assert_ok!(
        ConsistencyAuditor::new(store.clone(), locale("en"))
            .audit(&AuditScope::new(vec![locale("pt")]))
            .await
    );

    assert!(report.is_consistent());
    assert_eq!(report.scanned_variants, 3);
}

// ==================== HTTP End-to-End Tests ====================

#[tokio::test]
async fn test_sync_over_http() {
    let store_server = MockServer::start().await;
    let deepl_server = MockServer::start().await;

    let source_json = serde_json::json!({
        "recordId": "r1",
        "baseId": "Q1",
        "locale": "en",
        "linkId": "doc-1",
        "published": true,
        "content": {"prompt": "Capital of Italy?", "choices": ["Rome", "Milan"], "answerIndex": 0, "topic": "Geography", "level": "easy"}
    });

    Mock::given(method("GET"))
        .and(path("/api/questions"))
        .and(query_param("locale", "en"))
        .and(header("Authorization", "Bearer store-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [source_json.clone()],
            "meta": {"page": 1, "pageSize": 100, "pageCount": 1, "total": 1}
        })))
        .mount(&store_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/questions"))
        .and(query_param("locale", "it"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [],
            "meta": {"page": 1, "pageSize": 100, "pageCount": 0, "total": 0}
        })))
        .mount(&store_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/i18n/locales"))
        .respond_with(ResponseTemplate::new(409).set_body_string("Locale already exists"))
        .expect(1)
        .mount(&store_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/questions/links/doc-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": [source_json]})),
        )
        .mount(&store_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/questions/localizations"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "data": {
                "recordId": "r2",
                "baseId": "Q1",
                "locale": "it",
                "linkId": "doc-1",
                "content": {"prompt": "Capitale d'Italia?", "choices": ["Roma", "Milano"], "answerIndex": 0, "topic": "Geografia", "level": "easy"}
            }
        })))
        .expect(1)
        .mount(&store_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/usage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "character_count": 0,
            "character_limit": 500000
        })))
        .mount(&deepl_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/translate"))
        .and(header("Authorization", "DeepL-Auth-Key deepl-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "translations": [
                {"text": "Capitale d'Italia?"},
                {"text": "Geografia"},
                {"text": "Roma"},
                {"text": "Milano"}
            ]
        })))
        .expect(1)
        .mount(&deepl_server)
        .await;

    let store = Arc::new(
        RestStore::new(store_server.uri(), "store-token", "questions").expect("store client"),
    );
    let provider = Arc::new(
        DeepLProvider::new(deepl_server.uri(), "deepl-key", Duration::from_secs(5))
            .expect("provider client"),
    );

    let report = PipelineRunner::new(store, provider, fast_settings())
        .run_sync(&locale("en"), &[locale("it")])
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.translated, 1);
    assert_eq!(report.failed, 0);
}
