//! End-to-end tests for the summarization pipeline against the in-memory
//! store and the scripted chat backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use digest_core::{
    defaults, AiConfig, ChatRole, ErrorCode, ManualClock, NewNote, Note, NoteRelation,
    NoteStore, PipelineLimits, RelationType, SettingStore, SummaryRequest, TimeRange,
    Visibility,
};
use digest_db::MemoryStore;
use digest_inference::mock::{MockChatBackend, MockStep};
use digest_jobs::SummaryService;

const LONG_SUMMARY: &str = "This week focused on the storage migration and the release plan. \
    Key decisions: ship the importer first, defer the sync rewrite. Follow up on the review notes.";

struct Harness {
    store: MemoryStore,
    clock: Arc<ManualClock>,
    backend: MockChatBackend,
    service: SummaryService,
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

fn harness(backend: MockChatBackend) -> Harness {
    let clock = Arc::new(ManualClock::new(now()));
    let store = MemoryStore::with_clock(clock.clone());
    let service = SummaryService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        clock.clone(),
        PipelineLimits::default(),
    );
    Harness {
        store,
        clock,
        backend,
        service,
    }
}

async fn configure(store: &MemoryStore) {
    let config = AiConfig {
        endpoint: "https://api.example.com/v1".into(),
        api_key: "sk-test".into(),
        model: "test-model".into(),
        system_prompt: String::new(),
    };
    store
        .put_workspace_setting(defaults::AI_CONFIG_KEY, &serde_json::to_value(config).unwrap())
        .await
        .unwrap();
}

async fn note_days_ago(store: &MemoryStore, user: Uuid, content: &str, days: i64) -> Note {
    store
        .create_note(NewNote::new(user, content).created_at(now() - chrono::Duration::days(days)))
        .await
        .unwrap()
}

fn last_user_message(backend: &MockChatBackend) -> String {
    let calls = backend.calls();
    let call = calls.last().expect("at least one call");
    call.messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_generate_summary_end_to_end() {
    let h = harness(MockChatBackend::new().then(MockStep::reply(LONG_SUMMARY)));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    let a = note_days_ago(&h.store, user, "Planned the importer #work", 1).await;
    let b = note_days_ago(&h.store, user, "Reviewed storage migration", 2).await;
    note_days_ago(&h.store, user, "Ancient history", 40).await;

    let out = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .expect("pipeline should succeed");

    assert_eq!(out.sources_used, 2);
    assert_eq!(out.links_created, 2);
    assert_eq!(out.attempts, 1);
    assert!(!out.truncated);

    let note = &out.note;
    assert!(note.ai_generated);
    assert_eq!(note.visibility, Visibility::Private);
    assert!(!note.pinned);
    assert_eq!(note.creator_id, user);
    assert!(note.content.starts_with(
        "<!-- AI Generated Summary -->\n**Generated:** 2024-06-15 12:00:00\n**Time Range:** Last 7 days\n\n---\n\n"
    ));
    assert!(note.content.ends_with("\n\n#AI"));
    assert!(note.tags.contains(&"ai".to_string()));

    // Newest first: the note from yesterday is Memo 1.
    let prompt = last_user_message(&h.backend);
    assert!(prompt.starts_with(digest_jobs::DEFAULT_SYSTEM_PROMPT));
    let first = prompt.find("[Memo 1]\nPlanned the importer #work").unwrap();
    let second = prompt.find("[Memo 2]\nReviewed storage migration").unwrap();
    assert!(first < second);
    assert!(!prompt.contains("Ancient history"));

    let related: Vec<Uuid> = h
        .store
        .list_relations(note.id, RelationType::Reference)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.related_note_id)
        .collect();
    assert!(related.contains(&a.id) && related.contains(&b.id));

    assert_eq!(h.service.rate_limiter().current_count(user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_tag_filter_and_overrides() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "Sprint notes #Work", 1).await;
    note_days_ago(&h.store, user, "Groceries #home", 1).await;

    let mut request = SummaryRequest::for_range(TimeRange::Last30Days).with_tags(["work"]);
    request.model = Some("override-model".into());
    request.system_prompt = Some("Summarize tersely.".into());

    let out = h
        .service
        .generate_summary(user, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out.sources_used, 1);

    let calls = h.backend.calls();
    assert_eq!(calls[0].model, "override-model");
    assert_eq!(calls[0].messages[0].role, ChatRole::System);
    assert_eq!(calls[0].messages[0].content, "Summarize tersely.");
    let prompt = last_user_message(&h.backend);
    assert!(prompt.starts_with("Summarize tersely.\n\n[Memo 1]\nSprint notes #Work"));
    assert!(!prompt.contains("Groceries"));
}

#[tokio::test]
async fn test_previous_summaries_are_not_resummarized() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "Real note", 1).await;
    note_days_ago(&h.store, user, "Hand-written #AI musings", 1).await;

    let req = SummaryRequest::for_range(TimeRange::Last7Days);
    let cancel = CancellationToken::new();
    h.service.generate_summary(user, &req, &cancel).await.unwrap();
    let second = h.service.generate_summary(user, &req, &cancel).await.unwrap();

    assert_eq!(second.sources_used, 1);
    let prompt = last_user_message(&h.backend);
    assert!(!prompt.contains("AI Generated Summary"));
    assert!(!prompt.contains("musings"));
}

#[tokio::test]
async fn test_quota_enforced_after_five_successes() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let req = SummaryRequest::for_range(TimeRange::Last7Days);
    let cancel = CancellationToken::new();
    for _ in 0..5 {
        h.service.generate_summary(user, &req, &cancel).await.unwrap();
    }
    let err = h
        .service
        .generate_summary(user, &req, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    assert!(err.to_string().contains("5 requests per hour"));
    assert_eq!(h.backend.call_count(), 5);

    // The next hour has a fresh bucket.
    h.clock.advance(chrono::Duration::hours(1));
    h.service.generate_summary(user, &req, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_failed_run_releases_quota() {
    let h = harness(MockChatBackend::new().then(MockStep::fail(401, "invalid api key")));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert_eq!(h.backend.call_count(), 1);
    assert_eq!(h.service.rate_limiter().current_count(user).await.unwrap(), 0);
    assert_eq!(h.store.all_notes().await.len(), 1);
}

#[tokio::test]
async fn test_invalid_request_touches_nothing() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::custom("2024-02-10", "2024-02-01"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(h.backend.call_count(), 0);
    assert!(h
        .store
        .get_workspace_setting(defaults::RATE_LIMIT_KEY)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_custom_range_is_inclusive_of_end_day() {
    let h = harness(MockChatBackend::new().then(MockStep::reply(LONG_SUMMARY)));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    let late = Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 0).unwrap();
    let outside = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    h.store
        .create_note(NewNote::new(user, "last minute of March").created_at(late))
        .await
        .unwrap();
    h.store
        .create_note(NewNote::new(user, "first of April").created_at(outside))
        .await
        .unwrap();

    let out = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::custom("2024-03-01", "2024-03-31"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.sources_used, 1);
    assert!(out
        .note
        .content
        .contains("**Time Range:** 2024-03-01 to 2024-03-31\n"));
}

#[tokio::test]
async fn test_missing_config_is_failed_precondition() {
    let h = harness(MockChatBackend::new());
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);
    assert_eq!(h.service.rate_limiter().current_count(user).await.unwrap(), 0);
}

#[tokio::test]
async fn test_empty_window_is_not_found() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let err = h
        .service
        .generate_summary(
            Uuid::now_v7(),
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_short_reply_rejected_and_long_reply_truncated() {
    let h = harness(
        MockChatBackend::new()
            .then(MockStep::reply("Too short."))
            .then(MockStep::reply("x".repeat(6000))),
    );
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;
    let req = SummaryRequest::for_range(TimeRange::Last7Days);
    let cancel = CancellationToken::new();

    let err = h
        .service
        .generate_summary(user, &req, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(err.to_string().contains("too short"));
    assert_eq!(h.store.all_notes().await.len(), 1);

    let out = h.service.generate_summary(user, &req, &cancel).await.unwrap();
    assert!(out.truncated);
    assert!(out.note.content.contains(&format!("{}\n\n#AI", "x".repeat(5000))));
    assert!(!out.note.content.contains(&"x".repeat(5001)));
}

#[tokio::test]
async fn test_no_choices_is_internal() {
    let h = harness(MockChatBackend::new().then(MockStep::no_choices()));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
    assert!(err.to_string().contains("no choices"));
}

#[tokio::test(start_paused = true)]
async fn test_throttled_then_success_after_cool_down() {
    let h = harness(
        MockChatBackend::new()
            .then(MockStep::Throttle)
            .then(MockStep::reply(LONG_SUMMARY)),
    );
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let started = tokio::time::Instant::now();
    let out = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.attempts, 2);
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(h.store.all_notes().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_exhaustion() {
    let h = harness(MockChatBackend::new().with_fallback(MockStep::Throttle));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    assert!(err.to_string().contains("after 3 attempts"));
    assert_eq!(h.backend.call_count(), 3);
    assert_eq!(h.store.all_notes().await.len(), 1);
    assert_eq!(h.service.rate_limiter().current_count(user).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_cool_down() {
    let h = harness(MockChatBackend::new().with_fallback(MockStep::Throttle));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_deadline_exceeded() {
    let h = harness(MockChatBackend::new().then(MockStep::Hang));
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    let err = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DeadlineExceeded);
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test]
async fn test_link_failure_does_not_fail_run() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "one", 1).await;
    let broken = note_days_ago(&h.store, user, "two", 2).await;
    h.store.fail_relations_to(broken.id).await;

    let out = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.sources_used, 2);
    assert_eq!(out.links_created, 1);
}

#[tokio::test]
async fn test_prompt_budget_limits_links() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, &"a".repeat(6000), 1).await;
    note_days_ago(&h.store, user, &"b".repeat(6000), 2).await;

    let out = h
        .service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.sources_used, 1);
    assert_eq!(out.links_created, 1);
}

#[tokio::test]
async fn test_configuration_sends_test_message() {
    let h = harness(MockChatBackend::new().then(MockStep::reply("Test successful")));

    let missing = h.service.test_configuration().await;
    assert!(!missing.success);
    assert!(missing
        .error_message
        .starts_with("Failed to get AI configuration:"));
    assert_eq!(
        missing.details,
        "Please ensure AI configuration is properly set in workspace settings."
    );
    assert_eq!(h.backend.call_count(), 0);

    configure(&h.store).await;
    let ok = h.service.test_configuration().await;
    assert!(ok.success, "{:?}", ok);
    assert_eq!(
        ok.details,
        "Successfully connected to AI provider. Model: test-model, Response length: 15 characters"
    );
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages.len(), 1);
    assert_eq!(calls[0].messages[0].content, defaults::CONNECTION_TEST_MESSAGE);
    assert!(h
        .store
        .get_workspace_setting(defaults::RATE_LIMIT_KEY)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_configuration_does_not_retry_throttling() {
    let h = harness(MockChatBackend::new().with_fallback(MockStep::Throttle));
    configure(&h.store).await;
    let result = h.service.test_configuration().await;
    assert!(!result.success);
    assert_eq!(result.details, digest_inference::connection::DIAG_RATE_LIMIT);
    assert_eq!(h.backend.call_count(), 1);
}

async fn summary_with_sources(h: &Harness, user: Uuid, sources: usize) -> Note {
    for i in 0..sources {
        note_days_ago(&h.store, user, &format!("source {}", i), 1 + i as i64).await;
    }
    h.service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .note
}

#[tokio::test]
async fn test_source_memos_pagination() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    let summary = summary_with_sources(&h, user, 3).await;

    let first = h
        .service
        .get_source_memos(Some(user), summary.id, Some(2), None)
        .await
        .unwrap();
    assert_eq!(first.total_size, 3);
    assert_eq!(first.notes.len(), 2);
    assert_eq!(first.notes[0].content, "source 0");
    let token = first.next_page_token.clone().expect("more pages");

    let second = h
        .service
        .get_source_memos(Some(user), summary.id, Some(2), Some(&token))
        .await
        .unwrap();
    assert_eq!(second.notes.len(), 1);
    assert_eq!(second.notes[0].content, "source 2");
    assert!(second.next_page_token.is_none());

    let err = h
        .service
        .get_source_memos(Some(user), summary.id, None, Some("not-a-token"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_source_memos_skip_archived() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let user = Uuid::now_v7();
    let summary = summary_with_sources(&h, user, 2).await;
    let sources = h
        .store
        .list_relations(summary.id, RelationType::Reference)
        .await
        .unwrap();
    h.store
        .archive_note(sources[0].related_note_id)
        .await
        .unwrap();

    let page = h
        .service
        .get_source_memos(Some(user), summary.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.total_size, 1);
    assert_eq!(page.notes.len(), 1);
}

#[tokio::test]
async fn test_source_memos_visibility() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    let owner = Uuid::now_v7();
    let stranger = Uuid::now_v7();
    let summary = summary_with_sources(&h, owner, 1).await;

    let err = h
        .service
        .get_source_memos(None, summary.id, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    let err = h
        .service
        .get_source_memos(Some(stranger), summary.id, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    let protected = h
        .store
        .create_note(NewNote::new(owner, "protected summary").visibility(Visibility::Protected))
        .await
        .unwrap();
    let page = h
        .service
        .get_source_memos(Some(stranger), protected.id, None, None)
        .await
        .unwrap();
    assert_eq!(page.total_size, 0);
    assert!(page.notes.is_empty());
    assert!(h
        .service
        .get_source_memos(None, protected.id, None, None)
        .await
        .is_err());

    let public = h
        .store
        .create_note(NewNote::new(owner, "public").visibility(Visibility::Public))
        .await
        .unwrap();
    h.service
        .get_source_memos(None, public.id, None, None)
        .await
        .unwrap();

    let err = h
        .service
        .get_source_memos(Some(owner), Uuid::now_v7(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_source_memos_hide_sources_the_viewer_cannot_see() {
    let h = harness(MockChatBackend::new());
    let owner = Uuid::now_v7();
    let stranger = Uuid::now_v7();

    let summary = h
        .store
        .create_note(NewNote::new(owner, "shared summary").visibility(Visibility::Public))
        .await
        .unwrap();
    for (content, visibility) in [
        ("private source", Visibility::Private),
        ("protected source", Visibility::Protected),
        ("public source", Visibility::Public),
    ] {
        let source = h
            .store
            .create_note(NewNote::new(owner, content).visibility(visibility))
            .await
            .unwrap();
        h.store
            .upsert_relation(&NoteRelation::reference(summary.id, source.id))
            .await
            .unwrap();
    }

    let contents = |page: &digest_core::SourceMemoPage| {
        let mut c: Vec<String> = page.notes.iter().map(|n| n.content.clone()).collect();
        c.sort();
        c
    };

    let anonymous = h
        .service
        .get_source_memos(None, summary.id, None, None)
        .await
        .unwrap();
    assert_eq!(anonymous.total_size, 1);
    assert_eq!(contents(&anonymous), vec!["public source"]);

    let other = h
        .service
        .get_source_memos(Some(stranger), summary.id, None, None)
        .await
        .unwrap();
    assert_eq!(other.total_size, 2);
    assert_eq!(contents(&other), vec!["protected source", "public source"]);

    let own = h
        .service
        .get_source_memos(Some(owner), summary.id, Some(2), None)
        .await
        .unwrap();
    assert_eq!(own.total_size, 3);
    assert_eq!(own.notes.len(), 2);
    let token = own.next_page_token.expect("a second page");
    let rest = h
        .service
        .get_source_memos(Some(owner), summary.id, Some(2), Some(&token))
        .await
        .unwrap();
    assert_eq!(rest.notes.len(), 1);
    assert!(rest.next_page_token.is_none());
}

#[tokio::test]
async fn test_garbled_ledger_does_not_block_requests() {
    let h = harness(MockChatBackend::new());
    configure(&h.store).await;
    h.store
        .put_workspace_setting(defaults::RATE_LIMIT_KEY, &json!({"counts": "oops"}))
        .await
        .unwrap();
    let user = Uuid::now_v7();
    note_days_ago(&h.store, user, "note", 1).await;

    h.service
        .generate_summary(
            user,
            &SummaryRequest::for_range(TimeRange::Last7Days),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(h.service.rate_limiter().current_count(user).await.unwrap(), 1);
}
