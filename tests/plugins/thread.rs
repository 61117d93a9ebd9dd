use chrono::{DateTime, Duration, TimeZone, Utc};
use hive::core::error::HiveError;
use hive::core::store::Store;
use hive::core::time::Clock;
use hive::plugins::agents::{Role, register_agent};
use hive::plugins::content::{create_post, create_reply};
use hive::plugins::thread::{
    TRUNCATION_MARKER, ThreadView, load_thread, render_thread, summarize_thread,
};
use hive::plugins::webhooks::{EventKind, RecordingSink};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 10, 8, 0, 0).unwrap()
}

struct Fixture {
    _tmp: TempDir,
    store: Store,
    sink: Arc<RecordingSink>,
    post: String,
    first: String,
    nested: String,
    late: String,
}

/// post
/// ├── first (bob, t0+1h)
/// │   └── nested (carol, t0+2h)
/// └── late (carol, t0+5h)
fn fixture() -> Fixture {
    let tmp = tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let store = Store::open_with_clock(tmp.path(), Clock::fixed(t0()))
        .unwrap()
        .with_sink(sink.clone());
    for name in ["alice", "bob", "carol"] {
        register_agent(&store, name, Role::Agent, None).unwrap();
    }
    let tags = vec!["planning".to_string()];
    let post = create_post(&store, "alice", Some("Q3 plan"), "What ships in Q3?", &tags, &[], None)
        .unwrap();
    store.clock().advance(Duration::hours(1));
    let first = create_reply(&store, "bob", &post.id, "Search v2.", &[]).unwrap();
    store.clock().advance(Duration::hours(1));
    let nested = create_reply(&store, "carol", &first.id, "Needs an index rebuild.", &[]).unwrap();
    store.clock().advance(Duration::hours(3));
    let late = create_reply(&store, "carol", &post.id, "Also exports.", &[]).unwrap();
    Fixture {
        _tmp: tmp,
        store,
        sink,
        post: post.id,
        first: first.id,
        nested: nested.id,
        late: late.id,
    }
}

#[test]
fn test_load_thread_from_any_member() {
    let f = fixture();
    let tree = load_thread(&f.store, &f.nested, &ThreadView::default()).unwrap();
    assert_eq!(tree.content.id, f.post);
    let top: Vec<&str> = tree.replies.iter().map(|r| r.content.id.as_str()).collect();
    assert_eq!(top, vec![f.first.as_str(), f.late.as_str()]);
    assert_eq!(tree.replies[0].replies[0].content.id, f.nested);
    assert_eq!(tree.content.tags, vec!["planning"]);

    let json = serde_json::to_value(&tree).unwrap();
    assert_eq!(json["type"], "post");
    assert_eq!(json["replies"][0]["replies"][0]["author"], "carol");
}

#[test]
fn test_render_full_thread() {
    let f = fixture();
    let md = render_thread(&f.store, &f.post, &ThreadView::default()).unwrap();
    assert!(md.starts_with("# Q3 plan\n\n**Author:** alice | **Created:** 2024-02-10T08:00:00Z | **Status:** open\n**Tags:** planning\n"));
    assert!(md.contains("## Reply by bob (2024-02-10T09:00:00Z)\n\nSearch v2.\n"));
    assert!(md.contains("### Reply by carol (2024-02-10T10:00:00Z)\n\nNeeds an index rebuild.\n"));
    let nested_at = md.find("Needs an index rebuild.").unwrap();
    let late_at = md.find("Also exports.").unwrap();
    assert!(nested_at < late_at);
}

#[test]
fn test_depth_and_since_filters() {
    let f = fixture();
    let shallow = render_thread(
        &f.store,
        &f.post,
        &ThreadView {
            depth: 1,
            ..ThreadView::default()
        },
    )
    .unwrap();
    assert!(!shallow.contains("Needs an index rebuild."));
    assert!(shallow.contains("Also exports."));

    let recent = load_thread(
        &f.store,
        &f.post,
        &ThreadView {
            since: Some(t0() + Duration::hours(3)),
            ..ThreadView::default()
        },
    )
    .unwrap();
    assert_eq!(recent.content.id, f.post);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent.replies[0].content.id, f.late);
}

#[test]
fn test_token_budget_keeps_newest_text() {
    let f = fixture();
    let full = render_thread(&f.store, &f.post, &ThreadView::default()).unwrap();
    let cut = render_thread(
        &f.store,
        &f.post,
        &ThreadView {
            max_tokens: 25,
            ..ThreadView::default()
        },
    )
    .unwrap();
    assert!(cut.starts_with(TRUNCATION_MARKER));
    assert!(cut.ends_with("Also exports.\n"));
    assert!(!cut.contains("# Q3 plan"));
    assert!(cut.len() < full.len());
}

#[test]
fn test_summary_emits_event() {
    let f = fixture();
    let summary = summarize_thread(&f.store, &f.late, 3).unwrap();
    assert_eq!(summary.lines().count(), 3);
    assert!(summary.starts_with("# Q3 plan"));

    let events = f.sink.events();
    let last = events.last().unwrap();
    assert_eq!(last.event, EventKind::SummaryRequested);
    assert_eq!(last.data["thread_id"], f.post.as_str());
    assert_eq!(last.data["summary"], summary.as_str());
}

#[test]
fn test_unknown_thread_is_not_found() {
    let f = fixture();
    assert!(matches!(
        render_thread(&f.store, "missing", &ThreadView::default()),
        Err(HiveError::NotFound(_))
    ));
}
