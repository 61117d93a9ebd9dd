use chrono::{DateTime, Duration, TimeZone, Utc};
use hive::core::error::HiveError;
use hive::core::store::Store;
use hive::core::time::Clock;
use hive::plugins::agents::{Role, register_agent};
use hive::plugins::boards::{create_board, subscribe};
use hive::plugins::content::{
    Status, create_post, create_reply, delete_post_thread, delete_reply, get_content,
    list_content_history, list_tags, update_post, update_post_status, update_post_tags,
    update_reply,
};
use hive::plugins::fanout::{get_thread_stats, recompute_thread_stats};
use hive::plugins::feed::{ListParams, SortKey, SortOrder, list_activity, list_replies, list_threads};
use hive::plugins::notifications::{
    list_notifications, mark_all_notifications_read, mark_notification_read,
};
use hive::plugins::webhooks::{EventKind, RecordingSink};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn setup() -> (TempDir, Store, Arc<RecordingSink>) {
    let tmp = tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let store = Store::open_with_clock(tmp.path(), Clock::fixed(t0()))
        .unwrap()
        .with_sink(sink.clone());
    for name in ["alice", "bob", "carol"] {
        register_agent(&store, name, Role::Agent, None).unwrap();
    }
    (tmp, store, sink)
}

fn tick(store: &Store) {
    store.clock().advance(Duration::seconds(1));
}

fn count(store: &Store, sql: &str) -> i64 {
    let conn = rusqlite::Connection::open(store.db_path()).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

#[test]
fn test_thread_id_propagates_through_reply_chains() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("Root"), "root body", &[], &[], None).unwrap();
    assert_eq!(post.thread_id, post.id);

    let mut parent = post.id.clone();
    for depth in 0..6 {
        tick(&store);
        let reply = create_reply(&store, "bob", &parent, &format!("depth {depth}"), &[]).unwrap();
        assert_eq!(reply.thread_id, post.id);
        assert_eq!(reply.parent_id.as_deref(), Some(parent.as_str()));
        parent = reply.id;
    }

    let stats = get_thread_stats(&store, &post.id).unwrap().unwrap();
    assert_eq!(stats.reply_count, 6);
    assert_eq!(stats.participants, vec!["alice", "bob"]);
}

#[test]
fn test_blank_body_and_missing_parent_write_nothing() {
    let (_tmp, store, sink) = setup();
    assert!(matches!(
        create_post(&store, "alice", Some("t"), "   ", &[], &[], None),
        Err(HiveError::ValidationError(_))
    ));
    assert!(matches!(
        create_reply(&store, "alice", "nope", "hello", &[]),
        Err(HiveError::NotFound(_))
    ));
    assert!(matches!(
        create_post(&store, "ghost", None, "hello", &[], &[], None),
        Err(HiveError::NotFound(_))
    ));
    assert_eq!(count(&store, "SELECT COUNT(*) FROM content"), 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM notifications"), 0);
    assert!(sink.events().is_empty());
}

#[test]
fn test_identical_body_in_same_second_is_idempotent() {
    let (_tmp, store, sink) = setup();
    let first = create_post(&store, "alice", Some("t"), "same words", &tags(&["a"]), &[], None).unwrap();
    let second = create_post(&store, "alice", Some("t"), "same words", &tags(&["a"]), &[], None).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM content"), 1);
    assert_eq!(sink.kinds(), vec![EventKind::ThreadCreated]);

    tick(&store);
    let third = create_post(&store, "alice", Some("t"), "same words", &[], &[], None).unwrap();
    assert_ne!(third.id, first.id);
}

#[test]
fn test_reply_notifies_parent_and_root_authors_once() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("Plan"), "kickoff", &[], &[], None).unwrap();
    tick(&store);
    let bob_reply = create_reply(&store, "bob", &post.id, "on it", &[]).unwrap();
    tick(&store);
    create_reply(&store, "carol", &bob_reply.id, "me too", &[]).unwrap();
    tick(&store);
    // Replying to yourself on your own thread notifies nobody.
    create_reply(&store, "alice", &post.id, "thanks all", &[]).unwrap();

    let alice = list_notifications(&store, "alice", true, 50, 0).unwrap();
    let bob = list_notifications(&store, "bob", true, 50, 0).unwrap();
    let carol = list_notifications(&store, "carol", true, 50, 0).unwrap();
    assert_eq!(alice.total, 2);
    assert_eq!(bob.total, 1);
    assert_eq!(carol.total, 0);
    assert!(alice.items.iter().all(|n| n.thread_id.as_deref() == Some(post.id.as_str())));
}

#[test]
fn test_mentions_notify_and_emit_event() {
    let (_tmp, store, sink) = setup();
    let post = create_post(
        &store,
        "alice",
        Some("Review"),
        "@bob can you check? also @nobody",
        &[],
        &tags(&["carol"]),
        None,
    )
    .unwrap();

    assert_eq!(count(&store, "SELECT COUNT(*) FROM mentions"), 2);
    let bob = list_notifications(&store, "bob", false, 20, 0).unwrap();
    assert_eq!(bob.items.len(), 1);
    assert_eq!(bob.items[0].content_id.as_deref(), Some(post.id.as_str()));
    assert_eq!(bob.items[0].preview, "@bob can you check? also @nobody");

    let events = sink.events();
    let mention = events
        .iter()
        .find(|e| e.event == EventKind::MentionCreated)
        .expect("mention event");
    assert_eq!(mention.data["mentions"], serde_json::json!(["carol", "bob"]));
}

#[test]
fn test_mark_notifications_read() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("x"), "body", &[], &[], None).unwrap();
    tick(&store);
    create_reply(&store, "bob", &post.id, "one", &[]).unwrap();
    tick(&store);
    create_reply(&store, "carol", &post.id, "two", &[]).unwrap();

    let inbox = list_notifications(&store, "alice", false, 20, 0).unwrap();
    assert_eq!(inbox.total, 2);
    assert!(matches!(
        mark_notification_read(&store, "bob", &inbox.items[0].id),
        Err(HiveError::NotFound(_))
    ));
    mark_notification_read(&store, "alice", &inbox.items[0].id).unwrap();
    assert_eq!(list_notifications(&store, "alice", false, 20, 0).unwrap().total, 1);
    assert_eq!(mark_all_notifications_read(&store, "alice").unwrap(), 1);
    assert_eq!(list_notifications(&store, "alice", false, 20, 0).unwrap().total, 0);
    assert_eq!(list_notifications(&store, "alice", true, 20, 0).unwrap().total, 2);
}

#[test]
fn test_delete_reply_removes_subtree_and_rebuilds_stats() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("A"), "thread a", &[], &[], None).unwrap();
    let other = create_post(&store, "bob", Some("B"), "thread b", &[], &[], None).unwrap();
    tick(&store);
    let keep = create_reply(&store, "bob", &post.id, "keep me", &[]).unwrap();
    tick(&store);
    let doomed = create_reply(&store, "carol", &post.id, "doomed", &[]).unwrap();
    tick(&store);
    let child = create_reply(&store, "bob", &doomed.id, "child", &tags(&["alice"])).unwrap();
    tick(&store);
    create_reply(&store, "alice", &child.id, "grandchild", &[]).unwrap();
    tick(&store);
    create_reply(&store, "alice", &other.id, "elsewhere", &[]).unwrap();

    assert_eq!(delete_reply(&store, &doomed.id).unwrap(), 3);

    let surviving = count(
        &store,
        &format!("SELECT COUNT(*) FROM content WHERE thread_id = '{}' AND type = 'reply'", post.id),
    );
    assert_eq!(surviving, 1);
    let stats = get_thread_stats(&store, &post.id).unwrap().unwrap();
    assert_eq!(stats.reply_count, surviving);
    assert_eq!(stats.participants, vec!["alice", "bob"]);
    assert_eq!(stats.last_activity, keep.created);
    assert_eq!(Some(stats), recompute_thread_stats(&store, &post.id).unwrap());

    let other_stats = get_thread_stats(&store, &other.id).unwrap().unwrap();
    assert_eq!(other_stats.reply_count, 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM mentions"), 0);

    assert!(matches!(
        delete_reply(&store, &post.id),
        Err(HiveError::ValidationError(_))
    ));
}

#[test]
fn test_delete_post_removes_whole_thread() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("A"), "a", &tags(&["x"]), &[], None).unwrap();
    let other = create_post(&store, "bob", Some("B"), "b", &[], &[], None).unwrap();
    tick(&store);
    let r = create_reply(&store, "bob", &post.id, "r", &[]).unwrap();
    create_reply(&store, "carol", &r.id, "rr", &[]).unwrap();

    assert_eq!(delete_post_thread(&store, &post.id).unwrap(), 3);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM content"), 1);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM tags"), 0);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM notifications"), 0);
    assert!(get_thread_stats(&store, &post.id).unwrap().is_none());
    assert!(get_content(&store, &other.id).is_ok());
    assert!(matches!(get_content(&store, &post.id), Err(HiveError::NotFound(_))));
}

#[test]
fn test_edits_keep_history() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("Draft"), "v1", &[], &[], None).unwrap();
    tick(&store);
    let edited = update_post(&store, &post.id, "v2", None, "alice").unwrap();
    assert_eq!(edited.title.as_deref(), Some("Draft"));
    assert_eq!(edited.body, "v2");
    assert_ne!(edited.updated, edited.created);
    tick(&store);
    let retitled = update_post(&store, &post.id, "v3", Some("Final"), "bob").unwrap();
    assert_eq!(retitled.title.as_deref(), Some("Final"));

    let history = list_content_history(&store, &post.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);
    assert_eq!(history[0].body, "v2");
    assert_eq!(history[1].body, "v1");

    let reply = create_reply(&store, "bob", &post.id, "hi", &[]).unwrap();
    assert!(matches!(
        update_post(&store, &reply.id, "x", None, "bob"),
        Err(HiveError::ValidationError(_))
    ));
    assert_eq!(update_reply(&store, &reply.id, "hello", "bob").unwrap().body, "hello");
    let matches = count(&store, "SELECT COUNT(*) FROM content_fts WHERE content_fts MATCH 'hello'");
    assert_eq!(matches, 1);
}

#[test]
fn test_status_change_emits_only_on_change() {
    let (_tmp, store, sink) = setup();
    let post = create_post(&store, "alice", Some("s"), "status", &[], &[], None).unwrap();
    update_post_status(&store, &post.id, Status::Open).unwrap();
    let closed = update_post_status(&store, &post.id, Status::Closed).unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(
        sink.kinds(),
        vec![EventKind::ThreadCreated, EventKind::StatusChanged]
    );
    assert_eq!(sink.events()[1].data["status"], "closed");
}

#[test]
fn test_tag_patch_and_counts() {
    let (_tmp, store, _) = setup();
    let post = create_post(&store, "alice", Some("t"), "tags", &tags(&["b", " a ", "b"]), &[], None).unwrap();
    assert_eq!(post.tags, vec!["a", "b"]);
    let after = update_post_tags(&store, &post.id, &tags(&["c", ""]), &tags(&["a"])).unwrap();
    assert_eq!(after, vec!["b", "c"]);
    create_post(&store, "bob", Some("u"), "more tags", &tags(&["c"]), &[], None).unwrap();
    assert_eq!(
        list_tags(&store).unwrap(),
        vec![("c".to_string(), 2), ("b".to_string(), 1)]
    );
}

#[test]
fn test_repeated_tag_filters_are_anded() {
    let (_tmp, store, _) = setup();
    let both = create_post(&store, "alice", Some("both"), "1", &tags(&["a", "b"]), &[], None).unwrap();
    create_post(&store, "alice", Some("only a"), "2", &tags(&["a"]), &[], None).unwrap();
    create_post(&store, "alice", Some("only b"), "3", &tags(&["b"]), &[], None).unwrap();

    let params = ListParams {
        tags: tags(&["a", "b"]),
        ..ListParams::default()
    };
    let page = list_threads(&store, &params).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].post.id, both.id);
}

#[test]
fn test_list_threads_sorting_and_limits() {
    let (_tmp, store, _) = setup();
    let quiet = create_post(&store, "alice", Some("quiet"), "q", &[], &[], None).unwrap();
    tick(&store);
    let busy = create_post(&store, "bob", Some("busy"), "b", &[], &[], None).unwrap();
    tick(&store);
    create_reply(&store, "carol", &busy.id, "r1", &[]).unwrap();
    tick(&store);
    create_reply(&store, "alice", &busy.id, "r2", &[]).unwrap();
    tick(&store);
    create_reply(&store, "carol", &quiet.id, "latest", &[]).unwrap();

    let by_activity = list_threads(&store, &ListParams::default()).unwrap();
    assert_eq!(by_activity.items[0].post.id, quiet.id);
    assert_eq!(by_activity.limit, 20);

    let by_replies = list_threads(
        &store,
        &ListParams {
            sort: SortKey::Replies,
            limit: 500,
            ..ListParams::default()
        },
    )
    .unwrap();
    assert_eq!(by_replies.items[0].post.id, busy.id);
    assert_eq!(by_replies.items[0].reply_count, 2);
    assert_eq!(by_replies.items[0].participant_count, 3);
    assert_eq!(by_replies.limit, 20);

    let oldest_first = list_threads(
        &store,
        &ListParams {
            sort: SortKey::Created,
            order: SortOrder::Asc,
            limit: 1,
            offset: -3,
            ..ListParams::default()
        },
    )
    .unwrap();
    assert_eq!(oldest_first.items.len(), 1);
    assert_eq!(oldest_first.items[0].post.id, quiet.id);
    assert_eq!(oldest_first.total, 2);
    assert_eq!(oldest_first.offset, 0);

    let replies = list_replies(&store, &busy.id, 20, 0).unwrap();
    assert_eq!(replies.total, 2);
    assert_eq!(replies.items[0].body, "r1");
    assert!(matches!(
        list_replies(&store, "missing", 20, 0),
        Err(HiveError::NotFound(_))
    ));

    let activity = list_activity(&store, Some("carol"), 20, 0).unwrap();
    assert_eq!(activity.total, 2);
    assert_eq!(activity.items[0].body, "latest");
}

#[test]
fn test_boards_validate_and_notify_subscribers() {
    let (_tmp, store, _) = setup();
    assert!(matches!(
        create_post(&store, "alice", Some("t"), "b", &[], &[], Some("nowhere")),
        Err(HiveError::ValidationError(_))
    ));

    let board = create_board(&store, "Release Notes", "Shipping log", "", "alice", &[]).unwrap();
    assert_eq!(board.id, "release-notes");
    subscribe(&store, "bob", &board.id).unwrap();
    subscribe(&store, "alice", &board.id).unwrap();

    let post = create_post(&store, "alice", Some("v1.2"), "shipped", &[], &[], Some(&board.id)).unwrap();
    assert_eq!(post.board_id.as_deref(), Some("release-notes"));
    assert_eq!(list_notifications(&store, "bob", false, 20, 0).unwrap().total, 1);
    assert_eq!(list_notifications(&store, "alice", false, 20, 0).unwrap().total, 0);

    let reply = create_reply(&store, "bob", &post.id, "nice", &[]).unwrap();
    assert_eq!(reply.board_id.as_deref(), Some("release-notes"));
}
