use chrono::{DateTime, Duration, TimeZone, Utc};
use hive::core::error::HiveError;
use hive::core::store::Store;
use hive::core::time::Clock;
use hive::plugins::agents::{
    Role, agent_stats, authenticate, count_admins, ensure_bootstrap_admin, get_agent, list_agents,
    register_agent,
};
use hive::plugins::boards::{
    DEFAULT_BOARDS, create_board, get_board, list_agent_subscriptions, list_board_subscribers,
    list_boards, seed_default_boards, subscribe, unsubscribe, update_board_tags,
};
use hive::plugins::content::{Status, create_post, create_reply, update_post_status};
use hive::plugins::notifications::mark_all_notifications_read;
use hive::plugins::stats::forum_stats;
use hive::plugins::webhooks::{
    EventKind, create_webhook, delete_webhook, get_webhook, list_webhooks, set_webhook_active,
    webhooks_for_event,
};
use std::fs;
use tempfile::{TempDir, tempdir};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 20, 16, 0, 0).unwrap()
}

fn setup() -> (TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::open_with_clock(tmp.path(), Clock::fixed(t0())).unwrap();
    (tmp, store)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_agent_registration_and_authentication() {
    let (_tmp, store) = setup();
    let (agent, key) = register_agent(&store, "scout", Role::Agent, Some("{\"team\":\"ops\"}")).unwrap();
    assert_eq!(agent.role, Role::Agent);
    assert!(agent.last_active.is_none());

    assert!(matches!(
        register_agent(&store, "scout", Role::Agent, None),
        Err(HiveError::Conflict(_))
    ));
    assert!(matches!(
        register_agent(&store, "bad name!", Role::Agent, None),
        Err(HiveError::ValidationError(_))
    ));

    store.clock().advance(Duration::minutes(3));
    let authed = authenticate(&store, &key).unwrap();
    assert_eq!(authed.name, "scout");
    assert_eq!(authed.last_active.as_deref(), Some("2024-11-20T16:03:00Z"));
    assert_eq!(
        get_agent(&store, "scout").unwrap().last_active,
        authed.last_active
    );

    assert!(matches!(
        authenticate(&store, "hive_ak_not-a-real-key"),
        Err(HiveError::NotFound(_))
    ));
    assert_eq!(list_agents(&store).unwrap().len(), 1);
}

#[test]
fn test_bootstrap_admin_runs_once() {
    let (tmp, store) = setup();
    let key_file = tmp.path().join("secrets").join("admin.key");

    assert_eq!(
        ensure_bootstrap_admin(&store, &key_file).unwrap().as_deref(),
        Some("admin")
    );
    let key = fs::read_to_string(&key_file).unwrap();
    assert_eq!(authenticate(&store, key.trim()).unwrap().role, Role::Admin);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&key_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    assert_eq!(ensure_bootstrap_admin(&store, &key_file).unwrap(), None);
    assert_eq!(count_admins(&store).unwrap(), 1);
    assert_eq!(fs::read_to_string(&key_file).unwrap(), key);
}

#[test]
fn test_agent_stats() {
    let (_tmp, store) = setup();
    for name in ["alice", "bob"] {
        register_agent(&store, name, Role::Agent, None).unwrap();
    }
    let post = create_post(&store, "alice", Some("Hello"), "Hi @bob", &[], &[], None).unwrap();
    store.clock().advance(Duration::minutes(1));
    create_reply(&store, "bob", &post.id, "Hi back", &[]).unwrap();

    let bob = agent_stats(&store, "bob").unwrap();
    assert_eq!(bob.posts, 0);
    assert_eq!(bob.replies, 1);
    assert_eq!(bob.mentions_received, 1);
    assert_eq!(bob.unread_notifications, 1);
    assert_eq!(bob.last_content_at.as_deref(), Some("2024-11-20T16:01:00Z"));

    let alice = agent_stats(&store, "alice").unwrap();
    assert_eq!(alice.posts, 1);
    assert_eq!(alice.unread_notifications, 1);
    assert_eq!(alice.last_notification_at.as_deref(), Some("2024-11-20T16:01:00Z"));

    assert!(matches!(
        agent_stats(&store, "nobody"),
        Err(HiveError::NotFound(_))
    ));
}

#[test]
fn test_boards_seed_tags_and_subscriptions() {
    let (_tmp, store) = setup();
    // "general" comes with the schema
    assert_eq!(list_boards(&store).unwrap().len(), 1);

    assert_eq!(seed_default_boards(&store).unwrap(), DEFAULT_BOARDS.len());
    assert_eq!(seed_default_boards(&store).unwrap(), 0);
    assert_eq!(list_boards(&store).unwrap().len(), DEFAULT_BOARDS.len() + 1);

    let board = create_board(
        &store,
        "Release Train",
        "Weekly release coordination",
        "🚂",
        "system",
        &strings(&["release", " release ", "ci"]),
    )
    .unwrap();
    assert_eq!(board.id, "release-train");
    assert_eq!(board.tags, vec!["release", "ci"]);
    assert!(matches!(
        create_board(&store, "release train", "", "", "system", &[]),
        Err(HiveError::Conflict(_))
    ));

    let tags = update_board_tags(&store, &board.id, &strings(&["deploys"]), &strings(&["ci"])).unwrap();
    assert_eq!(tags, vec!["deploys", "release"]);
    assert_eq!(get_board(&store, &board.id).unwrap().tags, tags);
    assert!(matches!(
        update_board_tags(&store, "missing", &[], &[]),
        Err(HiveError::NotFound(_))
    ));

    register_agent(&store, "scout", Role::Agent, None).unwrap();
    subscribe(&store, "scout", &board.id).unwrap();
    subscribe(&store, "scout", &board.id).unwrap();
    subscribe(&store, "scout", "general").unwrap();
    assert_eq!(
        list_agent_subscriptions(&store, "scout").unwrap(),
        vec!["general", "release-train"]
    );
    assert_eq!(list_board_subscribers(&store, &board.id).unwrap(), vec!["scout"]);
    assert!(matches!(
        subscribe(&store, "ghost", &board.id),
        Err(HiveError::NotFound(_))
    ));
    assert!(matches!(
        subscribe(&store, "scout", "missing"),
        Err(HiveError::NotFound(_))
    ));

    assert!(unsubscribe(&store, "scout", &board.id).unwrap());
    assert!(!unsubscribe(&store, "scout", &board.id).unwrap());
    assert!(list_board_subscribers(&store, &board.id).unwrap().is_empty());
}

#[test]
fn test_webhook_registry() {
    let (_tmp, store) = setup();
    let replies = create_webhook(
        &store,
        "https://hooks.example.net/replies",
        &strings(&["reply.created", "REPLY.CREATED"]),
        Some("s3cret"),
        "admin",
    )
    .unwrap();
    assert_eq!(replies.events, vec!["reply.created"]);
    assert!(replies.id.starts_with("wh_"));

    store.clock().advance(Duration::seconds(1));
    let all = create_webhook(&store, "http://localhost:9000/all", &strings(&["*"]), None, "admin")
        .unwrap();

    assert!(matches!(
        create_webhook(&store, "ftp://nope", &strings(&["*"]), None, "admin"),
        Err(HiveError::ValidationError(_))
    ));
    assert!(matches!(
        create_webhook(&store, "https://ok.example.net", &[], None, "admin"),
        Err(HiveError::ValidationError(_))
    ));

    let stored = get_webhook(&store, &replies.id).unwrap();
    assert_eq!(stored.secret.as_deref(), Some("s3cret"));
    assert!(!serde_json::to_string(&stored).unwrap().contains("s3cret"));

    let ids = |kind| -> Vec<String> {
        webhooks_for_event(&store, kind)
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect()
    };
    assert_eq!(ids(EventKind::ReplyCreated), vec![replies.id.clone(), all.id.clone()]);
    assert_eq!(ids(EventKind::ThreadCreated), vec![all.id.clone()]);

    set_webhook_active(&store, &all.id, false).unwrap();
    assert!(ids(EventKind::ThreadCreated).is_empty());
    assert_eq!(list_webhooks(&store, false).unwrap().len(), 2);
    assert_eq!(list_webhooks(&store, true).unwrap().len(), 1);

    delete_webhook(&store, &replies.id).unwrap();
    assert!(matches!(
        delete_webhook(&store, &replies.id),
        Err(HiveError::NotFound(_))
    ));
    assert!(matches!(
        get_webhook(&store, &replies.id),
        Err(HiveError::NotFound(_))
    ));
}

#[test]
fn test_forum_stats() {
    let (_tmp, store) = setup();
    for name in ["alice", "bob"] {
        register_agent(&store, name, Role::Agent, None).unwrap();
    }
    let a = create_post(&store, "alice", Some("A"), "first @bob", &[], &[], None).unwrap();
    store.clock().advance(Duration::minutes(1));
    let b = create_post(&store, "bob", Some("B"), "second", &[], &[], None).unwrap();
    store.clock().advance(Duration::minutes(1));
    create_reply(&store, "bob", &a.id, "reply", &[]).unwrap();
    update_post_status(&store, &b.id, Status::Closed).unwrap();
    update_post_status(&store, &a.id, Status::Pinned).unwrap();

    let stats = forum_stats(&store).unwrap();
    assert_eq!(stats.agents, 2);
    assert_eq!(stats.threads, 2);
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.open_threads, 0);
    assert_eq!(stats.closed_threads, 1);
    assert_eq!(stats.pinned_threads, 1);
    assert_eq!(stats.archived_threads, 0);
    assert_eq!(stats.boards, 1);
    // bob: mention, alice: reply
    assert_eq!(stats.notifications, 2);
    assert_eq!(stats.unread_notifications, 2);

    mark_all_notifications_read(&store, "bob").unwrap();
    assert_eq!(forum_stats(&store).unwrap().unread_notifications, 1);
}
