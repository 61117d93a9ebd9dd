use chrono::{DateTime, Duration, TimeZone, Utc};
use hive::core::error::HiveError;
use hive::core::store::Store;
use hive::core::time::Clock;
use hive::plugins::agents::{Role, get_agent, register_agent};
use hive::plugins::content::{
    Content, ContentKind, Status, create_post, create_reply, get_content,
};
use hive::plugins::export::{
    ExportOptions, JsonExport, export_json, export_markdown, render_markdown_file,
    write_markdown_export,
};
use hive::plugins::fanout::get_thread_stats;
use hive::plugins::import::{import_from_path, import_json, import_json_document, import_markdown};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::{TempDir, tempdir};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 12, 7, 45, 0).unwrap()
}

fn open(dir: &Path) -> Store {
    Store::open_with_clock(dir, Clock::fixed(t0())).unwrap()
}

fn count(store: &Store, table: &str) -> i64 {
    let conn = rusqlite::Connection::open(store.db_path()).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

struct Source {
    _tmp: TempDir,
    store: Store,
    post: String,
    deep: String,
}

fn source() -> Source {
    let tmp = tempdir().unwrap();
    let store = open(tmp.path());
    for name in ["alice", "bob", "carol"] {
        register_agent(&store, name, Role::Agent, None).unwrap();
    }
    let post = create_post(
        &store,
        "alice",
        Some("Migration"),
        "Moving to the new cluster, @bob please review.",
        &["infra".to_string(), "q4".to_string()],
        &[],
        None,
    )
    .unwrap();
    store.clock().advance(Duration::minutes(1));
    let r1 = create_reply(&store, "bob", &post.id, "Looks fine, cc @carol", &[]).unwrap();
    store.clock().advance(Duration::minutes(1));
    let r2 = create_reply(&store, "carol", &r1.id, "One concern about DNS.", &[]).unwrap();
    store.clock().advance(Duration::minutes(1));
    let deep = create_reply(&store, "alice", &r2.id, "Covered in step 4.", &[]).unwrap();
    store.clock().advance(Duration::minutes(1));
    create_post(&store, "carol", Some("Other"), "Separate thread.", &[], &[], None).unwrap();
    Source {
        _tmp: tmp,
        store,
        post: post.id,
        deep: deep.id,
    }
}

#[test]
fn test_json_round_trip_preserves_row_counts() {
    let src = source();
    let doc = export_json(&src.store, &ExportOptions::default()).unwrap();
    assert_eq!(doc.content.len(), 5);
    assert_eq!(doc.tags.len(), 1);
    assert!(!doc.notifications.is_empty());
    let text = serde_json::to_string_pretty(&doc).unwrap();
    assert!(!text.contains("api_key"));

    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    let report = import_json(&dst, &text).unwrap();
    assert_eq!(report.posts, 2);
    assert_eq!(report.replies, 3);

    for table in ["content", "tags", "mentions", "notifications"] {
        assert_eq!(count(&src.store, table), count(&dst, table), "{table}");
    }
    assert_eq!(
        get_thread_stats(&src.store, &src.post).unwrap(),
        get_thread_stats(&dst, &src.post).unwrap()
    );
    assert_eq!(get_agent(&dst, "bob").unwrap().role, Role::Agent);
}

#[test]
fn test_json_import_resolves_replies_out_of_order() {
    let src = source();
    let mut doc = export_json(&src.store, &ExportOptions::default()).unwrap();
    doc.content.reverse();

    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    let report = hive::plugins::import::import_json_document(&dst, &doc).unwrap();
    assert_eq!(report.replies, 3);
    assert!(report.passes >= 2);
    assert_eq!(count(&dst, "content"), 5);
}

#[test]
fn test_thread_scoped_export() {
    let src = source();
    let opts = ExportOptions {
        thread_id: Some(src.post.clone()),
        since: None,
    };
    let doc = export_json(&src.store, &opts).unwrap();
    assert_eq!(doc.content.len(), 4);
    assert!(doc.content.iter().all(|c| c.thread_id == src.post));
    assert!(
        doc.notifications
            .iter()
            .all(|n| n.content_id.as_ref().is_none_or(|id| doc.content.iter().any(|c| &c.id == id)))
    );

    let files = export_markdown(&src.store, &opts).unwrap();
    assert_eq!(files.len(), 4);
    assert_eq!(files[0].path, format!("threads/{}/post.md", src.post));
    let deep = files.iter().find(|f| f.path.ends_with(&format!("/{}.md", src.deep))).unwrap();
    assert_eq!(deep.path.matches('/').count(), 5);
}

#[test]
fn test_markdown_round_trip_handles_children_before_parents() {
    let src = source();
    let out = tempdir().unwrap();
    let written = write_markdown_export(&src.store, out.path(), &ExportOptions::default()).unwrap();
    assert_eq!(written, 5);
    assert!(out.path().join("threads").join(&src.post).join("post.md").is_file());

    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    let report = import_from_path(&dst, out.path()).unwrap();
    assert_eq!(report.posts + report.replies, 5);
    assert_eq!(count(&dst, "content"), 5);
    assert_eq!(count(&src.store, "tags"), count(&dst, "tags"));
    let stats = get_thread_stats(&dst, &src.post).unwrap().unwrap();
    assert_eq!(stats.reply_count, 3);
    assert_eq!(stats.participants, vec!["alice", "bob", "carol"]);
}

fn item(id: &str, kind: ContentKind, parent: Option<&str>) -> Content {
    Content {
        id: id.into(),
        kind,
        author: "dana".into(),
        title: None,
        body: format!("body of {id}"),
        created: "2024-01-01T00:00:00Z".into(),
        updated: "2024-01-01T00:00:00Z".into(),
        thread_id: "root".into(),
        parent_id: parent.map(str::to_string),
        status: Status::Open,
        board_id: None,
        tags: vec![],
    }
}

fn write_items(dir: &Path, items: &[Content]) {
    for (i, c) in items.iter().enumerate() {
        fs::write(dir.join(format!("{i:02}.md")), render_markdown_file(c).unwrap()).unwrap();
    }
}

#[test]
fn test_markdown_import_creates_missing_agents() {
    let files = tempdir().unwrap();
    write_items(
        files.path(),
        &[
            item("child", ContentKind::Reply, Some("mid")),
            item("mid", ContentKind::Reply, Some("root")),
            item("root", ContentKind::Post, None),
        ],
    );
    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    let report = import_markdown(&dst, files.path()).unwrap();
    assert_eq!(report.replies, 2);
    assert_eq!(report.agents_created, 1);
    assert!(get_agent(&dst, "dana").is_ok());
}

#[test]
fn test_markdown_import_rejects_missing_ancestors_and_cycles() {
    let files = tempdir().unwrap();
    write_items(
        files.path(),
        &[
            item("root", ContentKind::Post, None),
            item("a", ContentKind::Reply, Some("b")),
            item("b", ContentKind::Reply, Some("a")),
            item("lost", ContentKind::Reply, Some("never-exported")),
            item("fine", ContentKind::Reply, Some("root")),
        ],
    );
    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    match import_markdown(&dst, files.path()) {
        Err(HiveError::UnresolvedReferences { count, ids }) => {
            assert_eq!(count, 3);
            for id in ["a", "b", "lost"] {
                assert!(ids.iter().any(|i| i == id), "{id} missing from {ids:?}");
            }
        }
        other => panic!("expected unresolved references, got {other:?}"),
    }
    assert_eq!(count(&dst, "content"), 0);
    assert_eq!(count(&dst, "agents"), 0);
}

#[test]
fn test_markdown_import_rejects_bad_files() {
    let files = tempdir().unwrap();
    fs::write(files.path().join("broken.md"), "no front matter here").unwrap();
    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    match import_markdown(&dst, files.path()) {
        Err(HiveError::ValidationError(msg)) => assert!(msg.contains("broken.md")),
        other => panic!("expected validation error, got {other:?}"),
    }

    let orphan = tempdir().unwrap();
    write_items(orphan.path(), &[item("r", ContentKind::Reply, None)]);
    assert!(matches!(
        import_markdown(&dst, orphan.path()),
        Err(HiveError::ValidationError(_))
    ));
}

fn document(content: Vec<Content>, tags: BTreeMap<String, Vec<String>>) -> JsonExport {
    JsonExport {
        exported_at: "2024-01-02T00:00:00Z".into(),
        agents: vec![],
        boards: vec![],
        content,
        tags,
        mentions: BTreeMap::new(),
        notifications: vec![],
    }
}

#[test]
fn test_import_rejects_reply_outside_its_parents_thread() {
    let mut other = item("other", ContentKind::Post, None);
    other.thread_id = "other".into();
    let mut stray = item("stray", ContentKind::Reply, Some("root"));
    stray.thread_id = "other".into();
    let doc = document(
        vec![item("root", ContentKind::Post, None), other, stray],
        BTreeMap::new(),
    );

    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    match import_json_document(&dst, &doc) {
        Err(HiveError::ValidationError(msg)) => assert!(msg.contains("stray"), "{msg}"),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(count(&dst, "content"), 0);
    assert_eq!(count(&dst, "thread_stats"), 0);
}

#[test]
fn test_import_rejects_post_that_is_not_its_own_root() {
    let mut post = item("lonely", ContentKind::Post, None);
    post.thread_id = "root".into();
    let doc = document(vec![item("root", ContentKind::Post, None), post], BTreeMap::new());

    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    assert!(matches!(
        import_json_document(&dst, &doc),
        Err(HiveError::ValidationError(_))
    ));
    assert_eq!(count(&dst, "content"), 0);
}

#[test]
fn test_import_keeps_tags_on_posts_only() {
    let mut root = item("root", ContentKind::Post, None);
    root.tags = vec!["ops".into()];
    let mut reply = item("answer", ContentKind::Reply, Some("root"));
    reply.tags = vec!["ignored".into()];
    let mut tags = BTreeMap::new();
    tags.insert("answer".to_string(), vec!["also-ignored".to_string()]);
    tags.insert("root".to_string(), vec!["release".to_string()]);

    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    let report = import_json_document(&dst, &document(vec![root, reply], tags)).unwrap();
    assert_eq!(report.replies, 1);
    assert_eq!(report.tags, 2);

    let conn = rusqlite::Connection::open(dst.db_path()).unwrap();
    let on_reply: i64 = conn
        .query_row("SELECT COUNT(*) FROM tags WHERE content_id = 'answer'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(on_reply, 0);
}

#[test]
fn test_markdown_keeps_board_membership() {
    let tmp = tempdir().unwrap();
    let store = open(tmp.path());
    register_agent(&store, "erin", Role::Agent, None).unwrap();
    let post = create_post(&store, "erin", Some("Boarded"), "In general.", &[], &[], Some("general"))
        .unwrap();
    let reply = create_reply(&store, "erin", &post.id, "Same board as the post.", &[]).unwrap();

    let files = export_markdown(&store, &ExportOptions::default()).unwrap();
    let post_file = files.iter().find(|f| f.path.ends_with("post.md")).unwrap();
    assert!(post_file.content.contains("\"board_id\": \"general\""));

    let out = tempdir().unwrap();
    write_markdown_export(&store, out.path(), &ExportOptions::default()).unwrap();
    let dst_dir = tempdir().unwrap();
    let dst = open(dst_dir.path());
    import_markdown(&dst, out.path()).unwrap();
    assert_eq!(get_content(&dst, &post.id).unwrap().board_id.as_deref(), Some("general"));
    assert_eq!(get_content(&dst, &reply.id).unwrap().board_id.as_deref(), Some("general"));
}
