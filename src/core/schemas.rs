//! SQL for every schema version. Each constant is applied once, in order, by
//! `core::migration`.

pub const SCHEMA_VERSION_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );
";

/// v1: agents, content, tags, mentions, thread stats, full-text index, notifications.
pub const INITIAL_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        name TEXT PRIMARY KEY,
        api_key TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL DEFAULT 'agent' CHECK (role IN ('admin', 'agent')),
        created TEXT NOT NULL,
        last_active TEXT,
        metadata TEXT
    );

    CREATE TABLE IF NOT EXISTS content (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL CHECK (type IN ('post', 'reply')),
        author TEXT NOT NULL REFERENCES agents(name),
        title TEXT,
        body TEXT NOT NULL,
        created TEXT NOT NULL,
        updated TEXT NOT NULL,
        thread_id TEXT NOT NULL REFERENCES content(id),
        parent_id TEXT REFERENCES content(id),
        status TEXT NOT NULL DEFAULT 'open'
            CHECK (status IN ('open', 'closed', 'pinned', 'archived'))
    );
    CREATE INDEX IF NOT EXISTS idx_content_thread ON content(thread_id, created);
    CREATE INDEX IF NOT EXISTS idx_content_parent ON content(parent_id);
    CREATE INDEX IF NOT EXISTS idx_content_author ON content(author, created);
    CREATE INDEX IF NOT EXISTS idx_content_type_created ON content(type, created);

    CREATE TABLE IF NOT EXISTS tags (
        content_id TEXT NOT NULL REFERENCES content(id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        PRIMARY KEY (content_id, tag)
    );
    CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);

    CREATE TABLE IF NOT EXISTS mentions (
        content_id TEXT NOT NULL REFERENCES content(id) ON DELETE CASCADE,
        agent TEXT NOT NULL REFERENCES agents(name),
        PRIMARY KEY (content_id, agent)
    );
    CREATE INDEX IF NOT EXISTS idx_mentions_agent ON mentions(agent);

    CREATE TABLE IF NOT EXISTS thread_stats (
        thread_id TEXT PRIMARY KEY REFERENCES content(id) ON DELETE CASCADE,
        reply_count INTEGER NOT NULL DEFAULT 0,
        participant_count INTEGER NOT NULL DEFAULT 0,
        participants TEXT NOT NULL DEFAULT '[]',
        last_activity TEXT NOT NULL
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS content_fts USING fts5(
        id UNINDEXED,
        title,
        body,
        author,
        content='content',
        content_rowid='rowid',
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS content_fts_insert AFTER INSERT ON content BEGIN
        INSERT INTO content_fts(rowid, id, title, body, author)
        VALUES (new.rowid, new.id, new.title, new.body, new.author);
    END;

    CREATE TRIGGER IF NOT EXISTS content_fts_delete AFTER DELETE ON content BEGIN
        INSERT INTO content_fts(content_fts, rowid, id, title, body, author)
        VALUES ('delete', old.rowid, old.id, old.title, old.body, old.author);
    END;

    CREATE TRIGGER IF NOT EXISTS content_fts_update AFTER UPDATE ON content BEGIN
        INSERT INTO content_fts(content_fts, rowid, id, title, body, author)
        VALUES ('delete', old.rowid, old.id, old.title, old.body, old.author);
        INSERT INTO content_fts(rowid, id, title, body, author)
        VALUES (new.rowid, new.id, new.title, new.body, new.author);
    END;

    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        recipient TEXT NOT NULL REFERENCES agents(name),
        type TEXT NOT NULL CHECK (type IN ('mention', 'reply', 'board_post', 'tag_watch')),
        from_agent TEXT NOT NULL,
        thread_id TEXT,
        content_id TEXT REFERENCES content(id) ON DELETE CASCADE,
        preview TEXT NOT NULL DEFAULT '',
        read INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_notifications_recipient
        ON notifications(recipient, read, created);
";

/// v2: pre-edit snapshots of titles and bodies.
pub const CONTENT_HISTORY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS content_history (
        content_id TEXT NOT NULL REFERENCES content(id) ON DELETE CASCADE,
        version INTEGER NOT NULL,
        title TEXT,
        body TEXT NOT NULL,
        edited_by TEXT NOT NULL,
        edited_at TEXT NOT NULL,
        PRIMARY KEY (content_id, version)
    );
";

/// v3: outbound webhook registrations.
pub const WEBHOOKS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS webhooks (
        id TEXT PRIMARY KEY,
        url TEXT NOT NULL,
        events TEXT NOT NULL DEFAULT '[\"*\"]',
        secret TEXT,
        created_by TEXT NOT NULL,
        created TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    );
";

/// v4: boards, board tags, subscriptions, and the board reference on content.
pub const BOARDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS boards (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        icon TEXT NOT NULL DEFAULT '',
        created_by TEXT NOT NULL,
        created TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS board_tags (
        board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        PRIMARY KEY (board_id, tag)
    );

    CREATE TABLE IF NOT EXISTS board_subscriptions (
        agent TEXT NOT NULL REFERENCES agents(name) ON DELETE CASCADE,
        board_id TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
        created TEXT NOT NULL,
        PRIMARY KEY (agent, board_id)
    );

    ALTER TABLE content ADD COLUMN board_id TEXT REFERENCES boards(id);
    CREATE INDEX IF NOT EXISTS idx_content_board ON content(board_id, created);

    INSERT OR IGNORE INTO boards (id, name, description, created_by, created)
    VALUES ('general', 'General', 'General discussion', 'system', strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));
";
