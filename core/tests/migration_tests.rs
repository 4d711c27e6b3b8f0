use std::fs;
use std::path::Path;

use history_core::db::{apply_migrations, schema_version};
use history_core::migrations::{CURRENT_VERSION, LEGACY_SCHEMA, V1_SCHEMA};
use history_core::models::{AccountRef, ChatDescriptor, Direction, MessageType, Protocol};
use history_core::{query, DialingCodeNormalizer, HistoryConfig, HistoryError, HistoryStore, IdentityResolver};
use rusqlite::Connection;

fn table_exists(conn: &Connection, name: &str) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?1;",
            [name],
            |row| row.get(0),
        )
        .expect("sqlite_master");
    count == 1
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table});"))
        .expect("pragma");
    let mut rows = stmt.query([]).expect("rows");
    while let Some(row) = rows.next().expect("row") {
        let name: String = row.get(1).expect("name");
        if name == column {
            return true;
        }
    }
    false
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(1) FROM {table};"), [], |row| row.get(0))
        .expect("count")
}

fn backups_in(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("history.db."))
        .collect()
}

fn write_legacy_fixture(path: &Path) {
    let conn = Connection::open(path).expect("fixture db");
    conn.execute_batch(LEGACY_SCHEMA).expect("legacy schema");
    let im_rows: &[(i64, i64, &str, &str, &str, Option<&str>)] = &[
        (1000, 1, "me@jabber.org", "bob@jabber.org/phone", "u1", Some("hi")),
        (1001, -1, "me@jabber.org", "bob@jabber.org", "u2", Some("hello back")),
        (1002, 1, "me@jabber.org", "bob@jabber.org", "", Some("no uid")),
        (1003, 1, "me@jabber.org", "bob@jabber.org", "u4", None),
        (3000, 1, "SMS", "(555) 000-1111", "s1", Some("text me")),
    ];
    for (timestamp, direction, account, who, uid, message) in im_rows {
        conn.execute(
            "INSERT INTO im_log (timestamp, direction, account, who, uid, message) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            rusqlite::params![timestamp, direction, account, who, uid, message],
        )
        .expect("im row");
    }
    conn.execute(
        "INSERT INTO chat_log (timestamp, direction, account, room, who, uid, message, alias) \
         VALUES (2000, 1, '@me:matrix.org', '!room:matrix.org', '@carol:matrix.org', 'c1', 'hey room', 'Carol');",
        [],
    )
    .expect("chat row");
    conn.execute(
        "INSERT INTO chat_log (timestamp, direction, account, room, who, uid, message, alias) \
         VALUES (2001, -1, '@me:matrix.org', '!room:matrix.org', NULL, 'c2', 'reply', NULL);",
        [],
    )
    .expect("chat row");
}

#[test]
fn fresh_database_gets_current_schema() {
    let mut conn = Connection::open_in_memory().expect("memory db");
    let resolver = IdentityResolver::new(&DialingCodeNormalizer, None);
    let version = apply_migrations(&mut conn, None, &resolver).expect("migrate");
    assert_eq!(version, CURRENT_VERSION);
    for table in [
        "mime_type",
        "files",
        "images",
        "videos",
        "audio",
        "users",
        "accounts",
        "threads",
        "thread_members",
        "messages",
    ] {
        assert!(table_exists(&conn, table), "{table} missing");
    }
    assert!(column_exists(&conn, "threads", "visibility"));
    assert!(column_exists(&conn, "messages", "preview_id"));

    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")
        .expect("prepare");
    let indexes: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    drop(stmt);
    assert_eq!(indexes, vec!["idx_messages_thread_time", "idx_threads_account"]);

    // A second pass is a no-op.
    assert_eq!(apply_migrations(&mut conn, None, &resolver).expect("again"), CURRENT_VERSION);
}

#[test]
fn version_one_media_is_split_into_files() {
    let mut conn = Connection::open_in_memory().expect("memory db");
    conn.execute_batch(V1_SCHEMA).expect("v1 schema");
    conn.execute_batch(
        "INSERT INTO users (id, username, alias, type) VALUES (1, 'me@example.org', NULL, 3);
         INSERT INTO users (id, username, alias, type) VALUES (2, 'bob@example.org', 'Bob', 3);
         INSERT INTO accounts (id, user_id, password, enabled, protocol) VALUES (1, 1, NULL, 1, 4);
         INSERT INTO threads (id, name, alias, account_id, type, encrypted, last_read_id)
           VALUES (1, 'bob@example.org', 'Bob', 1, 0, 0, NULL);
         INSERT INTO thread_members (id, thread_id, user_id) VALUES (1, 1, 2);
         INSERT INTO messages (id, uid, thread_id, sender_id, user_alias, body, body_type, direction, time, status, encrypted)
           VALUES (1, 'm1', 1, 2, 'Bob', 'https://example.org/cat.png', 6, 1, 100, 2, 0);
         UPDATE threads SET last_read_id = 1 WHERE id = 1;
         INSERT INTO media (id, name, url, path, mime_type, size, width, height, duration, status)
           VALUES (1, 'cat.png', 'https://example.org/cat.png', NULL, 'image/png', 2048, 640, 480, NULL, 1);
         INSERT INTO media (id, name, url, path, mime_type, size, width, height, duration, status)
           VALUES (2, 'song.ogg', 'https://example.org/song.ogg', NULL, 'audio/ogg', 100, NULL, NULL, 30, 0);
         PRAGMA user_version = 1;",
    )
    .expect("v1 rows");

    let resolver = IdentityResolver::new(&DialingCodeNormalizer, None);
    let version = apply_migrations(&mut conn, None, &resolver).expect("migrate");
    assert_eq!(version, CURRENT_VERSION);
    assert_eq!(schema_version(&conn).expect("version"), CURRENT_VERSION);

    assert!(!table_exists(&conn, "media"));
    assert!(!table_exists(&conn, "users_new"));
    assert!(!table_exists(&conn, "threads_new"));
    assert_eq!(count(&conn, "files"), 2);
    assert_eq!(count(&conn, "images"), 1);
    assert_eq!(count(&conn, "audio"), 1);
    assert_eq!(count(&conn, "videos"), 0);
    assert_eq!(count(&conn, "mime_type"), 2);
    assert!(column_exists(&conn, "users", "avatar_id"));
    assert!(column_exists(&conn, "threads", "avatar_id"));
    assert!(column_exists(&conn, "messages", "preview_id"));

    let (alias, visibility, last_read_id): (Option<String>, i64, Option<i64>) = conn
        .query_row("SELECT alias, visibility, last_read_id FROM threads WHERE id = 1;", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .expect("thread");
    assert_eq!(alias.as_deref(), Some("Bob"));
    assert_eq!(visibility, 0);
    assert_eq!(last_read_id, Some(1));

    let chat = ChatDescriptor::direct(AccountRef::new("me@example.org", Protocol::Xmpp), "bob@example.org");
    let messages = query::get_messages(&conn, &resolver, &chat, None, 10).expect("messages");
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.body_type, MessageType::Image);
    assert_eq!(message.sender.as_deref(), Some("bob@example.org"));
    let file = message.file.as_ref().expect("attachment");
    assert_eq!(file.name.as_deref(), Some("cat.png"));
    assert_eq!(file.mime_type.as_deref(), Some("image/png"));
    assert_eq!((file.width, file.height), (Some(640), Some(480)));
    assert_eq!(file.size, Some(2048));
}

#[test]
fn version_two_gains_thread_visibility() {
    let mut conn = Connection::open_in_memory().expect("memory db");
    let resolver = IdentityResolver::new(&DialingCodeNormalizer, None);
    conn.execute_batch(V1_SCHEMA).expect("v1 schema");
    conn.execute_batch("PRAGMA user_version = 1;").expect("pragma");
    apply_migrations(&mut conn, None, &resolver).expect("migrate");
    assert_eq!(schema_version(&conn).expect("version"), 3);

    // Roll the visibility column back out to get a version 2 layout.
    conn.execute_batch(
        "ALTER TABLE threads DROP COLUMN visibility;
         PRAGMA user_version = 2;",
    )
    .expect("downgrade");
    assert!(!column_exists(&conn, "threads", "visibility"));
    assert_eq!(apply_migrations(&mut conn, None, &resolver).expect("migrate"), 3);
    assert!(column_exists(&conn, "threads", "visibility"));
}

#[test]
fn legacy_tables_are_migrated_on_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HistoryConfig::in_dir(dir.path()).with_country_code("US");
    write_legacy_fixture(&config.db_path());

    let store = HistoryStore::with_default_normalizer(config.clone());
    store.open().expect("open");

    let xmpp = AccountRef::new("me@jabber.org", Protocol::Xmpp);
    assert!(store.im_exists(&xmpp, "bob@jabber.org").expect("im exists"));
    let bob = ChatDescriptor::direct(xmpp.clone(), "bob@jabber.org");
    let messages = store.get_messages(&bob, None, 10).expect("messages");
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].uid, "u1");
    assert_eq!(messages[0].sender.as_deref(), Some("bob@jabber.org"));
    assert_eq!(messages[1].direction, Direction::Outgoing);
    assert_eq!(messages[1].sender, None);
    assert_eq!(messages[2].body, "no uid");
    assert_eq!(messages[2].uid.len(), 36);

    let sms = AccountRef::new("SMS", Protocol::MmsSms);
    assert!(store.im_exists(&sms, "555-000-1111").expect("sms exists"));
    assert_eq!(store.im_timestamp(&sms, "s1").expect("sms time"), 3000);

    let matrix = AccountRef::new("@me:matrix.org", Protocol::Matrix);
    assert!(store.chat_exists(&matrix, "!room:matrix.org").expect("room exists"));
    assert_eq!(store.chat_timestamp(&matrix, "!room:matrix.org", "c1").expect("c1"), 2000);
    assert_eq!(store.last_message_time(&matrix, "!room:matrix.org").expect("last"), 2001);
    let room = ChatDescriptor::group(matrix, "!room:matrix.org");
    let members = store.chat_members(&room).expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].username, "@carol:matrix.org");
    let room_messages = store.get_messages(&room, None, 10).expect("room messages");
    assert_eq!(room_messages[0].sender_alias.as_deref(), Some("Carol"));
    store.close().expect("close");

    let conn = Connection::open(config.db_path()).expect("reopen");
    assert_eq!(schema_version(&conn).expect("version"), CURRENT_VERSION);
    assert!(!table_exists(&conn, "im_log"));
    assert!(!table_exists(&conn, "chat_log"));
    assert_eq!(count(&conn, "messages"), 6);
    assert_eq!(count(&conn, "threads"), 3);
    assert_eq!(count(&conn, "users"), 6);
    assert_eq!(backups_in(dir.path()).len(), 1);
}

#[test]
fn backup_can_be_disabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = HistoryConfig::in_dir(dir.path());
    config.backup_before_migration = false;
    write_legacy_fixture(&config.db_path());

    let store = HistoryStore::with_default_normalizer(config);
    store.open().expect("open");
    store.close().expect("close");
    assert!(backups_in(dir.path()).is_empty());
}

#[test]
fn fresh_file_is_not_backed_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = HistoryStore::with_default_normalizer(HistoryConfig::in_dir(dir.path().join("profile")));
    store.open().expect("open");
    store.close().expect("close");
    assert!(dir.path().join("profile").join("history.db").exists());
    assert!(backups_in(&dir.path().join("profile")).is_empty());
}

#[test]
fn newer_schema_leaves_store_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HistoryConfig::in_dir(dir.path());
    {
        let conn = Connection::open(config.db_path()).expect("db");
        conn.execute_batch("CREATE TABLE future (id INTEGER); PRAGMA user_version = 7;")
            .expect("future schema");
    }
    let store = HistoryStore::with_default_normalizer(config);
    let err = store.open().unwrap_err();
    assert!(matches!(err, HistoryError::UnsupportedVersion(7)));
    assert!(!store.is_open());
    let account = AccountRef::new("me@example.org", Protocol::Xmpp);
    assert!(matches!(store.im_exists(&account, "bob@example.org"), Err(HistoryError::NotOpen)));
}

#[test]
fn failed_step_keeps_old_version_and_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = HistoryConfig::in_dir(dir.path());
    {
        let conn = Connection::open(config.db_path()).expect("db");
        conn.execute_batch(V1_SCHEMA).expect("v1 schema");
        conn.execute_batch("DROP TABLE media; PRAGMA user_version = 1;")
            .expect("broken v1");
    }

    let store = HistoryStore::with_default_normalizer(config.clone());
    let err = store.open().unwrap_err();
    assert!(matches!(err, HistoryError::Migration { from: 1, .. }));
    assert!(!store.is_open());
    drop(store);

    let conn = Connection::open(config.db_path()).expect("reopen");
    assert_eq!(schema_version(&conn).expect("version"), 1);
    assert!(!table_exists(&conn, "mime_type"));
    assert!(!table_exists(&conn, "files"));
    assert!(!column_exists(&conn, "users", "avatar_id"));
    assert_eq!(backups_in(dir.path()).len(), 1);
}
