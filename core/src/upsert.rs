use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::HistoryError;
use crate::models::{AccountRef, ChatDescriptor, FileInfo, Message, Protocol, ThreadKind, Visibility};
use crate::phone::PhoneNormalizer;

/// Maps caller-supplied identifiers to the usernames rows are keyed by.
#[derive(Clone, Copy)]
pub struct IdentityResolver<'a> {
    normalizer: &'a dyn PhoneNormalizer,
    default_country: Option<&'a str>,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(normalizer: &'a dyn PhoneNormalizer, default_country: Option<&'a str>) -> Self {
        Self {
            normalizer,
            default_country,
        }
    }

    pub fn username(&self, protocol: Protocol, identifier: &str, country: Option<&str>) -> String {
        let trimmed = identifier.trim();
        match protocol {
            Protocol::Xmpp => trimmed.split('/').next().unwrap_or(trimmed).to_string(),
            p if p.is_telephony() && !trimmed.contains('@') => self
                .normalizer
                .normalize(trimmed, country.or(self.default_country))
                .unwrap_or_else(|| trimmed.to_string()),
            _ => trimmed.to_string(),
        }
    }

    pub fn account_username(&self, account: &AccountRef) -> String {
        self.username(account.protocol, &account.username, account.country_code.as_deref())
    }

    /// Direct chats are named after the peer, so they normalize like a user.
    pub fn thread_name(&self, account: &AccountRef, name: &str, kind: ThreadKind) -> String {
        match kind {
            ThreadKind::Direct => self.username(account.protocol, name, account.country_code.as_deref()),
            ThreadKind::Group => name.trim().to_string(),
        }
    }
}

/// `INSERT OR IGNORE` followed by a select on the natural key.
///
/// The generated row id is never taken from the insert: an ignored insert
/// leaves `last_insert_rowid` pointing at some unrelated row.
pub fn insert_or_select(
    conn: &Connection,
    table: &str,
    key: &[(&str, &dyn ToSql)],
    extra: &[(&str, &dyn ToSql)],
) -> Result<i64, HistoryError> {
    if key.is_empty() {
        return Err(HistoryError::InvalidArgument(format!("{table}: empty natural key")));
    }
    let columns: Vec<&str> = key.iter().chain(extra.iter()).map(|(col, _)| *col).collect();
    let values: Vec<&dyn ToSql> = key.iter().chain(extra.iter()).map(|(_, value)| *value).collect();
    let placeholders = (1..=columns.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT OR IGNORE INTO {table} ({}) VALUES ({placeholders});",
        columns.join(", ")
    );
    conn.prepare_cached(&insert)?.execute(values.as_slice())?;

    let filter = key
        .iter()
        .enumerate()
        .map(|(idx, (col, _))| format!("{col} = ?{}", idx + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let select = format!("SELECT id FROM {table} WHERE {filter};");
    let key_values: Vec<&dyn ToSql> = key.iter().map(|(_, value)| *value).collect();
    let id = conn
        .prepare_cached(&select)?
        .query_row(key_values.as_slice(), |row| row.get(0))?;
    Ok(id)
}

pub fn find_or_create_user(
    conn: &Connection,
    resolver: &IdentityResolver,
    protocol: Protocol,
    identifier: &str,
    country: Option<&str>,
) -> Result<i64, HistoryError> {
    let username = resolver.username(protocol, identifier, country);
    let kind = protocol.user_kind_for(&username).code();
    insert_or_select(
        conn,
        "users",
        &[("username", &username as &dyn ToSql), ("type", &kind as &dyn ToSql)],
        &[],
    )
}

pub fn find_or_create_account(conn: &Connection, user_id: i64, protocol: Protocol) -> Result<i64, HistoryError> {
    let protocol = protocol.code();
    insert_or_select(
        conn,
        "accounts",
        &[("user_id", &user_id as &dyn ToSql), ("protocol", &protocol as &dyn ToSql)],
        &[],
    )
}

pub fn resolve_account(conn: &Connection, resolver: &IdentityResolver, account: &AccountRef) -> Result<i64, HistoryError> {
    let owner = find_or_create_user(
        conn,
        resolver,
        account.protocol,
        &account.username,
        account.country_code.as_deref(),
    )?;
    find_or_create_account(conn, owner, account.protocol)
}

/// Creates the thread or refreshes its alias and, when the descriptor carries
/// one, its visibility.
pub fn find_or_create_thread(
    conn: &Connection,
    resolver: &IdentityResolver,
    chat: &ChatDescriptor,
) -> Result<i64, HistoryError> {
    let account_id = resolve_account(conn, resolver, &chat.account)?;
    let name = resolver.thread_name(&chat.account, &chat.name, chat.kind);
    let kind = chat.kind.code();
    conn.prepare_cached(
        "INSERT INTO threads (name, alias, account_id, type, encrypted, visibility) \
         VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 0)) \
         ON CONFLICT(name, account_id, type) DO UPDATE SET \
           alias = COALESCE(excluded.alias, threads.alias), \
           visibility = COALESCE(?6, threads.visibility);",
    )?
    .execute(params![
        name,
        chat.alias,
        account_id,
        kind,
        chat.encrypted as i64,
        chat.visibility.map(Visibility::code),
    ])?;
    let id = conn
        .prepare_cached("SELECT id FROM threads WHERE name = ?1 AND account_id = ?2 AND type = ?3;")?
        .query_row(params![name, account_id, kind], |row| row.get(0))?;
    Ok(id)
}

/// Looks a thread up without creating anything on the way.
pub fn find_thread(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    name: &str,
    kind: ThreadKind,
) -> Result<Option<i64>, HistoryError> {
    let owner = resolver.account_username(account);
    let owner_kind = account.protocol.user_kind_for(&owner).code();
    let name = resolver.thread_name(account, name, kind);
    let id = conn
        .prepare_cached(
            "SELECT t.id FROM threads t \
             JOIN accounts a ON a.id = t.account_id \
             JOIN users u ON u.id = a.user_id \
             WHERE u.username = ?1 AND u.type = ?2 AND a.protocol = ?3 \
               AND t.name = ?4 AND t.type = ?5;",
        )?
        .query_row(
            params![owner, owner_kind, account.protocol.code(), name, kind.code()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn add_thread_member(conn: &Connection, thread_id: i64, user_id: i64) -> Result<i64, HistoryError> {
    insert_or_select(
        conn,
        "thread_members",
        &[("thread_id", &thread_id as &dyn ToSql), ("user_id", &user_id as &dyn ToSql)],
        &[],
    )
}

pub fn find_or_create_mime_type(conn: &Connection, name: &str) -> Result<i64, HistoryError> {
    insert_or_select(conn, "mime_type", &[("name", &name as &dyn ToSql)], &[])
}

/// Stores a file keyed by URL, updating the existing row when the URL is
/// already known, plus the image/video/audio row its MIME type calls for.
/// An `Unknown` status never replaces a known one.
pub fn upsert_file(conn: &Connection, file: &FileInfo) -> Result<i64, HistoryError> {
    if file.url.is_empty() {
        return Err(HistoryError::InvalidArgument("file url is empty".to_string()));
    }
    let mime = file.mime_type.as_deref().map(str::trim).filter(|m| !m.is_empty());
    let mime_type_id = match mime {
        Some(mime) => Some(find_or_create_mime_type(conn, mime)?),
        None => None,
    };
    conn.prepare_cached(
        "INSERT INTO files (name, url, path, mime_type_id, size, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(url) DO UPDATE SET \
           name = COALESCE(excluded.name, files.name), \
           path = COALESCE(excluded.path, files.path), \
           mime_type_id = COALESCE(excluded.mime_type_id, files.mime_type_id), \
           size = COALESCE(excluded.size, files.size), \
           status = CASE WHEN excluded.status = 0 THEN files.status ELSE excluded.status END;",
    )?
    .execute(params![
        file.name,
        file.url,
        file.path,
        mime_type_id,
        file.size,
        file.status.code(),
    ])?;
    let file_id: i64 = conn
        .prepare_cached("SELECT id FROM files WHERE url = ?1;")?
        .query_row(params![file.url], |row| row.get(0))?;

    match mime {
        Some(m) if m.starts_with("image/") => {
            conn.prepare_cached(
                "INSERT INTO images (file_id, width, height) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(file_id) DO UPDATE SET \
                   width = COALESCE(excluded.width, images.width), \
                   height = COALESCE(excluded.height, images.height);",
            )?
            .execute(params![file_id, file.width, file.height])?;
        }
        Some(m) if m.starts_with("video/") => {
            conn.prepare_cached(
                "INSERT INTO videos (file_id, width, height, duration) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(file_id) DO UPDATE SET \
                   width = COALESCE(excluded.width, videos.width), \
                   height = COALESCE(excluded.height, videos.height), \
                   duration = COALESCE(excluded.duration, videos.duration);",
            )?
            .execute(params![file_id, file.width, file.height, file.duration])?;
        }
        Some(m) if m.starts_with("audio/") => {
            conn.prepare_cached(
                "INSERT INTO audio (file_id, duration) VALUES (?1, ?2) \
                 ON CONFLICT(file_id) DO UPDATE SET \
                   duration = COALESCE(excluded.duration, audio.duration);",
            )?
            .execute(params![file_id, file.duration])?;
        }
        _ => {}
    }
    Ok(file_id)
}

/// Inserts a message row; a row with the same (uid, thread, body, time)
/// only gets its status replaced.
pub fn upsert_message(
    conn: &Connection,
    thread_id: i64,
    sender_id: Option<i64>,
    message: &Message,
    body: &str,
    preview_id: Option<i64>,
) -> Result<(), HistoryError> {
    conn.prepare_cached(
        "INSERT INTO messages \
         (uid, thread_id, sender_id, user_alias, body, body_type, direction, time, status, encrypted, preview_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(uid, thread_id, body, time) DO UPDATE SET status = excluded.status;",
    )?
    .execute(params![
        message.uid,
        thread_id,
        sender_id,
        message.sender_alias,
        body,
        message.body_type.code(),
        message.direction.code(),
        message.time,
        message.status.code(),
        message.encrypted as i64,
        preview_id,
    ])?;
    Ok(())
}
