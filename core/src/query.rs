use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::HistoryError;
use crate::models::{
    AccountRef, ChatDescriptor, ChatSummary, ChatUpdate, Direction, FileInfo, FileStatus, Member, Message,
    MessageStatus, MessageType, ThreadKind, UserKind, UserUpdate, Visibility,
};
use crate::upsert::{
    add_thread_member, find_or_create_thread, find_or_create_user, find_thread, upsert_file, upsert_message,
    IdentityResolver,
};

/// Returned by timestamp lookups when no message matches.
pub const NOT_FOUND_TIME: i64 = i64::MAX;
/// Returned by `last_message_time` for a room without history.
pub const NO_MESSAGE_TIME: i64 = 0;

const FILE_COLUMNS: usize = 9;

fn message_select(filter: &str) -> String {
    format!(
        "SELECT m.uid, u.username, m.user_alias, m.body, m.body_type, m.direction, m.time, m.status, m.encrypted, \
                f.name, f.url, f.path, fmt.name, f.size, f.status, \
                COALESCE(fi.width, fv.width), COALESCE(fi.height, fv.height), COALESCE(fv.duration, fa.duration), \
                p.name, p.url, p.path, pmt.name, p.size, p.status, \
                COALESCE(pi.width, pv.width), COALESCE(pi.height, pv.height), COALESCE(pv.duration, pa.duration) \
         FROM messages m \
         LEFT JOIN users u ON u.id = m.sender_id \
         LEFT JOIN files f ON m.body_type IN ({media}) AND f.url = m.body \
         LEFT JOIN mime_type fmt ON fmt.id = f.mime_type_id \
         LEFT JOIN images fi ON fi.file_id = f.id \
         LEFT JOIN videos fv ON fv.file_id = f.id \
         LEFT JOIN audio fa ON fa.file_id = f.id \
         LEFT JOIN files p ON p.id = m.preview_id \
         LEFT JOIN mime_type pmt ON pmt.id = p.mime_type_id \
         LEFT JOIN images pi ON pi.file_id = p.id \
         LEFT JOIN videos pv ON pv.file_id = p.id \
         LEFT JOIN audio pa ON pa.file_id = p.id \
         {filter}",
        media = MessageType::MEDIA_CODES,
    )
}

fn file_from_row(row: &Row, offset: usize) -> rusqlite::Result<Option<FileInfo>> {
    let url: Option<String> = row.get(offset + 1)?;
    let Some(url) = url else {
        return Ok(None);
    };
    Ok(Some(FileInfo {
        name: row.get(offset)?,
        url,
        path: row.get(offset + 2)?,
        mime_type: row.get(offset + 3)?,
        size: row.get(offset + 4)?,
        status: row
            .get::<_, Option<i64>>(offset + 5)?
            .map(FileStatus::from_code)
            .unwrap_or_default(),
        width: row.get(offset + 6)?,
        height: row.get(offset + 7)?,
        duration: row.get(offset + 8)?,
    }))
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        uid: row.get(0)?,
        sender: row.get(1)?,
        sender_alias: row.get(2)?,
        body: row.get(3)?,
        body_type: MessageType::from_code(row.get(4)?),
        direction: Direction::from_code(row.get(5)?),
        time: row.get(6)?,
        status: row
            .get::<_, Option<i64>>(7)?
            .map(MessageStatus::from_code)
            .unwrap_or_default(),
        encrypted: row.get::<_, i64>(8)? != 0,
        file: file_from_row(row, 9)?,
        preview: file_from_row(row, 9 + FILE_COLUMNS)?,
    })
}

/// Stores a message, creating its account, thread and sender on first sight.
///
/// Storing the same (uid, thread, body, time) again only updates the status,
/// which is how delivery receipts for an already stored message land.
pub fn add_message(
    conn: &Connection,
    resolver: &IdentityResolver,
    chat: &ChatDescriptor,
    message: &Message,
) -> Result<(), HistoryError> {
    let thread_id = find_or_create_thread(conn, resolver, chat)?;
    let sender = message.sender.as_deref().filter(|s| !s.trim().is_empty());
    let sender_id = match sender {
        Some(sender) => Some(find_or_create_user(
            conn,
            resolver,
            chat.account.protocol,
            sender,
            chat.account.country_code.as_deref(),
        )?),
        None => None,
    };
    if message.direction == Direction::Incoming {
        if let Some(sender_id) = sender_id {
            add_thread_member(conn, thread_id, sender_id)?;
        }
    }

    let body = match &message.file {
        Some(file) if message.body_type.is_media() => {
            upsert_file(conn, file)?;
            file.url.as_str()
        }
        _ => message.body.as_str(),
    };
    let preview_id = match &message.preview {
        Some(preview) => Some(upsert_file(conn, preview)?),
        None => None,
    };
    upsert_message(conn, thread_id, sender_id, message, body, preview_id)
}

/// Returns up to `limit` messages older than `before`, oldest first.
///
/// Several messages can share one timestamp, so the cursor is located by
/// walking rows newest first until its uid shows up; ties are ordered by
/// insertion. Without a cursor the newest messages are returned.
pub fn get_messages(
    conn: &Connection,
    resolver: &IdentityResolver,
    chat: &ChatDescriptor,
    before: Option<&Message>,
    limit: usize,
) -> Result<Vec<Message>, HistoryError> {
    if limit == 0 {
        return Err(HistoryError::InvalidArgument("limit must be positive".to_string()));
    }
    let Some(thread_id) = find_thread(conn, resolver, &chat.account, &chat.name, chat.kind)? else {
        return Ok(Vec::new());
    };
    let cursor_time = before.map(|m| m.time).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(&message_select(
        "WHERE m.thread_id = ?1 AND m.time <= ?2 AND m.body != '' \
         ORDER BY m.time DESC, m.id DESC;",
    ))?;
    let mut rows = stmt.query(params![thread_id, cursor_time])?;

    let mut cursor_uid = before.map(|m| m.uid.as_str());
    let mut messages = Vec::with_capacity(limit.min(256));
    while let Some(row) = rows.next()? {
        if let Some(uid) = cursor_uid {
            let row_uid: String = row.get(0)?;
            if row_uid == uid {
                cursor_uid = None;
            }
            continue;
        }
        messages.push(message_from_row(row)?);
        if messages.len() == limit {
            break;
        }
    }
    messages.reverse();
    Ok(messages)
}

pub fn message_count(conn: &Connection, resolver: &IdentityResolver, chat: &ChatDescriptor) -> Result<i64, HistoryError> {
    let Some(thread_id) = find_thread(conn, resolver, &chat.account, &chat.name, chat.kind)? else {
        return Ok(0);
    };
    let count = conn
        .prepare_cached("SELECT COUNT(1) FROM messages WHERE thread_id = ?1;")?
        .query_row(params![thread_id], |row| row.get(0))?;
    Ok(count)
}

fn thread_has_messages(conn: &Connection, thread_id: Option<i64>) -> Result<bool, HistoryError> {
    let Some(thread_id) = thread_id else {
        return Ok(false);
    };
    let exists: Option<i64> = conn
        .prepare_cached("SELECT 1 FROM messages WHERE thread_id = ?1 LIMIT 1;")?
        .query_row(params![thread_id], |row| row.get(0))
        .optional()?;
    Ok(exists.is_some())
}

pub fn chat_exists(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    room: &str,
) -> Result<bool, HistoryError> {
    let thread_id = find_thread(conn, resolver, account, room, ThreadKind::Group)?;
    thread_has_messages(conn, thread_id)
}

pub fn im_exists(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    who: &str,
) -> Result<bool, HistoryError> {
    let thread_id = find_thread(conn, resolver, account, who, ThreadKind::Direct)?;
    thread_has_messages(conn, thread_id)
}

/// Time of the group message `uid` in `room`, or `NOT_FOUND_TIME`.
pub fn chat_timestamp(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    room: &str,
    uid: &str,
) -> Result<i64, HistoryError> {
    let Some(thread_id) = find_thread(conn, resolver, account, room, ThreadKind::Group)? else {
        return Ok(NOT_FOUND_TIME);
    };
    let time: Option<i64> = conn
        .prepare_cached("SELECT time FROM messages WHERE thread_id = ?1 AND uid = ?2 ORDER BY time DESC LIMIT 1;")?
        .query_row(params![thread_id, uid], |row| row.get(0))
        .optional()?;
    Ok(time.unwrap_or(NOT_FOUND_TIME))
}

/// Time of the one-to-one message `uid` in any direct chat of the account,
/// or `NOT_FOUND_TIME`.
pub fn im_timestamp(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    uid: &str,
) -> Result<i64, HistoryError> {
    let owner = resolver.account_username(account);
    let owner_kind = account.protocol.user_kind_for(&owner).code();
    let time: Option<i64> = conn
        .prepare_cached(
            "SELECT m.time FROM messages m \
             JOIN threads t ON t.id = m.thread_id \
             JOIN accounts a ON a.id = t.account_id \
             JOIN users u ON u.id = a.user_id \
             WHERE u.username = ?1 AND u.type = ?2 AND a.protocol = ?3 AND t.type = ?4 AND m.uid = ?5 \
             ORDER BY m.time DESC LIMIT 1;",
        )?
        .query_row(
            params![owner, owner_kind, account.protocol.code(), ThreadKind::Direct.code(), uid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(time.unwrap_or(NOT_FOUND_TIME))
}

pub fn last_message_time(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    room: &str,
) -> Result<i64, HistoryError> {
    let Some(thread_id) = find_thread(conn, resolver, account, room, ThreadKind::Group)? else {
        return Ok(NO_MESSAGE_TIME);
    };
    let time: Option<i64> = conn
        .prepare_cached("SELECT MAX(time) FROM messages WHERE thread_id = ?1;")?
        .query_row(params![thread_id], |row| row.get(0))?;
    Ok(time.unwrap_or(NO_MESSAGE_TIME))
}

/// Deletes the thread; messages and memberships go with it through the
/// cascading foreign keys. Returns whether a thread was removed.
pub fn delete_chat(conn: &Connection, resolver: &IdentityResolver, chat: &ChatDescriptor) -> Result<bool, HistoryError> {
    let Some(thread_id) = find_thread(conn, resolver, &chat.account, &chat.name, chat.kind)? else {
        return Ok(false);
    };
    let deleted = conn
        .prepare_cached("DELETE FROM threads WHERE id = ?1;")?
        .execute(params![thread_id])?;
    Ok(deleted > 0)
}

pub fn update_chat(
    conn: &Connection,
    resolver: &IdentityResolver,
    chat: &ChatDescriptor,
    update: &ChatUpdate,
) -> Result<(), HistoryError> {
    let thread_id = find_or_create_thread(conn, resolver, chat)?;
    let avatar_id = match &update.avatar {
        Some(avatar) => Some(upsert_file(conn, avatar)?),
        None => None,
    };
    let last_read_id: Option<i64> = match update.last_read_uid.as_deref() {
        Some(uid) => conn
            .prepare_cached(
                "SELECT id FROM messages WHERE thread_id = ?1 AND uid = ?2 \
                 ORDER BY time DESC, id DESC LIMIT 1;",
            )?
            .query_row(params![thread_id, uid], |row| row.get(0))
            .optional()?,
        None => None,
    };
    conn.prepare_cached(
        "UPDATE threads SET \
           alias = COALESCE(?2, alias), \
           encrypted = COALESCE(?3, encrypted), \
           visibility = COALESCE(?4, visibility), \
           avatar_id = COALESCE(?5, avatar_id), \
           last_read_id = COALESCE(?6, last_read_id) \
         WHERE id = ?1;",
    )?
    .execute(params![
        thread_id,
        update.alias,
        update.encrypted.map(i64::from),
        update.visibility.map(Visibility::code),
        avatar_id,
        last_read_id,
    ])?;
    Ok(())
}

pub fn update_user(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
    update: &UserUpdate,
) -> Result<(), HistoryError> {
    let user_id = find_or_create_user(
        conn,
        resolver,
        account.protocol,
        &update.username,
        account.country_code.as_deref(),
    )?;
    let avatar_id = match &update.avatar {
        Some(avatar) => Some(upsert_file(conn, avatar)?),
        None => None,
    };
    conn.prepare_cached("UPDATE users SET alias = COALESCE(?2, alias), avatar_id = COALESCE(?3, avatar_id) WHERE id = ?1;")?
        .execute(params![user_id, update.alias, avatar_id])?;
    Ok(())
}

pub fn update_file(conn: &Connection, file: &FileInfo) -> Result<(), HistoryError> {
    upsert_file(conn, file)?;
    Ok(())
}

fn load_file(conn: &Connection, file_id: i64) -> Result<Option<FileInfo>, HistoryError> {
    let file = conn
        .prepare_cached(
            "SELECT f.name, f.url, f.path, mt.name, f.size, f.status, \
                    COALESCE(i.width, v.width), COALESCE(i.height, v.height), COALESCE(v.duration, a.duration) \
             FROM files f \
             LEFT JOIN mime_type mt ON mt.id = f.mime_type_id \
             LEFT JOIN images i ON i.file_id = f.id \
             LEFT JOIN videos v ON v.file_id = f.id \
             LEFT JOIN audio a ON a.file_id = f.id \
             WHERE f.id = ?1;",
        )?
        .query_row(params![file_id], |row| file_from_row(row, 0))
        .optional()?;
    Ok(file.flatten())
}

fn load_message(conn: &Connection, message_id: i64) -> Result<Option<Message>, HistoryError> {
    let message = conn
        .prepare_cached(&message_select("WHERE m.id = ?1;"))?
        .query_row(params![message_id], message_from_row)
        .optional()?;
    Ok(message)
}

/// Visible threads of an account, most recently active first, each with its
/// newest message for previews.
pub fn load_chats(
    conn: &Connection,
    resolver: &IdentityResolver,
    account: &AccountRef,
) -> Result<Vec<ChatSummary>, HistoryError> {
    let owner = resolver.account_username(account);
    let owner_kind = account.protocol.user_kind_for(&owner).code();
    let mut stmt = conn.prepare_cached(
        "SELECT t.name, t.alias, t.type, t.encrypted, t.visibility, t.avatar_id, lr.uid, \
                (SELECT m.id FROM messages m WHERE m.thread_id = t.id AND m.body != '' \
                 ORDER BY m.time DESC, m.id DESC LIMIT 1) AS last_id \
         FROM threads t \
         JOIN accounts a ON a.id = t.account_id \
         JOIN users u ON u.id = a.user_id \
         LEFT JOIN messages lr ON lr.id = t.last_read_id \
         WHERE u.username = ?1 AND u.type = ?2 AND a.protocol = ?3 AND t.visibility = ?4 \
         ORDER BY (SELECT MAX(m.time) FROM messages m WHERE m.thread_id = t.id) DESC NULLS LAST, t.id ASC;",
    )?;
    let rows = stmt.query_map(
        params![owner, owner_kind, account.protocol.code(), Visibility::Visible.code()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)? != 0,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<i64>>(7)?,
            ))
        },
    )?;

    let mut chats = Vec::new();
    for row in rows {
        let (name, alias, kind, encrypted, visibility, avatar_id, last_read_uid, last_id) = row?;
        let avatar = match avatar_id {
            Some(id) => load_file(conn, id)?,
            None => None,
        };
        let last_message = match last_id {
            Some(id) => load_message(conn, id)?,
            None => None,
        };
        chats.push(ChatSummary {
            name,
            alias,
            kind: ThreadKind::from_code(kind)?,
            encrypted,
            visibility: Visibility::from_code(visibility),
            avatar,
            last_read_uid,
            last_message,
        });
    }
    Ok(chats)
}

pub fn chat_members(
    conn: &Connection,
    resolver: &IdentityResolver,
    chat: &ChatDescriptor,
) -> Result<Vec<Member>, HistoryError> {
    let Some(thread_id) = find_thread(conn, resolver, &chat.account, &chat.name, chat.kind)? else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare_cached(
        "SELECT u.username, u.alias, u.type FROM thread_members tm \
         JOIN users u ON u.id = tm.user_id \
         WHERE tm.thread_id = ?1 \
         ORDER BY tm.id ASC;",
    )?;
    let rows = stmt.query_map(params![thread_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, i64>(2)?))
    })?;
    let mut members = Vec::new();
    for row in rows {
        let (username, alias, kind) = row?;
        members.push(Member {
            username,
            alias,
            kind: UserKind::from_code(kind)?,
        });
    }
    Ok(members)
}
