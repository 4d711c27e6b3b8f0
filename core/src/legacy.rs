use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::HistoryError;
use crate::migrations::{LEGACY_CHAT_TABLE, LEGACY_IM_TABLE};
use crate::models::{
    AccountRef, ChatDescriptor, Direction, Message, MessageStatus, MessageType, Protocol, ThreadKind,
};
use crate::phone::looks_like_phone_number;
use crate::upsert::{add_thread_member, find_or_create_thread, find_or_create_user, upsert_message, IdentityResolver};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LegacyStats {
    pub migrated: i64,
    pub skipped: i64,
}

struct LegacyRow {
    timestamp: i64,
    direction: i64,
    account: String,
    /// Peer for one-to-one rows, room for group rows.
    conversation: String,
    who: Option<String>,
    uid: String,
    message: Option<String>,
    alias: Option<String>,
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool, HistoryError> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name = ?1;",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Moves every row of the flat legacy tables into the relational schema and
/// drops the legacy tables. Missing tables are not an error.
pub(crate) fn migrate_legacy_tables(conn: &Connection, resolver: &IdentityResolver) -> Result<LegacyStats, HistoryError> {
    let mut stats = LegacyStats::default();

    if table_exists(conn, LEGACY_IM_TABLE)? {
        let rows = read_rows(
            conn,
            &format!(
                "SELECT timestamp, direction, account, who, NULL, uid, message, NULL \
                 FROM {LEGACY_IM_TABLE} ORDER BY id ASC;"
            ),
        )?;
        for row in rows {
            migrate_row(conn, resolver, &row, ThreadKind::Direct, &mut stats)?;
        }
        conn.execute_batch(&format!("DROP TABLE {LEGACY_IM_TABLE};"))?;
    }

    if table_exists(conn, LEGACY_CHAT_TABLE)? {
        let rows = read_rows(
            conn,
            &format!(
                "SELECT timestamp, direction, account, room, who, uid, message, alias \
                 FROM {LEGACY_CHAT_TABLE} ORDER BY id ASC;"
            ),
        )?;
        for row in rows {
            migrate_row(conn, resolver, &row, ThreadKind::Group, &mut stats)?;
        }
        conn.execute_batch(&format!("DROP TABLE {LEGACY_CHAT_TABLE};"))?;
    }

    Ok(stats)
}

fn read_rows(conn: &Connection, sql: &str) -> Result<Vec<LegacyRow>, HistoryError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(LegacyRow {
            timestamp: row.get(0)?,
            direction: row.get(1)?,
            account: row.get(2)?,
            conversation: row.get(3)?,
            who: row.get(4)?,
            uid: row.get(5)?,
            message: row.get(6)?,
            alias: row.get(7)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn migrate_row(
    conn: &Connection,
    resolver: &IdentityResolver,
    row: &LegacyRow,
    kind: ThreadKind,
    stats: &mut LegacyStats,
) -> Result<(), HistoryError> {
    let body = match row.message.as_deref() {
        Some(body) if !body.is_empty() => body,
        _ => {
            stats.skipped += 1;
            return Ok(());
        }
    };

    let protocol = infer_protocol(&row.account);
    let account = AccountRef::new(&row.account, protocol);
    let chat = ChatDescriptor {
        account,
        name: row.conversation.clone(),
        alias: None,
        kind,
        encrypted: false,
        visibility: None,
    };
    let thread_id = find_or_create_thread(conn, resolver, &chat)?;

    let direction = Direction::from_code(row.direction);
    let peer = match kind {
        ThreadKind::Direct => Some(row.conversation.as_str()),
        ThreadKind::Group => row.who.as_deref().filter(|who| !who.trim().is_empty()),
    };
    let peer_id = match peer {
        Some(peer) => {
            let user_id = find_or_create_user(conn, resolver, protocol, peer, None)?;
            add_thread_member(conn, thread_id, user_id)?;
            Some(user_id)
        }
        None => None,
    };
    let sender_id = if direction == Direction::Incoming { peer_id } else { None };

    let uid = if row.uid.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        row.uid.clone()
    };
    let status = match direction {
        Direction::Incoming => MessageStatus::Received,
        Direction::Outgoing => MessageStatus::Sent,
        Direction::System => MessageStatus::Unknown,
    };
    let message = Message {
        uid,
        sender: None,
        sender_alias: row.alias.clone(),
        body: body.to_string(),
        body_type: MessageType::Text,
        direction,
        time: row.timestamp,
        status,
        encrypted: false,
        file: None,
        preview: None,
    };
    upsert_message(conn, thread_id, sender_id, &message, body, None)?;
    stats.migrated += 1;
    Ok(())
}

/// Guesses the protocol of a legacy account from the shape of its id.
pub(crate) fn infer_protocol(account: &str) -> Protocol {
    let account = account.trim();
    if account.eq_ignore_ascii_case("SMS") {
        Protocol::MmsSms
    } else if (account.starts_with('@') || account.starts_with('!')) && account.contains(':') {
        Protocol::Matrix
    } else if account.contains('@') {
        Protocol::Xmpp
    } else if looks_like_phone_number(account) {
        Protocol::Telegram
    } else {
        Protocol::Xmpp
    }
}
