use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::config::HistoryConfig;
use crate::db::open_history;
use crate::error::HistoryError;
use crate::models::{AccountRef, ChatDescriptor, ChatSummary, ChatUpdate, FileInfo, Member, Message, UserUpdate};
use crate::phone::PhoneNormalizer;
use crate::query;
use crate::upsert::IdentityResolver;

pub type Callback<T> = Box<dyn FnOnce(Result<T, HistoryError>) + Send + 'static>;

/// Where the result of one operation goes.
pub enum Completion<T> {
    Channel(mpsc::Sender<Result<T, HistoryError>>),
    Callback(Callback<T>),
}

impl<T> Completion<T> {
    pub fn complete(self, result: Result<T, HistoryError>) {
        match self {
            Completion::Channel(tx) => {
                // A caller that stopped waiting is not the worker's problem.
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => callback(result),
        }
    }
}

pub enum Operation {
    Open {
        config: HistoryConfig,
        done: Completion<()>,
    },
    Close {
        done: Completion<()>,
    },
    AddMessage {
        chat: ChatDescriptor,
        message: Message,
        done: Completion<()>,
    },
    GetMessages {
        chat: ChatDescriptor,
        before: Option<Message>,
        limit: usize,
        done: Completion<Vec<Message>>,
    },
    DeleteChat {
        chat: ChatDescriptor,
        done: Completion<bool>,
    },
    ChatExists {
        account: AccountRef,
        room: String,
        done: Completion<bool>,
    },
    ImExists {
        account: AccountRef,
        who: String,
        done: Completion<bool>,
    },
    ChatTimestamp {
        account: AccountRef,
        room: String,
        uid: String,
        done: Completion<i64>,
    },
    ImTimestamp {
        account: AccountRef,
        uid: String,
        done: Completion<i64>,
    },
    LastMessageTime {
        account: AccountRef,
        room: String,
        done: Completion<i64>,
    },
    UpdateChat {
        chat: ChatDescriptor,
        update: ChatUpdate,
        done: Completion<()>,
    },
    UpdateUser {
        account: AccountRef,
        update: UserUpdate,
        done: Completion<()>,
    },
    UpdateFile {
        file: FileInfo,
        done: Completion<()>,
    },
    LoadChats {
        account: AccountRef,
        done: Completion<Vec<ChatSummary>>,
    },
    MessageCount {
        chat: ChatDescriptor,
        done: Completion<i64>,
    },
    ChatMembers {
        chat: ChatDescriptor,
        done: Completion<Vec<Member>>,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Open { .. } => "open",
            Operation::Close { .. } => "close",
            Operation::AddMessage { .. } => "add_message",
            Operation::GetMessages { .. } => "get_messages",
            Operation::DeleteChat { .. } => "delete_chat",
            Operation::ChatExists { .. } => "chat_exists",
            Operation::ImExists { .. } => "im_exists",
            Operation::ChatTimestamp { .. } => "chat_timestamp",
            Operation::ImTimestamp { .. } => "im_timestamp",
            Operation::LastMessageTime { .. } => "last_message_time",
            Operation::UpdateChat { .. } => "update_chat",
            Operation::UpdateUser { .. } => "update_user",
            Operation::UpdateFile { .. } => "update_file",
            Operation::LoadChats { .. } => "load_chats",
            Operation::MessageCount { .. } => "message_count",
            Operation::ChatMembers { .. } => "chat_members",
        }
    }

    /// Completes the operation with `err` without running it.
    pub fn fail(self, err: HistoryError) {
        match self {
            Operation::Open { done, .. } => done.complete(Err(err)),
            Operation::Close { done } => done.complete(Err(err)),
            Operation::AddMessage { done, .. } => done.complete(Err(err)),
            Operation::GetMessages { done, .. } => done.complete(Err(err)),
            Operation::DeleteChat { done, .. } => done.complete(Err(err)),
            Operation::ChatExists { done, .. } => done.complete(Err(err)),
            Operation::ImExists { done, .. } => done.complete(Err(err)),
            Operation::ChatTimestamp { done, .. } => done.complete(Err(err)),
            Operation::ImTimestamp { done, .. } => done.complete(Err(err)),
            Operation::LastMessageTime { done, .. } => done.complete(Err(err)),
            Operation::UpdateChat { done, .. } => done.complete(Err(err)),
            Operation::UpdateUser { done, .. } => done.complete(Err(err)),
            Operation::UpdateFile { done, .. } => done.complete(Err(err)),
            Operation::LoadChats { done, .. } => done.complete(Err(err)),
            Operation::MessageCount { done, .. } => done.complete(Err(err)),
            Operation::ChatMembers { done, .. } => done.complete(Err(err)),
        }
    }
}

/// Owns the only connection to the history database. Runs on its own thread
/// and executes operations one at a time in submission order.
pub struct Worker {
    conn: Option<Connection>,
    normalizer: Arc<dyn PhoneNormalizer>,
    default_country: Option<String>,
    opened: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(normalizer: Arc<dyn PhoneNormalizer>, default_country: Option<String>, opened: Arc<AtomicBool>) -> Self {
        Self {
            conn: None,
            normalizer,
            default_country,
            opened,
        }
    }

    pub fn run(mut self, rx: mpsc::Receiver<Operation>) {
        while let Ok(op) = rx.recv() {
            debug!(op = op.kind(), "history operation");
            if self.dispatch(op) {
                break;
            }
        }
        self.opened.store(false, Ordering::SeqCst);
        self.conn = None;

        // Anything queued behind the close never runs.
        while let Ok(op) = rx.try_recv() {
            warn!(op = op.kind(), "history operation submitted after close");
            op.fail(HistoryError::Closed);
        }
    }

    /// Runs one operation; returns true once the store has been closed.
    fn dispatch(&mut self, op: Operation) -> bool {
        match op {
            Operation::Open { config, done } => {
                let result = self.open(config);
                done.complete(report("open", result));
            }
            Operation::Close { done } => {
                self.conn = None;
                self.opened.store(false, Ordering::SeqCst);
                done.complete(Ok(()));
                return true;
            }
            Operation::AddMessage { chat, message, done } => {
                let result = self.write(|conn, resolver| query::add_message(conn, resolver, &chat, &message));
                done.complete(report("add_message", result));
            }
            Operation::GetMessages {
                chat,
                before,
                limit,
                done,
            } => {
                let result =
                    self.read(|conn, resolver| query::get_messages(conn, resolver, &chat, before.as_ref(), limit));
                done.complete(report("get_messages", result));
            }
            Operation::DeleteChat { chat, done } => {
                let result = self.write(|conn, resolver| query::delete_chat(conn, resolver, &chat));
                done.complete(report("delete_chat", result));
            }
            Operation::ChatExists { account, room, done } => {
                let result = self.read(|conn, resolver| query::chat_exists(conn, resolver, &account, &room));
                done.complete(report("chat_exists", result));
            }
            Operation::ImExists { account, who, done } => {
                let result = self.read(|conn, resolver| query::im_exists(conn, resolver, &account, &who));
                done.complete(report("im_exists", result));
            }
            Operation::ChatTimestamp {
                account,
                room,
                uid,
                done,
            } => {
                let result = self.read(|conn, resolver| query::chat_timestamp(conn, resolver, &account, &room, &uid));
                done.complete(report("chat_timestamp", result));
            }
            Operation::ImTimestamp { account, uid, done } => {
                let result = self.read(|conn, resolver| query::im_timestamp(conn, resolver, &account, &uid));
                done.complete(report("im_timestamp", result));
            }
            Operation::LastMessageTime { account, room, done } => {
                let result = self.read(|conn, resolver| query::last_message_time(conn, resolver, &account, &room));
                done.complete(report("last_message_time", result));
            }
            Operation::UpdateChat { chat, update, done } => {
                let result = self.write(|conn, resolver| query::update_chat(conn, resolver, &chat, &update));
                done.complete(report("update_chat", result));
            }
            Operation::UpdateUser { account, update, done } => {
                let result = self.write(|conn, resolver| query::update_user(conn, resolver, &account, &update));
                done.complete(report("update_user", result));
            }
            Operation::UpdateFile { file, done } => {
                let result = self.write(|conn, _| query::update_file(conn, &file));
                done.complete(report("update_file", result));
            }
            Operation::LoadChats { account, done } => {
                let result = self.read(|conn, resolver| query::load_chats(conn, resolver, &account));
                done.complete(report("load_chats", result));
            }
            Operation::MessageCount { chat, done } => {
                let result = self.read(|conn, resolver| query::message_count(conn, resolver, &chat));
                done.complete(report("message_count", result));
            }
            Operation::ChatMembers { chat, done } => {
                let result = self.read(|conn, resolver| query::chat_members(conn, resolver, &chat));
                done.complete(report("chat_members", result));
            }
        }
        false
    }

    fn open(&mut self, config: HistoryConfig) -> Result<(), HistoryError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let country = config.country_code.clone().or_else(|| self.default_country.clone());
        let resolver = IdentityResolver::new(self.normalizer.as_ref(), country.as_deref());
        let db = open_history(&config, &resolver)?;
        self.default_country = country;
        self.conn = Some(db.conn);
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        F: FnOnce(&Connection, &IdentityResolver) -> Result<T, HistoryError>,
    {
        let conn = self.conn.as_ref().ok_or(HistoryError::NotOpen)?;
        let resolver = IdentityResolver::new(self.normalizer.as_ref(), self.default_country.as_deref());
        f(conn, &resolver)
    }

    /// Runs `f` in a transaction so a multi-statement write lands whole or not at all.
    fn write<T, F>(&mut self, f: F) -> Result<T, HistoryError>
    where
        F: FnOnce(&Connection, &IdentityResolver) -> Result<T, HistoryError>,
    {
        let conn = self.conn.as_mut().ok_or(HistoryError::NotOpen)?;
        let resolver = IdentityResolver::new(self.normalizer.as_ref(), self.default_country.as_deref());
        let tx = conn.transaction()?;
        let value = f(&tx, &resolver)?;
        tx.commit()?;
        Ok(value)
    }
}

fn report<T>(op: &'static str, result: Result<T, HistoryError>) -> Result<T, HistoryError> {
    if let Err(err) = &result {
        error!(op, error = %err, code = ?err.sqlite_code(), "history operation failed");
    }
    result
}
