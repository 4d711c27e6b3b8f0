use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{info, warn};

use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::models::{AccountRef, ChatDescriptor, ChatSummary, ChatUpdate, FileInfo, Member, Message, UserUpdate};
use crate::phone::{DialingCodeNormalizer, PhoneNormalizer};
use crate::worker::{Completion, Operation, Worker};

const WORKER_NAME: &str = "history-worker";

#[derive(Default)]
struct StoreState {
    sender: Option<mpsc::Sender<Operation>>,
    worker: Option<JoinHandle<()>>,
    worker_thread: Option<ThreadId>,
    closed: bool,
}

/// Message history of one profile.
///
/// All database work happens on a single worker thread, started by the first
/// `open`. Every operation comes in two forms: a blocking call that returns
/// the result, and a `*_then` form that takes a callback which runs on the
/// worker thread. Callbacks must not make blocking calls on the same store.
pub struct HistoryStore {
    config: HistoryConfig,
    normalizer: Arc<dyn PhoneNormalizer>,
    opened: Arc<AtomicBool>,
    state: Mutex<StoreState>,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig, normalizer: Arc<dyn PhoneNormalizer>) -> Self {
        Self {
            config,
            normalizer,
            opened: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn with_default_normalizer(config: HistoryConfig) -> Self {
        Self::new(config, Arc::new(DialingCodeNormalizer))
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_worker_thread(&self) -> bool {
        self.state().worker_thread == Some(thread::current().id())
    }

    fn spawn_worker(&self, state: &mut StoreState) -> Result<(), HistoryError> {
        let (tx, rx) = mpsc::channel();
        let worker = Worker::new(
            Arc::clone(&self.normalizer),
            self.config.country_code.clone(),
            Arc::clone(&self.opened),
        );
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || worker.run(rx))?;
        state.worker_thread = Some(handle.thread().id());
        state.worker = Some(handle);
        state.sender = Some(tx);
        Ok(())
    }

    /// Queues `op`, or fails it right here when it cannot run. Failures are
    /// reported after the state lock is released so callbacks may re-enter.
    fn submit(&self, op: Operation) {
        let is_open_op = matches!(op, Operation::Open { .. });
        let rejected = {
            let mut state = self.state();
            if state.closed {
                Some((op, HistoryError::Closed))
            } else if !is_open_op && !self.is_open() {
                Some((op, HistoryError::NotOpen))
            } else {
                let spawned = if state.sender.is_none() {
                    self.spawn_worker(&mut state)
                } else {
                    Ok(())
                };
                match (spawned, state.sender.as_ref()) {
                    (Err(err), _) => Some((op, err)),
                    (Ok(()), Some(sender)) => match sender.send(op) {
                        Ok(()) => None,
                        Err(mpsc::SendError(op)) => Some((op, HistoryError::WorkerGone)),
                    },
                    (Ok(()), None) => Some((op, HistoryError::WorkerGone)),
                }
            }
        };
        if let Some((op, err)) = rejected {
            if matches!(err, HistoryError::Closed) {
                warn!(op = op.kind(), "history operation submitted after close");
            }
            op.fail(err);
        }
    }

    fn call<T, F>(&self, build: F) -> Result<T, HistoryError>
    where
        F: FnOnce(Completion<T>) -> Operation,
    {
        if self.on_worker_thread() {
            return Err(HistoryError::InvalidArgument(
                "blocking history call from the history worker".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel();
        self.submit(build(Completion::Channel(tx)));
        rx.recv().map_err(|_| HistoryError::WorkerGone)?
    }

    fn call_then<T, F, C>(&self, build: F, callback: C)
    where
        F: FnOnce(Completion<T>) -> Operation,
        C: FnOnce(Result<T, HistoryError>) + Send + 'static,
    {
        self.submit(build(Completion::Callback(Box::new(callback))));
    }

    /// Opens the database, migrating it to the current schema first.
    pub fn open(&self) -> Result<(), HistoryError> {
        let config = self.config.clone();
        self.call(|done| Operation::Open { config, done })
    }

    pub fn open_then<C>(&self, callback: C)
    where
        C: FnOnce(Result<(), HistoryError>) + Send + 'static,
    {
        let config = self.config.clone();
        self.call_then(|done| Operation::Open { config, done }, callback)
    }

    /// Closes the database and stops the worker. Later calls fail with
    /// `Closed`; closing twice is a no-op.
    pub fn close(&self) -> Result<(), HistoryError> {
        if self.on_worker_thread() {
            return Err(HistoryError::InvalidArgument(
                "close called from the history worker".to_string(),
            ));
        }
        let (sender, worker) = {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (state.sender.take(), state.worker.take())
        };
        let Some(sender) = sender else {
            return Ok(());
        };
        let (tx, rx) = mpsc::channel();
        let sent = sender.send(Operation::Close {
            done: Completion::Channel(tx),
        });
        drop(sender);
        let result = match sent {
            Ok(()) => rx.recv().map_err(|_| HistoryError::WorkerGone)?,
            Err(_) => Err(HistoryError::WorkerGone),
        };
        if let Some(worker) = worker {
            worker.join().map_err(|_| HistoryError::WorkerGone)?;
        }
        info!(path = %self.config.db_path().display(), "history database closed");
        result
    }

    /// Queues the close and returns; the worker exits once it has run.
    pub fn close_then<C>(&self, callback: C)
    where
        C: FnOnce(Result<(), HistoryError>) + Send + 'static,
    {
        let sender = {
            let mut state = self.state();
            if state.closed {
                None
            } else {
                state.closed = true;
                state.worker.take();
                state.sender.take()
            }
        };
        match sender {
            Some(sender) => {
                if let Err(mpsc::SendError(op)) = sender.send(Operation::Close {
                    done: Completion::Callback(Box::new(callback)),
                }) {
                    op.fail(HistoryError::WorkerGone);
                }
            }
            None => callback(Ok(())),
        }
    }

    pub fn add_message(&self, chat: &ChatDescriptor, message: &Message) -> Result<(), HistoryError> {
        let (chat, message) = (chat.clone(), message.clone());
        self.call(|done| Operation::AddMessage { chat, message, done })
    }

    pub fn add_message_then<C>(&self, chat: &ChatDescriptor, message: &Message, callback: C)
    where
        C: FnOnce(Result<(), HistoryError>) + Send + 'static,
    {
        let (chat, message) = (chat.clone(), message.clone());
        self.call_then(|done| Operation::AddMessage { chat, message, done }, callback)
    }

    /// Up to `limit` messages older than `before` (newest page when `None`),
    /// returned oldest first.
    pub fn get_messages(
        &self,
        chat: &ChatDescriptor,
        before: Option<&Message>,
        limit: usize,
    ) -> Result<Vec<Message>, HistoryError> {
        let (chat, before) = (chat.clone(), before.cloned());
        self.call(|done| Operation::GetMessages {
            chat,
            before,
            limit,
            done,
        })
    }

    pub fn get_messages_then<C>(&self, chat: &ChatDescriptor, before: Option<&Message>, limit: usize, callback: C)
    where
        C: FnOnce(Result<Vec<Message>, HistoryError>) + Send + 'static,
    {
        let (chat, before) = (chat.clone(), before.cloned());
        self.call_then(
            |done| Operation::GetMessages {
                chat,
                before,
                limit,
                done,
            },
            callback,
        )
    }

    pub fn delete_chat(&self, chat: &ChatDescriptor) -> Result<bool, HistoryError> {
        let chat = chat.clone();
        self.call(|done| Operation::DeleteChat { chat, done })
    }

    pub fn delete_chat_then<C>(&self, chat: &ChatDescriptor, callback: C)
    where
        C: FnOnce(Result<bool, HistoryError>) + Send + 'static,
    {
        let chat = chat.clone();
        self.call_then(|done| Operation::DeleteChat { chat, done }, callback)
    }

    pub fn chat_exists(&self, account: &AccountRef, room: &str) -> Result<bool, HistoryError> {
        let (account, room) = (account.clone(), room.to_string());
        self.call(|done| Operation::ChatExists { account, room, done })
    }

    pub fn chat_exists_then<C>(&self, account: &AccountRef, room: &str, callback: C)
    where
        C: FnOnce(Result<bool, HistoryError>) + Send + 'static,
    {
        let (account, room) = (account.clone(), room.to_string());
        self.call_then(|done| Operation::ChatExists { account, room, done }, callback)
    }

    pub fn im_exists(&self, account: &AccountRef, who: &str) -> Result<bool, HistoryError> {
        let (account, who) = (account.clone(), who.to_string());
        self.call(|done| Operation::ImExists { account, who, done })
    }

    pub fn im_exists_then<C>(&self, account: &AccountRef, who: &str, callback: C)
    where
        C: FnOnce(Result<bool, HistoryError>) + Send + 'static,
    {
        let (account, who) = (account.clone(), who.to_string());
        self.call_then(|done| Operation::ImExists { account, who, done }, callback)
    }

    /// Time of message `uid` in group `room`; `query::NOT_FOUND_TIME` if unknown.
    pub fn chat_timestamp(&self, account: &AccountRef, room: &str, uid: &str) -> Result<i64, HistoryError> {
        let (account, room, uid) = (account.clone(), room.to_string(), uid.to_string());
        self.call(|done| Operation::ChatTimestamp {
            account,
            room,
            uid,
            done,
        })
    }

    pub fn chat_timestamp_then<C>(&self, account: &AccountRef, room: &str, uid: &str, callback: C)
    where
        C: FnOnce(Result<i64, HistoryError>) + Send + 'static,
    {
        let (account, room, uid) = (account.clone(), room.to_string(), uid.to_string());
        self.call_then(
            |done| Operation::ChatTimestamp {
                account,
                room,
                uid,
                done,
            },
            callback,
        )
    }

    pub fn im_timestamp(&self, account: &AccountRef, uid: &str) -> Result<i64, HistoryError> {
        let (account, uid) = (account.clone(), uid.to_string());
        self.call(|done| Operation::ImTimestamp { account, uid, done })
    }

    pub fn im_timestamp_then<C>(&self, account: &AccountRef, uid: &str, callback: C)
    where
        C: FnOnce(Result<i64, HistoryError>) + Send + 'static,
    {
        let (account, uid) = (account.clone(), uid.to_string());
        self.call_then(|done| Operation::ImTimestamp { account, uid, done }, callback)
    }

    /// Newest message time in `room`, or `query::NO_MESSAGE_TIME`.
    pub fn last_message_time(&self, account: &AccountRef, room: &str) -> Result<i64, HistoryError> {
        let (account, room) = (account.clone(), room.to_string());
        self.call(|done| Operation::LastMessageTime { account, room, done })
    }

    pub fn last_message_time_then<C>(&self, account: &AccountRef, room: &str, callback: C)
    where
        C: FnOnce(Result<i64, HistoryError>) + Send + 'static,
    {
        let (account, room) = (account.clone(), room.to_string());
        self.call_then(|done| Operation::LastMessageTime { account, room, done }, callback)
    }

    pub fn update_chat(&self, chat: &ChatDescriptor, update: &ChatUpdate) -> Result<(), HistoryError> {
        let (chat, update) = (chat.clone(), update.clone());
        self.call(|done| Operation::UpdateChat { chat, update, done })
    }

    pub fn update_chat_then<C>(&self, chat: &ChatDescriptor, update: &ChatUpdate, callback: C)
    where
        C: FnOnce(Result<(), HistoryError>) + Send + 'static,
    {
        let (chat, update) = (chat.clone(), update.clone());
        self.call_then(|done| Operation::UpdateChat { chat, update, done }, callback)
    }

    pub fn update_user(&self, account: &AccountRef, update: &UserUpdate) -> Result<(), HistoryError> {
        let (account, update) = (account.clone(), update.clone());
        self.call(|done| Operation::UpdateUser { account, update, done })
    }

    pub fn update_user_then<C>(&self, account: &AccountRef, update: &UserUpdate, callback: C)
    where
        C: FnOnce(Result<(), HistoryError>) + Send + 'static,
    {
        let (account, update) = (account.clone(), update.clone());
        self.call_then(|done| Operation::UpdateUser { account, update, done }, callback)
    }

    pub fn update_file(&self, file: &FileInfo) -> Result<(), HistoryError> {
        let file = file.clone();
        self.call(|done| Operation::UpdateFile { file, done })
    }

    pub fn update_file_then<C>(&self, file: &FileInfo, callback: C)
    where
        C: FnOnce(Result<(), HistoryError>) + Send + 'static,
    {
        let file = file.clone();
        self.call_then(|done| Operation::UpdateFile { file, done }, callback)
    }

    pub fn load_chats(&self, account: &AccountRef) -> Result<Vec<ChatSummary>, HistoryError> {
        let account = account.clone();
        self.call(|done| Operation::LoadChats { account, done })
    }

    pub fn load_chats_then<C>(&self, account: &AccountRef, callback: C)
    where
        C: FnOnce(Result<Vec<ChatSummary>, HistoryError>) + Send + 'static,
    {
        let account = account.clone();
        self.call_then(|done| Operation::LoadChats { account, done }, callback)
    }

    pub fn message_count(&self, chat: &ChatDescriptor) -> Result<i64, HistoryError> {
        let chat = chat.clone();
        self.call(|done| Operation::MessageCount { chat, done })
    }

    pub fn message_count_then<C>(&self, chat: &ChatDescriptor, callback: C)
    where
        C: FnOnce(Result<i64, HistoryError>) + Send + 'static,
    {
        let chat = chat.clone();
        self.call_then(|done| Operation::MessageCount { chat, done }, callback)
    }

    pub fn chat_members(&self, chat: &ChatDescriptor) -> Result<Vec<Member>, HistoryError> {
        let chat = chat.clone();
        self.call(|done| Operation::ChatMembers { chat, done })
    }

    pub fn chat_members_then<C>(&self, chat: &ChatDescriptor, callback: C)
    where
        C: FnOnce(Result<Vec<Member>, HistoryError>) + Send + 'static,
    {
        let chat = chat.clone();
        self.call_then(|done| Operation::ChatMembers { chat, done }, callback)
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        if self.on_worker_thread() {
            // Cannot join ourselves; let the worker wind down after this callback.
            self.close_then(|_| {});
            return;
        }
        if let Err(err) = self.close() {
            warn!(error = %err, "closing history store on drop failed");
        }
    }
}
