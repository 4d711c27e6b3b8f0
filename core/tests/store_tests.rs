use std::fs;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use history_core::models::{AccountRef, ChatDescriptor, Direction, Message, Protocol};
use history_core::{HistoryConfig, HistoryError, HistoryStore, PhoneNormalizer};

const WAIT: Duration = Duration::from_secs(10);

fn chat() -> ChatDescriptor {
    ChatDescriptor::direct(AccountRef::new("me@example.org", Protocol::Xmpp), "alice@example.org")
}

fn open_store(dir: &std::path::Path) -> HistoryStore {
    let store = HistoryStore::with_default_normalizer(HistoryConfig::in_dir(dir));
    store.open().expect("open");
    store
}

#[test]
fn calls_before_open_fail_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = HistoryStore::with_default_normalizer(HistoryConfig::in_dir(dir.path()));
    assert!(!store.is_open());

    let message = Message::text("m1", "hi", Direction::Outgoing, 1);
    let err = store.add_message(&chat(), &message).unwrap_err();
    assert!(matches!(err, HistoryError::NotOpen));

    let caller = thread::current().id();
    let (tx, rx) = mpsc::channel();
    store.message_count_then(&chat(), move |result| {
        tx.send((thread::current().id(), result)).expect("send");
    });
    // Delivered before the call returned, on this thread.
    let (callback_thread, result) = rx.try_recv().expect("callback ran");
    assert_eq!(callback_thread, caller);
    assert!(matches!(result, Err(HistoryError::NotOpen)));
    assert!(!dir.path().join("history.db").exists());
}

#[test]
fn blocking_calls_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    assert!(store.is_open());
    assert_eq!(store.config().db_path(), dir.path().join("history.db"));

    let message = Message::text("m1", "hi", Direction::Outgoing, 1000);
    store.add_message(&chat(), &message).expect("add");
    let page = store.get_messages(&chat(), None, 20).expect("page");
    assert_eq!(page, vec![message]);
    assert_eq!(store.message_count(&chat()).expect("count"), 1);
    assert!(store.delete_chat(&chat()).expect("delete"));
    assert_eq!(store.message_count(&chat()).expect("count"), 0);
}

#[test]
fn callbacks_complete_in_submission_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..20i64 {
        let order = Arc::clone(&order);
        let message = Message::text(format!("m{i}"), format!("body {i}"), Direction::Incoming, i);
        store.add_message_then(&chat(), &message, move |result| {
            result.expect("add");
            order.lock().expect("order lock").push(i);
        });
    }
    let (tx, rx) = mpsc::channel();
    store.get_messages_then(&chat(), None, 5, move |result| {
        tx.send(result).expect("send");
    });
    let page = rx.recv_timeout(WAIT).expect("page").expect("messages");
    let uids: Vec<&str> = page.iter().map(|m| m.uid.as_str()).collect();
    assert_eq!(uids, vec!["m15", "m16", "m17", "m18", "m19"]);
    assert_eq!(*order.lock().expect("order lock"), (0..20).collect::<Vec<i64>>());
}

#[test]
fn callbacks_run_on_the_worker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(open_store(dir.path()));
    let (tx, rx) = mpsc::channel();
    let inner = Arc::clone(&store);
    store.chat_exists_then(&AccountRef::new("me@example.org", Protocol::Xmpp), "room", move |_| {
        let name = thread::current().name().map(str::to_string);
        // A blocking call from here would wait on itself.
        let nested = inner.message_count(&chat());
        tx.send((name, nested)).expect("send");
    });
    let (name, nested) = rx.recv_timeout(WAIT).expect("callback");
    assert_eq!(name.as_deref(), Some("history-worker"));
    assert!(matches!(nested, Err(HistoryError::InvalidArgument(_))));
}

#[test]
fn close_is_terminal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    store.close().expect("close");
    assert!(!store.is_open());
    store.close().expect("second close");

    let err = store.message_count(&chat()).unwrap_err();
    assert!(matches!(err, HistoryError::Closed));
    let err = store.open().unwrap_err();
    assert!(matches!(err, HistoryError::Closed));
}

#[test]
fn close_then_reports_completion() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let (tx, rx) = mpsc::channel();
    store.close_then(move |result| {
        tx.send(result).expect("send");
    });
    rx.recv_timeout(WAIT).expect("close callback").expect("closed");
    assert!(matches!(store.message_count(&chat()), Err(HistoryError::Closed)));
}

#[test]
fn history_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = open_store(dir.path());
        store
            .add_message(&chat(), &Message::text("m1", "persisted", Direction::Incoming, 7))
            .expect("add");
        // Dropped without an explicit close.
    }
    let store = open_store(dir.path());
    let page = store.get_messages(&chat(), None, 10).expect("page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].body, "persisted");
    store.close().expect("close");
}

#[test]
fn failed_open_leaves_store_unopened() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").expect("blocker");
    let store = HistoryStore::with_default_normalizer(HistoryConfig::in_dir(blocker.join("nested")));
    let err = store.open().unwrap_err();
    assert!(matches!(err, HistoryError::Io(_)));
    assert!(!store.is_open());
    assert!(matches!(store.message_count(&chat()), Err(HistoryError::NotOpen)));
}

#[test]
fn custom_normalizer_is_used() {
    let dir = tempfile::tempdir().expect("tempdir");
    let normalizer: Arc<dyn PhoneNormalizer> = Arc::new(|number: &str, _country: Option<&str>| {
        let digits: String = number.chars().filter(char::is_ascii_digit).collect();
        (!digits.is_empty()).then(|| format!("tel:{digits}"))
    });
    let store = HistoryStore::new(HistoryConfig::in_dir(dir.path()), normalizer);
    store.open().expect("open");

    let sms = AccountRef::new("1", Protocol::MmsSms);
    let chat = ChatDescriptor::direct(sms.clone(), "12-34");
    store
        .add_message(&chat, &Message::text("s1", "hi", Direction::Incoming, 3).with_sender("1234"))
        .expect("add");
    assert!(store.im_exists(&sms, "1 2 3 4").expect("exists"));
    let members = store.chat_members(&chat).expect("members");
    assert_eq!(members[0].username, "tel:1234");
}
