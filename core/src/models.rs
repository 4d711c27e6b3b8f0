use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    MmsSms,
    Mms,
    Xmpp,
    Matrix,
    Telegram,
}

impl Protocol {
    pub fn code(self) -> i64 {
        match self {
            Protocol::MmsSms => 1,
            Protocol::Mms => 2,
            Protocol::Xmpp => 4,
            Protocol::Matrix => 8,
            Protocol::Telegram => 16,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, HistoryError> {
        match code {
            1 => Ok(Protocol::MmsSms),
            2 => Ok(Protocol::Mms),
            4 => Ok(Protocol::Xmpp),
            8 => Ok(Protocol::Matrix),
            16 => Ok(Protocol::Telegram),
            other => Err(HistoryError::InvalidArgument(format!("unknown protocol code {other}"))),
        }
    }

    /// Protocols whose identifiers are phone numbers.
    pub fn is_telephony(self) -> bool {
        matches!(self, Protocol::MmsSms | Protocol::Mms | Protocol::Telegram)
    }

    /// Kind of user row an identifier on this protocol resolves to.
    pub fn user_kind_for(self, identifier: &str) -> UserKind {
        match self {
            Protocol::Xmpp => UserKind::Xmpp,
            Protocol::Matrix => UserKind::Matrix,
            Protocol::MmsSms | Protocol::Mms if identifier.contains('@') => UserKind::Email,
            Protocol::MmsSms | Protocol::Mms | Protocol::Telegram => UserKind::Phone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Phone,
    Email,
    Xmpp,
    Matrix,
    Sip,
    Iccid,
}

impl UserKind {
    pub fn code(self) -> i64 {
        match self {
            UserKind::Phone => 1,
            UserKind::Email => 2,
            UserKind::Xmpp => 3,
            UserKind::Matrix => 4,
            UserKind::Sip => 5,
            UserKind::Iccid => 6,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, HistoryError> {
        match code {
            1 => Ok(UserKind::Phone),
            2 => Ok(UserKind::Email),
            3 => Ok(UserKind::Xmpp),
            4 => Ok(UserKind::Matrix),
            5 => Ok(UserKind::Sip),
            6 => Ok(UserKind::Iccid),
            other => Err(HistoryError::InvalidArgument(format!("unknown user kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Direct,
    Group,
}

impl ThreadKind {
    pub fn code(self) -> i64 {
        match self {
            ThreadKind::Direct => 0,
            ThreadKind::Group => 1,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, HistoryError> {
        match code {
            0 => Ok(ThreadKind::Direct),
            1 => Ok(ThreadKind::Group),
            other => Err(HistoryError::InvalidArgument(format!("unknown thread kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Html,
    HtmlEscaped,
    MatrixHtml,
    Location,
    File,
    Image,
    Video,
    Audio,
    Mms,
}

impl MessageType {
    pub fn code(self) -> i64 {
        match self {
            MessageType::Text => 0,
            MessageType::Html => 1,
            MessageType::HtmlEscaped => 2,
            MessageType::MatrixHtml => 3,
            MessageType::Location => 4,
            MessageType::File => 5,
            MessageType::Image => 6,
            MessageType::Video => 7,
            MessageType::Audio => 8,
            MessageType::Mms => 9,
        }
    }

    /// Unknown codes degrade to plain text so old rows stay readable.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageType::Html,
            2 => MessageType::HtmlEscaped,
            3 => MessageType::MatrixHtml,
            4 => MessageType::Location,
            5 => MessageType::File,
            6 => MessageType::Image,
            7 => MessageType::Video,
            8 => MessageType::Audio,
            9 => MessageType::Mms,
            _ => MessageType::Text,
        }
    }

    pub fn is_media(self) -> bool {
        matches!(
            self,
            MessageType::File | MessageType::Image | MessageType::Video | MessageType::Audio
        )
    }

    /// Stored codes of the media body types, for SQL `IN (...)` clauses.
    pub(crate) const MEDIA_CODES: &'static str = "5, 6, 7, 8";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
    System,
}

impl Direction {
    pub fn code(self) -> i64 {
        match self {
            Direction::Incoming => 1,
            Direction::Outgoing => -1,
            Direction::System => 0,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            c if c > 0 => Direction::Incoming,
            c if c < 0 => Direction::Outgoing,
            _ => Direction::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Unknown,
    Draft,
    Received,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn code(self) -> i64 {
        match self {
            MessageStatus::Unknown => 0,
            MessageStatus::Draft => 1,
            MessageStatus::Received => 2,
            MessageStatus::Sending => 3,
            MessageStatus::Sent => 4,
            MessageStatus::Delivered => 5,
            MessageStatus::Read => 6,
            MessageStatus::Failed => 7,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageStatus::Draft,
            2 => MessageStatus::Received,
            3 => MessageStatus::Sending,
            4 => MessageStatus::Sent,
            5 => MessageStatus::Delivered,
            6 => MessageStatus::Read,
            7 => MessageStatus::Failed,
            _ => MessageStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    Archived,
    Blocked,
}

impl Visibility {
    pub fn code(self) -> i64 {
        match self {
            Visibility::Visible => 0,
            Visibility::Hidden => 1,
            Visibility::Archived => 2,
            Visibility::Blocked => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Visibility::Hidden,
            2 => Visibility::Archived,
            3 => Visibility::Blocked,
            _ => Visibility::Visible,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Unknown,
    Downloaded,
    Missing,
    DecryptFailed,
}

impl FileStatus {
    pub fn code(self) -> i64 {
        match self {
            FileStatus::Unknown => 0,
            FileStatus::Downloaded => 1,
            FileStatus::Missing => 2,
            FileStatus::DecryptFailed => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => FileStatus::Downloaded,
            2 => FileStatus::Missing,
            3 => FileStatus::DecryptFailed,
            _ => FileStatus::Unknown,
        }
    }
}

/// The local identity a conversation is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub username: String,
    pub protocol: Protocol,
    /// Country hint for phone normalization; the store default applies when absent.
    pub country_code: Option<String>,
}

impl AccountRef {
    pub fn new(username: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            username: username.into(),
            protocol,
            country_code: None,
        }
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDescriptor {
    pub account: AccountRef,
    /// Room id for group chats, peer id for direct chats.
    pub name: String,
    pub alias: Option<String>,
    pub kind: ThreadKind,
    pub encrypted: bool,
    /// `None` keeps whatever visibility an existing thread has.
    pub visibility: Option<Visibility>,
}

impl ChatDescriptor {
    pub fn direct(account: AccountRef, peer: impl Into<String>) -> Self {
        Self::new(account, peer, ThreadKind::Direct)
    }

    pub fn group(account: AccountRef, room: impl Into<String>) -> Self {
        Self::new(account, room, ThreadKind::Group)
    }

    fn new(account: AccountRef, name: impl Into<String>, kind: ThreadKind) -> Self {
        Self {
            account,
            name: name.into(),
            alias: None,
            kind,
            encrypted: false,
            visibility: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: Option<String>,
    /// Natural key: a URL is stored once and later writes update it in place.
    pub url: String,
    pub path: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub status: FileStatus,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<i64>,
}

impl FileInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            path: None,
            mime_type: None,
            size: None,
            status: FileStatus::Unknown,
            width: None,
            height: None,
            duration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol message id; unique within a thread only.
    pub uid: String,
    /// Username of the sender; `None` for system messages and usually for our own.
    pub sender: Option<String>,
    /// Display name of the sender at the time the message was sent.
    pub sender_alias: Option<String>,
    /// Text, or the attachment URL for media body types.
    pub body: String,
    pub body_type: MessageType,
    pub direction: Direction,
    /// Unix seconds.
    pub time: i64,
    pub status: MessageStatus,
    pub encrypted: bool,
    pub file: Option<FileInfo>,
    pub preview: Option<FileInfo>,
}

impl Message {
    pub fn text(uid: impl Into<String>, body: impl Into<String>, direction: Direction, time: i64) -> Self {
        Self {
            uid: uid.into(),
            sender: None,
            sender_alias: None,
            body: body.into(),
            body_type: MessageType::Text,
            direction,
            time,
            status: MessageStatus::Unknown,
            encrypted: false,
            file: None,
            preview: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub name: String,
    pub alias: Option<String>,
    pub kind: ThreadKind,
    pub encrypted: bool,
    pub visibility: Visibility,
    pub avatar: Option<FileInfo>,
    pub last_read_uid: Option<String>,
    pub last_message: Option<Message>,
}

/// Explicit edits to a thread; unset fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatUpdate {
    pub alias: Option<String>,
    pub encrypted: Option<bool>,
    pub visibility: Option<Visibility>,
    pub avatar: Option<FileInfo>,
    pub last_read_uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub username: String,
    pub alias: Option<String>,
    pub avatar: Option<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    pub alias: Option<String>,
    pub kind: UserKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for protocol in [Protocol::MmsSms, Protocol::Mms, Protocol::Xmpp, Protocol::Matrix, Protocol::Telegram] {
            assert_eq!(Protocol::from_code(protocol.code()).expect("protocol"), protocol);
        }
        for direction in [Direction::Incoming, Direction::Outgoing, Direction::System] {
            assert_eq!(Direction::from_code(direction.code()), direction);
        }
        assert_eq!(MessageStatus::from_code(MessageStatus::Delivered.code()), MessageStatus::Delivered);
        assert_eq!(Visibility::from_code(Visibility::Archived.code()), Visibility::Archived);
    }

    #[test]
    fn unknown_codes() {
        assert!(Protocol::from_code(3).is_err());
        assert!(ThreadKind::from_code(7).is_err());
        assert_eq!(MessageType::from_code(99), MessageType::Text);
        assert_eq!(MessageStatus::from_code(-4), MessageStatus::Unknown);
        assert_eq!(FileStatus::from_code(42), FileStatus::Unknown);
    }

    #[test]
    fn media_codes_match_enum() {
        let codes: Vec<String> = [MessageType::File, MessageType::Image, MessageType::Video, MessageType::Audio]
            .iter()
            .map(|t| t.code().to_string())
            .collect();
        assert_eq!(codes.join(", "), MessageType::MEDIA_CODES);
    }

    #[test]
    fn telephony_user_kinds() {
        assert_eq!(Protocol::MmsSms.user_kind_for("+15550001111"), UserKind::Phone);
        assert_eq!(Protocol::MmsSms.user_kind_for("bob@example.org"), UserKind::Email);
        assert_eq!(Protocol::Xmpp.user_kind_for("bob@example.org"), UserKind::Xmpp);
    }
}
