use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Gmail system labels the cleanup passes work with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Inbox,
    Spam,
    Trash,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Inbox => "INBOX",
            Label::Spam => "SPAM",
            Label::Trash => "TRASH",
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization handle for the mailbox API.
#[derive(Clone)]
pub struct Session {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(access_token: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at,
        }
    }

    pub fn bearer(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// A session counts as expired a little before the provider says so, so a
    /// request started now does not race the deadline.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(60) > now
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Filter for a single list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageQuery {
    /// Free-form Gmail search expression, e.g. `before:2024/01/31`.
    Search(String),
    Label(Label),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Archive,
    Delete,
    Trash,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Archive => "archive",
            OpKind::Delete => "delete",
            OpKind::Trash => "trash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOp {
    pub kind: OpKind,
    pub message_id: String,
}

impl MessageOp {
    pub fn archive(message: &MessageRef) -> Self {
        Self {
            kind: OpKind::Archive,
            message_id: message.id.clone(),
        }
    }

    pub fn delete(message: &MessageRef) -> Self {
        Self {
            kind: OpKind::Delete,
            message_id: message.id.clone(),
        }
    }

    pub fn trash(message: &MessageRef) -> Self {
        Self {
            kind: OpKind::Trash,
            message_id: message.id.clone(),
        }
    }
}

/// Failure of one operation inside an otherwise successful batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (status {status})")]
pub struct ItemError {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub message_id: String,
    pub result: Result<(), ItemError>,
}

impl ItemOutcome {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            result: Ok(()),
        }
    }

    pub fn failed(message_id: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            result: Err(ItemError {
                status,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupStatus {
    Idle,
    Authenticating,
    Archiving,
    PurgingSpam,
    Done,
    Failed,
}

impl CleanupStatus {
    pub fn display_text(&self) -> &'static str {
        match self {
            CleanupStatus::Idle => "Idle",
            CleanupStatus::Authenticating => "Authenticating with Gmail...",
            CleanupStatus::Archiving => "Archiving old emails...",
            CleanupStatus::PurgingSpam => "Deleting spam...",
            CleanupStatus::Done => "Cleanup finished",
            CleanupStatus::Failed => "Cleanup failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub status: CleanupStatus,
    pub text: String,
}

impl From<CleanupStatus> for StatusPayload {
    fn from(status: CleanupStatus) -> Self {
        Self {
            status,
            text: status.display_text().to_string(),
        }
    }
}
