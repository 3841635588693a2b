// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The messages two linked editors exchange, independent of how they go over the wire.

use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JSONValue;
use std::fmt;

/// Which side of the link produced a message.
///
/// The primary editor's session speaks as `local`, the secondary's as `remote`. A session drops
/// everything tagged with its own role, so that its own messages bouncing back are never applied.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[display("local")]
    Local,
    #[display("remote")]
    Remote,
}

impl Role {
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => anyhow::bail!("Unknown role '{other}', expected 'local' or 'remote'"),
        }
    }
}

/// Opaque token pairing an outgoing command request with its eventual response.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPos {
    pub path: String,
    pub line: u32,
    pub col: u32,
}

/// Both ends are inclusive, exactly as the editor reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPos {
    pub path: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// A command invocation, or the reply to one.
///
/// Without `request_id` and `callback_id` this is fire-and-forget. Replies echo the id they
/// answer and always carry `is_error`, which is how a reply is told apart from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    // A present `null` is a valid result, so it must not collapse into `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub result: Option<JSONValue>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<JSONValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JSONValue::deserialize(deserializer).map(Some)
}

impl ExecuteCommand {
    #[must_use]
    pub fn fire_and_forget(command: &str, args: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            args,
            request_id: None,
            callback_id: None,
            is_error: None,
            result: None,
        }
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.is_error.is_some()
    }

    /// The id this message correlates by, preferring `request_id`.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.request_id.as_ref().or(self.callback_id.as_ref())
    }

    /// Builds the reply to this request, echoing whichever id it carried.
    #[must_use]
    pub fn reply(&self, result: JSONValue, is_error: bool) -> Self {
        Self {
            command: self.command.clone(),
            args: vec![],
            request_id: self.request_id.clone(),
            callback_id: self.callback_id.clone(),
            is_error: Some(is_error),
            result: Some(result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseBuffer {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub path: String,
    pub text: String,
    pub cursor_line: u32,
    pub cursor_col: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    CursorPos(CursorPos),
    SelectionPos(SelectionPos),
    ExecuteCommand(ExecuteCommand),
    CloseBuffer(CloseBuffer),
    TextContent(TextContent),
}

/// The key under which each kind of payload travels in an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    CursorPos,
    SelectionPos,
    ExecuteCommand,
    CloseBuffer,
    TextContent,
}

impl MessageKind {
    pub const ALL: [Self; 5] = [
        Self::CursorPos,
        Self::SelectionPos,
        Self::ExecuteCommand,
        Self::CloseBuffer,
        Self::TextContent,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::CursorPos => "cursorPos",
            Self::SelectionPos => "selectionPos",
            Self::ExecuteCommand => "executeCommand",
            Self::CloseBuffer => "closeBuffer",
            Self::TextContent => "textContent",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl Message {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::CursorPos(_) => MessageKind::CursorPos,
            Self::SelectionPos(_) => MessageKind::SelectionPos,
            Self::ExecuteCommand(_) => MessageKind::ExecuteCommand,
            Self::CloseBuffer(_) => MessageKind::CloseBuffer,
            Self::TextContent(_) => MessageKind::TextContent,
        }
    }
}

/// A message together with the role of the session that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: Role,
    pub message: Message,
}

impl Envelope {
    #[must_use]
    pub const fn new(sender: Role, message: Message) -> Self {
        Self { sender, message }
    }
}

/// The single remembered position used to recognize duplicates and echoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPosition {
    pub path: String,
    pub line: u32,
    pub col: u32,
}

impl LastPosition {
    #[must_use]
    pub fn new(path: &str, line: u32, col: u32) -> Self {
        Self {
            path: path.to_string(),
            line,
            col,
        }
    }
}

impl From<&CursorPos> for LastPosition {
    fn from(cursor: &CursorPos) -> Self {
        Self::new(&cursor.path, cursor.line, cursor.col)
    }
}

impl From<LastPosition> for CursorPos {
    fn from(position: LastPosition) -> Self {
        Self {
            path: position.path,
            line: position.line,
            col: position.col,
        }
    }
}

impl fmt::Display for LastPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.col)
    }
}

pub mod factories {
    use super::{CursorPos, Envelope, ExecuteCommand, Message, Role, SelectionPos};

    #[must_use]
    pub fn cursor(path: &str, line: u32, col: u32) -> CursorPos {
        CursorPos {
            path: path.to_string(),
            line,
            col,
        }
    }

    #[must_use]
    pub fn selection(path: &str, start: (u32, u32), end: (u32, u32)) -> SelectionPos {
        SelectionPos {
            path: path.to_string(),
            start_line: start.0,
            start_col: start.1,
            end_line: end.0,
            end_col: end.1,
        }
    }

    #[must_use]
    pub fn command(command: &str, args: &[&str]) -> ExecuteCommand {
        ExecuteCommand::fire_and_forget(command, args.iter().map(ToString::to_string).collect())
    }

    #[must_use]
    pub fn from_remote(message: Message) -> Envelope {
        Envelope::new(Role::Remote, message)
    }

    #[must_use]
    pub fn from_local(message: Message) -> Envelope {
        Envelope::new(Role::Local, message)
    }
}
