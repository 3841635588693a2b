// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire format: one JSON object per line, `{"sender": ..., "<kind>": {...}}`.
//!
//! Encoding and decoding are pure. Framing happens in the transport, which uses a
//! [`LinesCodec`](tokio_util::codec::LinesCodec) capped at [`MAX_LINE_LENGTH`].

use crate::types::{CloseBuffer, CursorPos, Envelope, ExecuteCommand, Message, MessageKind, Role};
use crate::types::{SelectionPos, TextContent};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JSONValue};
use thiserror::Error;

/// Full-buffer syncs can be large, but a peer should never make us buffer without bound.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

const SENDER_KEY: &str = "sender";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Message is not a JSON object")]
    NotAnObject,
    #[error("Message has no 'sender'")]
    MissingSender,
    #[error("Message has an invalid 'sender': {0}")]
    InvalidSender(JSONValue),
    #[error("Message carries no payload")]
    MissingPayload,
    #[error("Message carries more than one payload: {}", .kinds.join(", "))]
    AmbiguousPayload { kinds: Vec<String> },
    #[error("Unrecognized message kind '{kind}'")]
    Unrecognized { kind: String },
    #[error("Invalid '{kind}' payload: {source}")]
    InvalidPayload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Whether the peer simply speaks a message kind we don't know, as opposed to sending garbage.
    #[must_use]
    pub const fn is_unrecognized(&self) -> bool {
        matches!(self, Self::Unrecognized { .. })
    }
}

#[must_use]
pub fn encode(envelope: &Envelope) -> String {
    let payload = match &envelope.message {
        Message::CursorPos(payload) => serde_json::to_value(payload),
        Message::SelectionPos(payload) => serde_json::to_value(payload),
        Message::ExecuteCommand(payload) => serde_json::to_value(payload),
        Message::CloseBuffer(payload) => serde_json::to_value(payload),
        Message::TextContent(payload) => serde_json::to_value(payload),
    }
    .expect("Message payloads should always be representable as JSON");

    let mut map = Map::new();
    map.insert(SENDER_KEY.to_string(), envelope.sender.to_string().into());
    map.insert(envelope.message.kind().key().to_string(), payload);
    JSONValue::Object(map).to_string()
}

pub fn decode(line: &str) -> Result<Envelope, DecodeError> {
    let value: JSONValue = serde_json::from_str(line).map_err(DecodeError::Malformed)?;
    let JSONValue::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let sender = match map.remove(SENDER_KEY) {
        None => return Err(DecodeError::MissingSender),
        Some(sender) => serde_json::from_value::<Role>(sender.clone())
            .map_err(|_| DecodeError::InvalidSender(sender))?,
    };

    let mut entries = map.into_iter();
    let (key, payload) = entries.next().ok_or(DecodeError::MissingPayload)?;
    let rest: Vec<String> = entries.map(|(key, _)| key).collect();
    if !rest.is_empty() {
        let mut kinds = vec![key];
        kinds.extend(rest);
        return Err(DecodeError::AmbiguousPayload { kinds });
    }

    let kind = MessageKind::from_key(&key).ok_or(DecodeError::Unrecognized { kind: key })?;
    let message = match kind {
        MessageKind::CursorPos => Message::CursorPos(payload_as::<CursorPos>(kind, payload)?),
        MessageKind::SelectionPos => {
            Message::SelectionPos(payload_as::<SelectionPos>(kind, payload)?)
        }
        MessageKind::ExecuteCommand => {
            Message::ExecuteCommand(payload_as::<ExecuteCommand>(kind, payload)?)
        }
        MessageKind::CloseBuffer => Message::CloseBuffer(payload_as::<CloseBuffer>(kind, payload)?),
        MessageKind::TextContent => Message::TextContent(payload_as::<TextContent>(kind, payload)?),
    };

    Ok(Envelope { sender, message })
}

fn payload_as<T: DeserializeOwned>(
    kind: MessageKind,
    payload: JSONValue,
) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::InvalidPayload { kind, source })
}
