// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Live peer connections, and delivery of encoded envelopes to them.

use crate::protocol::{self, MAX_LINE_LENGTH};
use crate::types::Envelope;
use anyhow::Result;
use async_trait::async_trait;
use futures::SinkExt;
use std::collections::BTreeMap;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::{debug, warn};

pub type ConnectionId = usize;

/// The sending side of one peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    fn is_open(&self) -> bool;
    /// Sends one already-encoded envelope.
    async fn send(&mut self, line: &str) -> Result<()>;
}

pub struct TcpPeerConnection {
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    open: bool,
}

impl TcpPeerConnection {
    #[must_use]
    pub fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            writer: FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            open: true,
        }
    }
}

#[async_trait]
impl PeerConnection for TcpPeerConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        if let Err(err) = self.writer.send(line).await {
            self.open = false;
            return Err(err.into());
        }
        Ok(())
    }
}

/// The set of connections a session can deliver to. There may be none.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Box<dyn PeerConnection>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, keeping the existing connection, if `id` is already registered.
    pub fn add(&mut self, id: ConnectionId, connection: Box<dyn PeerConnection>) -> bool {
        if self.connections.contains_key(&id) {
            debug!("Connection #{id} is already registered");
            return false;
        }
        self.connections.insert(id, connection);
        true
    }

    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[must_use]
    pub fn has_active_connections(&self) -> bool {
        self.connections.values().any(|connection| connection.is_open())
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }

    /// Delivers `envelope` to every open connection and returns how many deliveries succeeded.
    ///
    /// Connections that turn out to be closed, or fail while writing, are dropped from the
    /// registry; the others still get the message.
    pub async fn broadcast(&mut self, envelope: &Envelope) -> usize {
        self.broadcast_recipients(envelope).await.len()
    }

    /// Like [`Self::broadcast`], but returns the connections that got the message.
    pub async fn broadcast_recipients(&mut self, envelope: &Envelope) -> Vec<ConnectionId> {
        let line = protocol::encode(envelope);
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        let mut recipients = vec![];
        for id in ids {
            if self.deliver(id, &line).await {
                recipients.push(id);
            }
        }
        if recipients.is_empty() {
            debug!("No destination for {} message", envelope.message.kind());
        }
        recipients
    }

    pub async fn send_to(&mut self, id: ConnectionId, envelope: &Envelope) -> bool {
        if !self.connections.contains_key(&id) {
            debug!("Connection #{id} is gone, dropping {}", envelope.message.kind());
            return false;
        }
        self.deliver(id, &protocol::encode(envelope)).await
    }

    async fn deliver(&mut self, id: ConnectionId, line: &str) -> bool {
        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };
        if !connection.is_open() {
            debug!("Connection #{id} is closed, removing it");
            self.connections.remove(&id);
            return false;
        }
        let result = connection.send(line).await;
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to send to connection #{id}, removing it: {err}");
                self.connections.remove(&id);
                false
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use anyhow::bail;
    use std::sync::{Arc, Mutex};

    /// Records what it was sent. Can be told to fail or to report itself closed.
    pub struct RecordingConnection {
        pub sent: Arc<Mutex<Vec<String>>>,
        pub fail_writes: bool,
        pub open: bool,
    }

    impl RecordingConnection {
        pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(vec![]));
            (
                Self {
                    sent: sent.clone(),
                    fail_writes: false,
                    open: true,
                },
                sent,
            )
        }

        pub fn failing() -> Self {
            let (mut connection, _) = Self::new();
            connection.fail_writes = true;
            connection
        }
    }

    #[async_trait]
    impl PeerConnection for RecordingConnection {
        fn is_open(&self) -> bool {
            self.open
        }

        async fn send(&mut self, line: &str) -> Result<()> {
            if self.fail_writes {
                bail!("connection reset by peer");
            }
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }
}
