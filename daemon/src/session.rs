// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A running link between this editor and its peers.
//!
//! The [`Orchestrator`] owns the lifecycle: it binds the listener and spawns a [`SessionActor`],
//! which owns everything stateful (connections, the last cursor position, pending commands and
//! the editor itself) and processes one event at a time. Everyone else talks to the actor through
//! a [`SessionHandle`].

use crate::commands::{
    CommandError, CommandResult, CommandTracker, OnComplete, ResponseSender,
    DEFAULT_COMMAND_TIMEOUT,
};
use crate::debounce::{Debouncer, DEFAULT_DEBOUNCE};
use crate::editor::{CommandExecutor, Editor};
use crate::protocol::{self, MAX_LINE_LENGTH};
use crate::reconciler::{self, CursorDecision, CursorReconciler, OpenTarget};
use crate::registry::{ConnectionId, ConnectionRegistry, TcpPeerConnection};
use crate::retry::{self, RetryPolicy, TransportError};
use crate::types::{
    CloseBuffer, CursorPos, Envelope, ExecuteCommand, LastPosition, Message, Role, SelectionPos,
    TextContent,
};
use futures::StreamExt;
use serde_json::Value as JSONValue;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::net::{tcp::OwnedReadHalf, TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_HOST: &str = "127.0.0.1";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub role: Role,
    pub debounce: Duration,
    pub command_timeout: Duration,
    /// How long [`Orchestrator::start_when_ready`] keeps probing the editor.
    pub readiness: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            role: Role::Local,
            debounce: DEFAULT_DEBOUNCE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            readiness: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("The editor did not become ready: {0}")]
    NotReady(#[source] TransportError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("The session is not running")]
    Closed,
}

// These messages are sent to the task that owns the session state.
pub enum SessionMessage {
    NewStream(ConnectionId, TcpStream),
    FromPeer(ConnectionId, String),
    ConnectionClosed {
        id: ConnectionId,
        /// False if the peer hung up without sending a single line.
        heard_from: bool,
    },
    CursorMoved(CursorPos),
    SelectionChanged(SelectionPos),
    CloseBuffer(String),
    SendText(TextContent),
    SendCommand {
        command: String,
        args: Vec<String>,
        response_tx: oneshot::Sender<Result<(), CommandError>>,
    },
    Call {
        command: String,
        args: Vec<String>,
        timeout: Duration,
        response_tx: ResponseSender,
    },
    CallWithCallback {
        command: String,
        args: Vec<String>,
        on_complete: OnComplete,
    },
    GetLastPosition {
        response_tx: oneshot::Sender<Option<LastPosition>>,
    },
    GetConnectionCount {
        response_tx: oneshot::Sender<usize>,
    },
    HasActiveConnections {
        response_tx: oneshot::Sender<bool>,
    },
}

impl fmt::Debug for SessionMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let repr = match self {
            Self::NewStream(id, _) => format!("new connection #{id}"),
            Self::FromPeer(id, _) => format!("message from connection #{id}"),
            Self::ConnectionClosed { id, .. } => format!("connection #{id} closed"),
            Self::CursorMoved(cursor) => format!("cursor moved to {}", LastPosition::from(cursor)),
            Self::SelectionChanged(_) => "selection changed".to_string(),
            Self::CloseBuffer(path) => format!("close {path}"),
            Self::SendText(content) => format!("text of {}", content.path),
            Self::SendCommand { command, .. } => format!("send '{command}'"),
            Self::Call { command, .. } => format!("call '{command}'"),
            Self::CallWithCallback { command, .. } => format!("call '{command}' with callback"),
            Self::GetLastPosition { .. } => "get last position".to_string(),
            Self::GetConnectionCount { .. } => "get connection count".to_string(),
            Self::HasActiveConnections { .. } => "has active connections".to_string(),
        };
        write!(f, "{repr}")
    }
}

impl SessionMessage {
    /// Settles a request that will never be processed.
    fn reject(self) {
        match self {
            Self::SendCommand { response_tx, .. } => {
                let _ = response_tx.send(Err(CommandError::SessionClosed));
            }
            Self::Call { response_tx, .. } => {
                let _ = response_tx.send(Err(CommandError::SessionClosed));
            }
            Self::CallWithCallback { on_complete, .. } => {
                on_complete(Err(CommandError::SessionClosed));
            }
            _ => {}
        }
    }
}

/// A peer's command that has finished running in the editor.
struct FinishedCommand {
    connection: ConnectionId,
    request: ExecuteCommand,
    outcome: anyhow::Result<JSONValue>,
}

/// Owns the state of one session and applies every event to it, in order.
pub struct SessionActor {
    message_rx: mpsc::Receiver<SessionMessage>,
    /// Handed to reader tasks.
    message_tx: mpsc::Sender<SessionMessage>,
    shutdown: CancellationToken,
    role: Role,
    editor: Box<dyn Editor>,
    executor: Arc<dyn CommandExecutor>,
    registry: ConnectionRegistry,
    reconciler: CursorReconciler,
    tracker: CommandTracker,
    readers: JoinSet<()>,
    /// Commands the peers asked us to run.
    commands: JoinSet<FinishedCommand>,
}

impl SessionActor {
    fn new(
        message_rx: mpsc::Receiver<SessionMessage>,
        message_tx: mpsc::Sender<SessionMessage>,
        shutdown: CancellationToken,
        role: Role,
        editor: Box<dyn Editor>,
    ) -> Self {
        Self {
            message_rx,
            message_tx,
            shutdown,
            role,
            executor: editor.command_executor(),
            editor,
            registry: ConnectionRegistry::new(),
            reconciler: CursorReconciler::new(),
            tracker: CommandTracker::new(),
            readers: JoinSet::new(),
            commands: JoinSet::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(message) = self.message_rx.recv() => self.handle_message(message).await,
                id = self.tracker.next_timeout() => self.tracker.time_out(&id),
                Some(finished) = self.readers.join_next() => {
                    if let Err(err) = finished {
                        if err.is_panic() {
                            warn!("A connection reader panicked: {err}");
                        }
                    }
                }
                Some(finished) = self.commands.join_next() => match finished {
                    Ok(finished) => self.answer(finished).await,
                    Err(err) => {
                        if err.is_panic() {
                            warn!("A command from a peer panicked: {err}");
                        }
                    }
                },
            }
        }
        self.close().await;
    }

    async fn close(&mut self) {
        self.message_rx.close();
        while let Ok(message) = self.message_rx.try_recv() {
            message.reject();
        }
        self.tracker.cancel_all();
        self.registry.clear();
        self.commands.shutdown().await;
        self.readers.shutdown().await;
        debug!("Session closed");
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::NewStream(id, stream) => self.add_stream(id, stream),
            SessionMessage::FromPeer(id, line) => self.handle_peer_line(id, &line).await,
            SessionMessage::ConnectionClosed { id, heard_from } => {
                if !self.registry.remove(id) {
                    return;
                }
                if heard_from {
                    info!("Connection #{id} closed");
                } else {
                    debug!("Connection #{id} closed without sending anything");
                }
                self.tracker.connection_lost(id);
            }
            SessionMessage::CursorMoved(cursor) => {
                if !self.editor.is_focused() {
                    debug!("Editor is not focused, not sending cursor");
                    return;
                }
                if let Some(cursor) =
                    self.reconciler
                        .prepare_cursor_update(&cursor.path, cursor.line, cursor.col)
                {
                    self.broadcast(Message::CursorPos(cursor)).await;
                }
            }
            SessionMessage::SelectionChanged(selection) => {
                if !self.editor.is_focused() {
                    debug!("Editor is not focused, not sending selection");
                    return;
                }
                self.broadcast(Message::SelectionPos(selection)).await;
            }
            SessionMessage::CloseBuffer(path) => {
                self.broadcast(Message::CloseBuffer(CloseBuffer { path }))
                    .await;
            }
            SessionMessage::SendText(content) => {
                self.broadcast(Message::TextContent(content)).await;
            }
            SessionMessage::SendCommand {
                command,
                args,
                response_tx,
            } => {
                let message = ExecuteCommand::fire_and_forget(&command, args);
                let result = if self.registry.has_active_connections()
                    && self.broadcast(Message::ExecuteCommand(message)).await > 0
                {
                    Ok(())
                } else {
                    Err(CommandError::NoDestination { command })
                };
                let _ = response_tx.send(result);
            }
            SessionMessage::Call {
                command,
                args,
                timeout,
                response_tx,
            } => {
                if !self.registry.has_active_connections() {
                    let _ = response_tx.send(Err(CommandError::NoDestination { command }));
                    return;
                }
                let request = self
                    .tracker
                    .begin_request(&command, args, timeout, response_tx);
                self.issue(command, request).await;
            }
            SessionMessage::CallWithCallback {
                command,
                args,
                on_complete,
            } => {
                if !self.registry.has_active_connections() {
                    on_complete(Err(CommandError::NoDestination { command }));
                    return;
                }
                let request = self.tracker.begin_callback(&command, args, on_complete);
                self.issue(command, request).await;
            }
            SessionMessage::GetLastPosition { response_tx } => {
                let _ = response_tx.send(self.reconciler.last_position().cloned());
            }
            SessionMessage::GetConnectionCount { response_tx } => {
                let _ = response_tx.send(self.registry.len());
            }
            SessionMessage::HasActiveConnections { response_tx } => {
                let _ = response_tx.send(self.registry.has_active_connections());
            }
        }
    }

    fn add_stream(&mut self, id: ConnectionId, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        if !self
            .registry
            .add(id, Box::new(TcpPeerConnection::new(write_half)))
        {
            return;
        }
        self.readers.spawn(read_from_peer(
            id,
            read_half,
            self.message_tx.clone(),
            self.shutdown.clone(),
        ));
    }

    /// Sends a tracked request, failing it right away if nobody received it.
    async fn issue(&mut self, command: String, request: ExecuteCommand) {
        let Some(id) = request.correlation_id().cloned() else {
            return;
        };
        let envelope = Envelope::new(self.role, Message::ExecuteCommand(request));
        let recipients = self.registry.broadcast_recipients(&envelope).await;
        if recipients.is_empty() {
            self.tracker
                .fail(&id, CommandError::NoDestination { command });
        } else {
            self.tracker.addressed(&id, recipients);
        }
    }

    async fn broadcast(&mut self, message: Message) -> usize {
        self.registry
            .broadcast(&Envelope::new(self.role, message))
            .await
    }

    async fn handle_peer_line(&mut self, id: ConnectionId, line: &str) {
        let envelope = match protocol::decode(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Ignoring message from connection #{id}: {err}");
                return;
            }
        };
        if envelope.sender == self.role {
            debug!(
                "Ignoring {} message that carries our own role",
                envelope.message.kind()
            );
            return;
        }

        match envelope.message {
            Message::CursorPos(cursor) => self.apply_cursor(&cursor),
            Message::SelectionPos(selection) => {
                reconciler::apply_selection(&selection, &mut *self.editor);
            }
            Message::ExecuteCommand(command) if command.is_response() => {
                let Some(correlation_id) = command.correlation_id() else {
                    debug!("Ignoring response to '{}' without an id", command.command);
                    return;
                };
                self.tracker.resolve(
                    correlation_id,
                    command.result.clone().unwrap_or(JSONValue::Null),
                    command.is_error.unwrap_or(false),
                );
            }
            Message::ExecuteCommand(command) => self.run_command(id, command),
            Message::CloseBuffer(CloseBuffer { path }) => self.editor.close_document(&path),
            Message::TextContent(content) => {
                if !self.editor.supports_text_sync() {
                    debug!("Editor can't take text content, dropping it for {}", content.path);
                    return;
                }
                self.editor.set_text(&content.path, &content.text);
                self.apply_cursor(&CursorPos {
                    path: content.path,
                    line: content.cursor_line,
                    col: content.cursor_col,
                });
            }
        }
    }

    fn apply_cursor(&mut self, cursor: &CursorPos) {
        match self.reconciler.apply_cursor_update(cursor, &*self.editor) {
            CursorDecision::Suppress => {}
            CursorDecision::Apply { target, open, .. } => {
                if let Some(open) = open {
                    self.editor
                        .open_document(&target.path, open == OpenTarget::NewTab);
                }
                self.editor.set_cursor_position(target.line, target.col);
            }
        }
    }

    fn run_command(&mut self, connection: ConnectionId, request: ExecuteCommand) {
        let executor = Arc::clone(&self.executor);
        self.commands.spawn(async move {
            let outcome = executor
                .execute_command(&request.command, &request.args)
                .await;
            FinishedCommand {
                connection,
                request,
                outcome,
            }
        });
    }

    async fn answer(&mut self, finished: FinishedCommand) {
        let FinishedCommand {
            connection,
            request,
            outcome,
        } = finished;

        if request.correlation_id().is_none() {
            if let Err(err) = outcome {
                warn!("Command '{}' from the peer failed: {err:#}", request.command);
            }
            return;
        }

        let reply = match outcome {
            Ok(result) => request.reply(result, false),
            Err(err) => request.reply(JSONValue::from(format!("{err:#}")), true),
        };
        let envelope = Envelope::new(self.role, Message::ExecuteCommand(reply));
        if !self.registry.send_to(connection, &envelope).await {
            debug!("Could not answer '{}', the caller is gone", request.command);
        }
    }
}

async fn read_from_peer(
    id: ConnectionId,
    read_half: OwnedReadHalf,
    message_tx: mpsc::Sender<SessionMessage>,
    shutdown: CancellationToken,
) {
    let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut heard_from = false;
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => return,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(line)) => {
                heard_from = true;
                if message_tx
                    .send(SessionMessage::FromPeer(id, line))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Some(Err(err)) => {
                warn!("Failed to read from connection #{id}: {err}");
                break;
            }
            None => break,
        }
    }
    let _ = message_tx
        .send(SessionMessage::ConnectionClosed { id, heard_from })
        .await;
}

async fn accept_connections(
    listener: TcpListener,
    handle: SessionHandle,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => match handle.attach(stream).await {
                Some(id) => debug!("Accepted connection #{id} from {addr}"),
                None => break,
            },
            Err(err) => warn!("Error while accepting a connection: {err}"),
        }
    }
    debug!("Stopped accepting connections");
}

/// This handle knows how to talk to the [`SessionActor`]. It is cheap to clone.
///
/// Once the session has stopped, commands fail with [`CommandError::SessionClosed`], emissions
/// are dropped and queries return empty answers.
#[derive(Clone)]
pub struct SessionHandle {
    message_tx: mpsc::Sender<SessionMessage>,
    debouncer: Debouncer<CursorPos>,
    next_id: Arc<AtomicUsize>,
    command_timeout: Duration,
}

impl SessionHandle {
    async fn send_message(&self, message: SessionMessage) {
        if let Err(mpsc::error::SendError(message)) = self.message_tx.send(message).await {
            debug!("Session is closed, dropping {message:?}");
            message.reject();
        }
    }

    async fn query<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Option<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(build(response_tx)).await;
        response_rx.await.ok()
    }

    /// Reports a local caret move. Bursts are collapsed, only the last position goes out.
    pub fn cursor_moved(&self, path: &str, line: u32, col: u32) {
        self.debouncer.call(CursorPos {
            path: path.to_string(),
            line,
            col,
        });
    }

    pub async fn selection_changed(&self, selection: SelectionPos) {
        self.send_message(SessionMessage::SelectionChanged(selection))
            .await;
    }

    pub async fn close_buffer(&self, path: &str) {
        self.send_message(SessionMessage::CloseBuffer(path.to_string()))
            .await;
    }

    pub async fn send_text(&self, content: TextContent) {
        self.send_message(SessionMessage::SendText(content)).await;
    }

    /// Runs `command` on the peer without waiting for it.
    pub async fn send_command(&self, command: &str, args: Vec<String>) -> Result<(), CommandError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(SessionMessage::SendCommand {
            command: command.to_string(),
            args,
            response_tx,
        })
        .await;
        response_rx.await.unwrap_or(Err(CommandError::SessionClosed))
    }

    /// Runs `command` on the peer and waits for its result, at most `timeout` (or the configured
    /// default).
    pub async fn call(
        &self,
        command: &str,
        args: Vec<String>,
        timeout: Option<Duration>,
    ) -> CommandResult {
        let (response_tx, response_rx) = oneshot::channel();
        self.send_message(SessionMessage::Call {
            command: command.to_string(),
            args,
            timeout: timeout.unwrap_or(self.command_timeout),
            response_tx,
        })
        .await;
        response_rx.await.unwrap_or(Err(CommandError::SessionClosed))
    }

    /// Runs `command` on the peer. `on_complete` is called exactly once, with the result or the
    /// reason there is none.
    pub async fn call_with_callback<F>(&self, command: &str, args: Vec<String>, on_complete: F)
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        self.send_message(SessionMessage::CallWithCallback {
            command: command.to_string(),
            args,
            on_complete: Box::new(on_complete),
        })
        .await;
    }

    /// Opens an outgoing connection to a peer, which then behaves like an accepted one.
    pub async fn connect(
        &self,
        addr: &str,
        policy: &RetryPolicy,
    ) -> Result<ConnectionId, SessionError> {
        let stream = retry::connect_with_retry(addr, policy).await?;
        let id = self.attach(stream).await.ok_or(SessionError::Closed)?;
        info!("Connected to peer {addr} as connection #{id}");
        Ok(id)
    }

    async fn attach(&self, stream: TcpStream) -> Option<ConnectionId> {
        let id = self.next_connection_id();
        self.message_tx
            .send(SessionMessage::NewStream(id, stream))
            .await
            .ok()
            .map(|()| id)
    }

    pub async fn last_position(&self) -> Option<LastPosition> {
        self.query(|response_tx| SessionMessage::GetLastPosition { response_tx })
            .await
            .flatten()
    }

    pub async fn connection_count(&self) -> usize {
        self.query(|response_tx| SessionMessage::GetConnectionCount { response_tx })
            .await
            .unwrap_or(0)
    }

    pub async fn has_active_connections(&self) -> bool {
        self.query(|response_tx| SessionMessage::HasActiveConnections { response_tx })
            .await
            .unwrap_or(false)
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct RunningSession {
    handle: SessionHandle,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    actor_task: JoinHandle<()>,
}

/// Starts and stops sessions. At most one runs at a time.
pub struct Orchestrator {
    config: SessionConfig,
    state: SessionState,
    running: Option<RunningSession>,
}

impl Orchestrator {
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Stopped,
            running: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    #[must_use]
    pub fn handle(&self) -> Option<SessionHandle> {
        self.running.as_ref().map(|running| running.handle.clone())
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Starts listening and returns a handle to the new session. A session that is already
    /// running is stopped first.
    pub async fn start<E: Editor + 'static>(
        &mut self,
        editor: E,
    ) -> Result<SessionHandle, SessionError> {
        if self.running.is_some() {
            info!("Restarting the session");
            self.stop().await;
        }
        self.state = SessionState::Starting;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let bound = match TcpListener::bind((self.config.host.as_str(), self.config.port)).await {
            Ok(listener) => listener.local_addr().map(|local_addr| (listener, local_addr)),
            Err(err) => Err(err),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.state = SessionState::Stopped;
                return Err(SessionError::Bind { addr, source });
            }
        };
        info!("Listening for peers on {local_addr}");

        let shutdown = CancellationToken::new();
        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let debouncer = {
            let message_tx = message_tx.clone();
            Debouncer::spawn(self.config.debounce, shutdown.clone(), move |cursor| {
                let message_tx = message_tx.clone();
                async move {
                    let _ = message_tx.send(SessionMessage::CursorMoved(cursor)).await;
                }
            })
        };

        let handle = SessionHandle {
            message_tx: message_tx.clone(),
            debouncer,
            next_id: Arc::default(),
            command_timeout: self.config.command_timeout,
        };

        let actor = SessionActor::new(
            message_rx,
            message_tx,
            shutdown.clone(),
            self.config.role,
            Box::new(editor),
        );
        let actor_task = tokio::spawn(actor.run());
        let accept_task = tokio::spawn(accept_connections(
            listener,
            handle.clone(),
            shutdown.clone(),
        ));

        self.running = Some(RunningSession {
            handle: handle.clone(),
            local_addr,
            shutdown,
            accept_task,
            actor_task,
        });
        self.state = SessionState::Running;
        Ok(handle)
    }

    /// Waits until `probe` reports that the editor side is up, then starts.
    pub async fn start_when_ready<E, F, Fut>(
        &mut self,
        editor: E,
        probe: F,
    ) -> Result<SessionHandle, SessionError>
    where
        E: Editor + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        retry::wait_until_ready(probe, &self.config.readiness)
            .await
            .map_err(SessionError::NotReady)?;
        self.start(editor).await
    }

    /// Stops the session, settling every pending command. Does nothing if none is running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(err) = running.accept_task.await {
            warn!("Accept task ended abnormally: {err}");
        }
        if let Err(err) = running.actor_task.await {
            warn!("Session task ended abnormally: {err}");
        }
        self.state = SessionState::Stopped;
        info!("Stopped listening on {}", running.local_addr);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}
