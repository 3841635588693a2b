// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bookkeeping for commands that expect an answer from the peer.
//!
//! A synchronous call waits on a `oneshot` with a deadline, a callback call just stays registered
//! until the answer arrives. Either way, every entry is settled exactly once: whoever removes it
//! from its table delivers the outcome.

use crate::registry::ConnectionId;
use crate::types::{CorrelationId, ExecuteCommand};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value as JSONValue;
use std::collections::HashMap;
use std::future::poll_fn;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::debug;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

const ID_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    NoDestination,
    Timeout,
    Remote,
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("No peer is connected to receive '{command}'")]
    NoDestination { command: String },
    #[error("'{command}' got no response within {} ms", .elapsed.as_millis())]
    Timeout { command: String, elapsed: Duration },
    #[error("'{command}' failed on the peer: {message}")]
    Remote { command: String, message: String },
    #[error("The session was closed before a response arrived")]
    SessionClosed,
}

impl CommandError {
    #[must_use]
    pub const fn kind(&self) -> CommandErrorKind {
        match self {
            Self::NoDestination { .. } => CommandErrorKind::NoDestination,
            Self::Timeout { .. } => CommandErrorKind::Timeout,
            Self::Remote { .. } => CommandErrorKind::Remote,
            Self::SessionClosed => CommandErrorKind::SessionClosed,
        }
    }
}

pub type CommandResult = Result<JSONValue, CommandError>;
pub type ResponseSender = oneshot::Sender<CommandResult>;
pub type OnComplete = Box<dyn FnOnce(CommandResult) + Send>;

struct PendingRequest {
    command: String,
    issued_at: Instant,
    timeout_key: delay_queue::Key,
    response_tx: ResponseSender,
    recipients: Vec<ConnectionId>,
}

struct PendingCallback {
    command: String,
    on_complete: OnComplete,
    recipients: Vec<ConnectionId>,
}

enum Settled {
    Request(PendingRequest),
    Callback(PendingCallback),
}

impl Settled {
    fn command(&self) -> &str {
        match self {
            Self::Request(request) => &request.command,
            Self::Callback(callback) => &callback.command,
        }
    }

    fn deliver(self, result: CommandResult) {
        match self {
            Self::Request(request) => {
                // The caller may have given up waiting, that's fine.
                let _ = request.response_tx.send(result);
            }
            Self::Callback(callback) => (callback.on_complete)(result),
        }
    }
}

#[derive(Default)]
pub struct CommandTracker {
    requests: HashMap<CorrelationId, PendingRequest>,
    callbacks: HashMap<CorrelationId, PendingCallback>,
    /// Holds exactly the ids in `requests`.
    timeouts: DelayQueue<CorrelationId>,
}

impl CommandTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synchronous call and returns the message to send.
    pub fn begin_request(
        &mut self,
        command: &str,
        args: Vec<String>,
        timeout: Duration,
        response_tx: ResponseSender,
    ) -> ExecuteCommand {
        let id = self.fresh_id();
        let timeout_key = self.timeouts.insert(id.clone(), timeout);
        self.requests.insert(
            id.clone(),
            PendingRequest {
                command: command.to_string(),
                issued_at: Instant::now(),
                timeout_key,
                response_tx,
                recipients: vec![],
            },
        );
        debug!("Awaiting response to '{command}' as {id}");

        let mut message = ExecuteCommand::fire_and_forget(command, args);
        message.request_id = Some(id);
        message
    }

    /// Registers a callback call and returns the message to send. Callbacks never time out.
    pub fn begin_callback(
        &mut self,
        command: &str,
        args: Vec<String>,
        on_complete: OnComplete,
    ) -> ExecuteCommand {
        let id = self.fresh_id();
        self.callbacks.insert(
            id.clone(),
            PendingCallback {
                command: command.to_string(),
                on_complete,
                recipients: vec![],
            },
        );
        debug!("Registered callback for '{command}' as {id}");

        let mut message = ExecuteCommand::fire_and_forget(command, args);
        message.callback_id = Some(id);
        message
    }

    /// Settles the entry for `id` with a response from the peer.
    ///
    /// Returns false if there is no such entry, for example because it already timed out.
    pub fn resolve(&mut self, id: &CorrelationId, result: JSONValue, is_error: bool) -> bool {
        let Some(settled) = self.take(id) else {
            debug!("Ignoring response for {id}, which is not pending");
            return false;
        };
        let outcome = if is_error {
            Err(CommandError::Remote {
                command: settled.command().to_string(),
                message: error_message(&result),
            })
        } else {
            Ok(result)
        };
        settled.deliver(outcome);
        true
    }

    /// Waits until the deadline of some pending request has passed.
    ///
    /// Never completes while no request is pending, so it can sit in a `select!` loop.
    pub async fn next_timeout(&mut self) -> CorrelationId {
        if !self.timeouts.is_empty() {
            if let Some(expired) = poll_fn(|cx| self.timeouts.poll_expired(cx)).await {
                return expired.into_inner();
            }
        }
        std::future::pending().await
    }

    /// Settles a request whose deadline has passed. Must only be called with ids yielded by
    /// [`Self::next_timeout`].
    pub fn time_out(&mut self, id: &CorrelationId) {
        // Its timer has already left the queue.
        let Some(request) = self.requests.remove(id) else {
            return;
        };
        let elapsed = request.issued_at.elapsed();
        debug!("'{}' ({id}) timed out", request.command);
        let error = CommandError::Timeout {
            command: request.command.clone(),
            elapsed,
        };
        Settled::Request(request).deliver(Err(error));
    }

    /// Settles an entry early with `error`.
    pub fn fail(&mut self, id: &CorrelationId, error: CommandError) -> bool {
        match self.take(id) {
            Some(settled) => {
                settled.deliver(Err(error));
                true
            }
            None => false,
        }
    }

    /// Records which connections the request for `id` went out to.
    pub fn addressed(&mut self, id: &CorrelationId, recipients: Vec<ConnectionId>) {
        if let Some(request) = self.requests.get_mut(id) {
            request.recipients = recipients;
        } else if let Some(callback) = self.callbacks.get_mut(id) {
            callback.recipients = recipients;
        }
    }

    /// Forgets `connection` as a recipient. Entries that are left without anyone who could answer
    /// are settled with [`CommandError::NoDestination`]. Returns how many were.
    pub fn connection_lost(&mut self, connection: ConnectionId) -> usize {
        let orphaned: Vec<(CorrelationId, String)> = self
            .requests
            .iter_mut()
            .filter_map(|(id, request)| {
                forget(&mut request.recipients, connection)
                    .then(|| (id.clone(), request.command.clone()))
            })
            .chain(self.callbacks.iter_mut().filter_map(|(id, callback)| {
                forget(&mut callback.recipients, connection)
                    .then(|| (id.clone(), callback.command.clone()))
            }))
            .collect();
        for (id, command) in &orphaned {
            debug!("Connection #{connection} was the last one that could answer {id}");
            self.fail(
                id,
                CommandError::NoDestination {
                    command: command.clone(),
                },
            );
        }
        orphaned.len()
    }

    /// Settles everything still pending with [`CommandError::SessionClosed`].
    pub fn cancel_all(&mut self) {
        let pending = self.len();
        if pending > 0 {
            debug!("Cancelling {pending} pending command(s)");
        }
        self.timeouts.clear();
        for (_, request) in self.requests.drain() {
            Settled::Request(request).deliver(Err(CommandError::SessionClosed));
        }
        for (_, callback) in self.callbacks.drain() {
            Settled::Callback(callback).deliver(Err(CommandError::SessionClosed));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len() + self.callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&mut self, id: &CorrelationId) -> Option<Settled> {
        if let Some(request) = self.requests.remove(id) {
            self.timeouts.remove(&request.timeout_key);
            return Some(Settled::Request(request));
        }
        self.callbacks.remove(id).map(Settled::Callback)
    }

    fn fresh_id(&self) -> CorrelationId {
        loop {
            let id = CorrelationId(
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(ID_LENGTH)
                    .map(char::from)
                    .collect(),
            );
            if !self.requests.contains_key(&id) && !self.callbacks.contains_key(&id) {
                return id;
            }
        }
    }
}

/// True if this removed the last of `recipients`.
fn forget(recipients: &mut Vec<ConnectionId>, connection: ConnectionId) -> bool {
    let before = recipients.len();
    recipients.retain(|&recipient| recipient != connection);
    before > recipients.len() && recipients.is_empty()
}

fn error_message(result: &JSONValue) -> String {
    match result {
        JSONValue::String(message) => message.clone(),
        JSONValue::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::time::sleep;
    use tracing_test::traced_test;

    fn request(
        tracker: &mut CommandTracker,
        timeout_ms: u64,
    ) -> (CorrelationId, oneshot::Receiver<CommandResult>) {
        let (response_tx, response_rx) = oneshot::channel();
        let message = tracker.begin_request(
            "cmd",
            vec![],
            Duration::from_millis(timeout_ms),
            response_tx,
        );
        (message.request_id.unwrap(), response_rx)
    }

    fn recording_callback() -> (OnComplete, Arc<Mutex<Vec<CommandResult>>>) {
        let results = Arc::new(Mutex::new(vec![]));
        let sink = results.clone();
        (
            Box::new(move |result| sink.lock().unwrap().push(result)),
            results,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let mut tracker = CommandTracker::new();
        let (id, response_rx) = request(&mut tracker, 200);

        let expired = tracker.next_timeout().await;
        assert_eq!(expired, id);
        tracker.time_out(&expired);

        let error = response_rx.await.unwrap().unwrap_err();
        assert_eq!(error.kind(), CommandErrorKind::Timeout);
        let CommandError::Timeout { command, elapsed } = error else {
            unreachable!()
        };
        assert_eq!(command, "cmd");
        assert!(elapsed >= Duration::from_millis(200));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn answer_before_deadline_wins() {
        let mut tracker = CommandTracker::new();
        let (id, response_rx) = request(&mut tracker, 200);

        sleep(Duration::from_millis(50)).await;
        assert!(tracker.resolve(&id, json!("done"), false));
        assert_eq!(response_rx.await.unwrap(), Ok(json!("done")));

        // Nothing is left to expire, not even after the original deadline.
        let late = tokio::time::timeout(Duration::from_millis(500), tracker.next_timeout()).await;
        assert!(late.is_err());
        assert!(!tracker.resolve(&id, json!("again"), false));
    }

    #[tokio::test]
    async fn remote_errors_carry_the_message() {
        let mut tracker = CommandTracker::new();
        let (id, response_rx) = request(&mut tracker, 1000);

        tracker.resolve(&id, json!("Unknown command 'cmd'"), true);

        assert_eq!(
            response_rx.await.unwrap(),
            Err(CommandError::Remote {
                command: "cmd".into(),
                message: "Unknown command 'cmd'".into()
            })
        );
    }

    #[test]
    fn callbacks_complete_exactly_once() {
        let mut tracker = CommandTracker::new();
        let (on_complete, results) = recording_callback();
        let message = tracker.begin_callback("format", vec!["--all".into()], on_complete);
        assert_eq!(message.args, vec!["--all".to_string()]);
        assert_eq!(message.request_id, None);
        let id = message.callback_id.unwrap();

        assert!(tracker.resolve(&id, json!(3), false));
        assert!(!tracker.resolve(&id, json!(4), false));
        assert!(!tracker.fail(&id, CommandError::SessionClosed));

        assert_eq!(*results.lock().unwrap(), vec![Ok(json!(3))]);
    }

    #[traced_test]
    #[test]
    fn unknown_ids_are_ignored() {
        let mut tracker = CommandTracker::new();
        assert!(!tracker.resolve(&"nope".into(), JSONValue::Null, false));
        assert!(logs_contain("Ignoring response for nope, which is not pending"));
    }

    #[tokio::test]
    async fn fail_settles_early() {
        let mut tracker = CommandTracker::new();
        let (id, response_rx) = request(&mut tracker, 1000);

        let no_destination = CommandError::NoDestination {
            command: "cmd".into(),
        };
        assert!(tracker.fail(&id, no_destination.clone()));
        assert_eq!(response_rx.await.unwrap(), Err(no_destination));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_closes_everything() {
        let mut tracker = CommandTracker::new();
        let (_, first_rx) = request(&mut tracker, 1000);
        let (_, second_rx) = request(&mut tracker, 1000);
        let (on_complete, results) = recording_callback();
        tracker.begin_callback("cmd", vec![], on_complete);
        assert_eq!(tracker.len(), 3);

        tracker.cancel_all();

        assert_eq!(first_rx.await.unwrap(), Err(CommandError::SessionClosed));
        assert_eq!(second_rx.await.unwrap(), Err(CommandError::SessionClosed));
        assert_eq!(
            *results.lock().unwrap(),
            vec![Err(CommandError::SessionClosed)]
        );
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn losing_every_recipient_settles_the_entry() {
        let mut tracker = CommandTracker::new();
        let (only_on_one, only_on_one_rx) = request(&mut tracker, 30_000);
        let (on_both, mut on_both_rx) = request(&mut tracker, 30_000);
        let (on_complete, results) = recording_callback();
        let callback = tracker.begin_callback("cmd", vec![], on_complete);
        let callback = callback.callback_id.unwrap();
        tracker.addressed(&only_on_one, vec![1]);
        tracker.addressed(&on_both, vec![1, 2]);
        tracker.addressed(&callback, vec![2]);

        assert_eq!(tracker.connection_lost(7), 0);
        assert_eq!(tracker.connection_lost(1), 1);
        assert_eq!(
            only_on_one_rx.await.unwrap(),
            Err(CommandError::NoDestination {
                command: "cmd".into()
            })
        );
        assert!(on_both_rx.try_recv().is_err());
        assert!(results.lock().unwrap().is_empty());

        assert_eq!(tracker.connection_lost(2), 2);
        assert_eq!(
            on_both_rx.await.unwrap().unwrap_err().kind(),
            CommandErrorKind::NoDestination
        );
        assert_eq!(results.lock().unwrap().len(), 1);
        assert!(tracker.is_empty());
        assert_eq!(tracker.connection_lost(2), 0);
    }

    #[test]
    fn ids_are_distinct() {
        let mut tracker = CommandTracker::new();
        let (on_complete, _) = recording_callback();
        let first = tracker.begin_callback("a", vec![], on_complete);
        let (on_complete, _) = recording_callback();
        let second = tracker.begin_callback("a", vec![], on_complete);
        assert_ne!(first.callback_id, second.callback_id);
    }
}
