// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use tandem_integration_tests::harness::*;
use tandem_integration_tests::peer::*;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tandem::commands::{CommandError, CommandErrorKind};
use tandem::editor::EditorCall;
use tandem::retry::RetryPolicy;
use tandem::types::{factories::*, LastPosition, Role, TextContent};
use tokio::time::Duration;

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        deadline: None,
    }
}

async fn wait_for_position(session: &TestSession, expected: LastPosition) {
    let handle = session.handle.clone();
    eventually(&format!("last position {expected}"), move || {
        let handle = handle.clone();
        let expected = expected.clone();
        async move { handle.last_position().await == Some(expected) }
    })
    .await;
}

#[tokio::test]
async fn peer_cursor_moves_local_caret() {
    let session = TestSession::start(Role::Local).await;
    session.editor.open("/a", "1\n2\n3\n4\nfive\n6");
    assert_ne!(session.addr().port(), 0);

    let mut peer = MockPeer::connect(session.addr()).await;
    peer.send(r#"{"sender":"remote","cursorPos":{"path":"/a","line":5,"col":3}}"#)
        .await;

    wait_for_position(&session, LastPosition::new("/a", 5, 3)).await;
    assert_eq!(
        session.editor.calls(),
        vec![EditorCall::SetCursor { line: 5, col: 3 }]
    );
}

#[tokio::test]
async fn stale_cursor_is_clamped_to_local_position() {
    let session = TestSession::start(Role::Local).await;
    let content: Vec<String> = (1..=9).map(|n| format!("line {n}")).collect();
    session.editor.open("/a", &content.join("\n"));
    session.editor.move_cursor(4, 2);

    let mut peer = MockPeer::connect(session.addr()).await;
    peer.send(r#"{"sender":"remote","cursorPos":{"path":"/a","line":15,"col":0}}"#)
        .await;

    wait_for_position(&session, LastPosition::new("/a", 4, 2)).await;
    assert_eq!(session.editor.cursor(), (4, 2));
}

#[tokio::test]
async fn cursor_for_another_document_opens_it() {
    let session = TestSession::start(Role::Local).await;
    session.editor.open("/a", "a");
    session.editor.set_terminal_view(true);

    let mut peer = MockPeer::connect(session.addr()).await;
    peer.send(r#"{"sender":"remote","cursorPos":{"path":"/b","line":2,"col":1}}"#)
        .await;

    wait_for_position(&session, LastPosition::new("/b", 2, 1)).await;
    assert_eq!(
        session.editor.calls(),
        vec![
            EditorCall::Open {
                path: "/b".into(),
                new_tab: true
            },
            EditorCall::SetCursor { line: 2, col: 1 },
        ]
    );
}

#[tokio::test]
async fn caret_bursts_are_collapsed_and_deduplicated() {
    let session = TestSession::start(Role::Local).await;
    let mut peer = MockPeer::connect(session.addr()).await;
    session.wait_for_connections(1).await;

    for col in 1..=5 {
        session.handle.cursor_moved("/a", 1, col);
    }
    assert_eq!(
        peer.recv().await,
        json!({"sender": "local", "cursorPos": {"path": "/a", "line": 1, "col": 5}})
    );

    // Same position again, nothing is sent.
    session.handle.cursor_moved("/a", 1, 5);
    assert_eq!(peer.recv_within(Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn unfocused_editor_keeps_its_caret_to_itself() {
    let session = TestSession::start(Role::Local).await;
    let mut peer = MockPeer::connect(session.addr()).await;
    session.wait_for_connections(1).await;
    session.editor.set_focused(false);

    session.handle.cursor_moved("/a", 3, 3);
    session
        .handle
        .selection_changed(selection("/a", (1, 1), (1, 4)))
        .await;

    assert_eq!(peer.recv_within(Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn repeated_selection_is_applied_each_time() {
    let session = TestSession::start(Role::Local).await;
    session.editor.open("/a", "hello\nworld");
    let mut peer = MockPeer::connect(session.addr()).await;

    let message = json!({"sender": "remote", "selectionPos": {
        "path": "/a", "startLine": 1, "startCol": 2, "endLine": 2, "endCol": 3
    }});
    peer.send_json(&message).await;
    peer.send_json(&message).await;

    let editor = session.editor.clone();
    eventually("two selections", move || {
        let editor = editor.clone();
        async move { editor.calls().len() == 2 }
    })
    .await;
    let expected = EditorCall::SelectRange {
        start_line: 1,
        start_col: 2,
        end_line: 2,
        end_col: 3,
    };
    assert_eq!(session.editor.calls(), vec![expected.clone(), expected]);
    assert_eq!(session.editor.selection(), Some((1, 2, 2, 3)));
}

#[tokio::test]
async fn two_sessions_call_each_other() {
    let primary = TestSession::start(Role::Local).await;
    primary
        .editor
        .register_command("lineCount", |_| Ok(json!(42)));
    let secondary = TestSession::start(Role::Remote).await;

    secondary
        .handle
        .connect(&primary.addr().to_string(), &quick_retry())
        .await
        .unwrap();
    primary.wait_for_connections(1).await;

    let result = secondary.handle.call("lineCount", vec![], None).await;
    assert_eq!(result, Ok(json!(42)));

    let echoed = primary
        .handle
        .call("echo", vec!["from".into(), "primary".into()], None)
        .await;
    assert_eq!(echoed, Ok(json!("from primary")));

    let failed = secondary.handle.call("missing", vec![], None).await;
    assert_eq!(
        failed.unwrap_err().kind(),
        CommandErrorKind::Remote,
        "Unknown commands should report the peer's error"
    );
}

#[tokio::test]
async fn a_command_can_call_back_across_the_link() {
    let primary = TestSession::start(Role::Local).await;
    let secondary = TestSession::start(Role::Remote).await;
    let back = secondary.handle.clone();
    secondary
        .editor
        .register_async_command("askBack", move |args| {
            let back = back.clone();
            async move { back.call("echo", args, None).await.map_err(Into::into) }
        });

    secondary
        .handle
        .connect(&primary.addr().to_string(), &quick_retry())
        .await
        .unwrap();
    primary.wait_for_connections(1).await;

    let result = primary
        .handle
        .call("askBack", vec!["round".into(), "trip".into()], None)
        .await;
    assert_eq!(result, Ok(json!("round trip")));
}

#[tokio::test]
async fn slow_commands_do_not_hold_up_cursors() {
    let primary = TestSession::start(Role::Local).await;
    primary.editor.open("/a", "one\ntwo\nthree");
    let secondary = TestSession::start(Role::Remote).await;
    secondary
        .editor
        .register_async_command("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!(null))
        });
    secondary
        .handle
        .connect(&primary.addr().to_string(), &quick_retry())
        .await
        .unwrap();
    primary.wait_for_connections(1).await;

    primary.handle.send_command("slow", vec![]).await.unwrap();
    secondary.editor.open("/a", "one\ntwo\nthree");
    secondary.handle.cursor_moved("/a", 2, 3);

    wait_for_position(&primary, LastPosition::new("/a", 2, 3)).await;
    assert_eq!(primary.editor.cursor(), (2, 3));
}

#[tokio::test]
async fn callbacks_fire_once_with_the_result() {
    let primary = TestSession::start(Role::Local).await;
    let secondary = TestSession::start(Role::Remote).await;
    secondary
        .handle
        .connect(&primary.addr().to_string(), &quick_retry())
        .await
        .unwrap();
    primary.wait_for_connections(1).await;

    let results = Arc::new(Mutex::new(vec![]));
    let sink = results.clone();
    secondary
        .handle
        .call_with_callback("ping", vec![], move |result| {
            sink.lock().unwrap().push(result);
        })
        .await;

    let observed = results.clone();
    eventually("callback", move || {
        let observed = observed.clone();
        async move { !observed.lock().unwrap().is_empty() }
    })
    .await;
    assert_eq!(*results.lock().unwrap(), vec![Ok(json!("pong"))]);
}

#[tokio::test]
async fn fire_and_forget_commands_run_on_the_peer() {
    let primary = TestSession::start(Role::Local).await;
    let secondary = TestSession::start(Role::Remote).await;
    secondary
        .handle
        .connect(&primary.addr().to_string(), &quick_retry())
        .await
        .unwrap();
    primary.wait_for_connections(1).await;

    secondary
        .handle
        .send_command("echo", vec!["quietly".into()])
        .await
        .unwrap();

    let editor = primary.editor.clone();
    eventually("the command to run", move || {
        let editor = editor.clone();
        async move {
            editor.calls()
                == vec![EditorCall::Execute {
                    name: "echo".into(),
                    args: vec!["quietly".into()],
                }]
        }
    })
    .await;
}

#[tokio::test]
async fn requests_are_answered_on_the_sending_connection_only() {
    let session = TestSession::start(Role::Local).await;
    let mut asking = MockPeer::connect(session.addr()).await;
    let mut bystander = MockPeer::connect(session.addr()).await;
    session.wait_for_connections(2).await;

    asking
        .send(r#"{"sender":"remote","executeCommand":{"command":"echo","args":["a"],"requestId":"r-7"}}"#)
        .await;
    assert_eq!(
        asking.recv().await,
        json!({"sender": "local", "executeCommand": {
            "command": "echo", "args": [], "requestId": "r-7", "isError": false, "result": "a"
        }})
    );

    asking
        .send(r#"{"sender":"remote","executeCommand":{"command":"nope","callbackId":"c-1"}}"#)
        .await;
    let reply = asking.recv().await;
    assert_eq!(reply["executeCommand"]["callbackId"], json!("c-1"));
    assert_eq!(reply["executeCommand"]["isError"], json!(true));
    assert_eq!(
        reply["executeCommand"]["result"],
        json!("Unknown command 'nope'")
    );

    assert_eq!(bystander.recv_within(Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn unanswered_call_times_out_and_late_answer_is_ignored() {
    let session = TestSession::start(Role::Local).await;
    let mut peer = MockPeer::connect(session.addr()).await;
    session.wait_for_connections(1).await;

    let error = session
        .handle
        .call("slow", vec![], Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    let CommandError::Timeout { command, elapsed } = error else {
        panic!("Expected a timeout");
    };
    assert_eq!(command, "slow");
    assert!(elapsed >= Duration::from_millis(100));

    let request = peer.recv().await;
    let id = request["executeCommand"]["requestId"].clone();
    peer.send_json(&json!({"sender": "remote", "executeCommand": {
        "command": "slow", "requestId": id, "isError": false, "result": null
    }}))
    .await;

    // The session is still healthy afterwards.
    let mut answering = peer;
    let caller = {
        let handle = session.handle.clone();
        tokio::spawn(async move { handle.call("fast", vec![], None).await })
    };
    let request = answering.recv().await;
    answering
        .send_json(&json!({"sender": "remote", "executeCommand": {
            "command": "fast",
            "requestId": request["executeCommand"]["requestId"],
            "isError": false,
            "result": null
        }}))
        .await;
    assert_eq!(caller.await.unwrap(), Ok(serde_json::Value::Null));
}

#[tokio::test]
async fn lost_peer_means_no_destination() {
    let session = TestSession::start(Role::Local).await;
    let peer = MockPeer::connect(session.addr()).await;
    session.wait_for_connections(1).await;

    drop(peer);
    session.wait_for_connections(0).await;

    let error = session.handle.call("cmd", vec![], None).await.unwrap_err();
    assert_eq!(error.kind(), CommandErrorKind::NoDestination);
    assert!(!session.handle.has_active_connections().await);
}

#[tokio::test]
async fn text_content_replaces_the_buffer() {
    let primary = TestSession::start(Role::Local).await;
    primary.editor.open("/notes", "old");
    let secondary = TestSession::start(Role::Remote).await;
    secondary
        .handle
        .connect(&primary.addr().to_string(), &quick_retry())
        .await
        .unwrap();
    primary.wait_for_connections(1).await;

    secondary
        .handle
        .send_text(TextContent {
            path: "/notes".into(),
            text: "new\ncontent".into(),
            cursor_line: 2,
            cursor_col: 4,
        })
        .await;

    wait_for_position(&primary, LastPosition::new("/notes", 2, 4)).await;
    assert_eq!(
        primary.editor.content("/notes"),
        Some("new\ncontent".to_string())
    );
}

#[tokio::test]
async fn text_content_is_dropped_without_text_sync() {
    let session = TestSession::start(Role::Local).await;
    session.editor.open("/notes", "old");
    session.editor.set_text_sync(false);
    let mut peer = MockPeer::connect(session.addr()).await;

    peer.send(r#"{"sender":"remote","textContent":{"path":"/notes","text":"new","cursorLine":1,"cursorCol":1}}"#)
        .await;
    // Anything processed after it is proof it was handled.
    peer.send(r#"{"sender":"remote","closeBuffer":{"path":"/notes"}}"#)
        .await;

    let editor = session.editor.clone();
    eventually("the buffer to close", move || {
        let editor = editor.clone();
        async move { editor.current().is_none() }
    })
    .await;
    assert_eq!(
        session.editor.calls(),
        vec![EditorCall::Close {
            path: "/notes".into()
        }]
    );
}

#[tokio::test]
async fn connecting_to_nothing_gives_up() {
    let session = TestSession::start(Role::Remote).await;
    let unused = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let error = session
        .handle
        .connect(&unused.to_string(), &quick_retry())
        .await
        .unwrap_err();

    assert!(error.to_string().contains("after 3 attempt(s)"), "{error}");
    assert_eq!(session.handle.connection_count().await, 0);
}

#[tokio::test]
async fn session_connects_out_to_a_listening_peer() {
    let session = TestSession::start(Role::Remote).await;
    let (addr, accepted) = MockPeer::listen().await;

    session
        .handle
        .connect(&addr.to_string(), &quick_retry())
        .await
        .unwrap();
    let mut peer = accepted.await.unwrap();

    session.handle.close_buffer("/gone").await;
    assert_eq!(
        peer.recv().await,
        json!({"sender": "remote", "closeBuffer": {"path": "/gone"}})
    );
}
