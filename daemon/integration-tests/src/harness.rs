// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use std::net::SocketAddr;
use tandem::editor::InMemoryEditor;
use tandem::session::{Orchestrator, SessionConfig, SessionHandle};
use tandem::types::Role;
use tokio::time::{sleep, Duration, Instant};

/// A running session on an ephemeral port, with an editor the test can look into.
pub struct TestSession {
    pub orchestrator: Orchestrator,
    pub handle: SessionHandle,
    pub editor: InMemoryEditor,
}

impl TestSession {
    pub async fn start(role: Role) -> Self {
        Self::start_with(SessionConfig {
            role,
            debounce: Duration::from_millis(10),
            ..SessionConfig::default()
        })
        .await
    }

    pub async fn start_with(config: SessionConfig) -> Self {
        let editor = InMemoryEditor::new();
        let mut orchestrator = Orchestrator::new(config);
        let handle = orchestrator
            .start(editor.clone())
            .await
            .expect("Session should start");
        Self {
            orchestrator,
            handle,
            editor,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.orchestrator
            .local_addr()
            .expect("A running session has an address")
    }

    pub async fn wait_for_connections(&self, count: usize) {
        let handle = self.handle.clone();
        eventually(&format!("{count} connection(s)"), move || {
            let handle = handle.clone();
            async move { handle.connection_count().await == count }
        })
        .await;
    }
}

/// Polls `check` until it holds, panicking after a few seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("Timed out waiting for {what}");
}
