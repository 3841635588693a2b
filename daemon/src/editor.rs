// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! This module is all about what the relay needs from the host editor.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value as JSONValue;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// The host editor, as seen by a session. Lines and columns are 1-based.
///
/// Implementations wrap whatever text-buffer API the host offers. The session owns its editor and
/// calls it from a single task, so implementations don't need to be `Sync`.
pub trait Editor: Send {
    fn current_path(&self) -> Option<String>;
    fn cursor_line(&self) -> u32;
    fn cursor_col(&self) -> u32;
    /// Number of the final line of the current document.
    fn last_line_index(&self) -> u32;
    fn line_length(&self, line: u32) -> u32;
    fn is_focused(&self) -> bool;
    /// Whether the active view is something like a terminal, which must not be reused for files.
    fn is_terminal_view(&self) -> bool {
        false
    }

    fn open_document(&mut self, path: &str, new_tab: bool);
    fn set_cursor_position(&mut self, line: u32, col: u32);
    fn select_range(&mut self, start_line: u32, start_col: u32, end_line: u32, end_col: u32);
    fn close_document(&mut self, _path: &str) {}

    fn supports_text_sync(&self) -> bool {
        false
    }
    fn set_text(&mut self, _path: &str, _text: &str) {}

    /// Runs the commands a peer asks for. It is shared with the tasks that answer them, so it
    /// must not borrow the editor.
    fn command_executor(&self) -> Arc<dyn CommandExecutor>;
}

/// Runs named commands, as the host's command palette would.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(&self, name: &str, args: &[String]) -> Result<JSONValue>;
}

/// Every mutation an [`InMemoryEditor`] has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorCall {
    Open {
        path: String,
        new_tab: bool,
    },
    SetCursor {
        line: u32,
        col: u32,
    },
    SelectRange {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    },
    Close {
        path: String,
    },
    SetText {
        path: String,
    },
    Execute {
        name: String,
        args: Vec<String>,
    },
}

pub type CommandFuture = Pin<Box<dyn Future<Output = Result<JSONValue>> + Send>>;
pub type CommandHandler = Arc<dyn Fn(Vec<String>) -> CommandFuture + Send + Sync>;

struct EditorState {
    documents: HashMap<String, Vec<String>>,
    current_path: Option<String>,
    cursor: (u32, u32),
    selection: Option<(u32, u32, u32, u32)>,
    focused: bool,
    terminal_view: bool,
    text_sync: bool,
    calls: Vec<EditorCall>,
    commands: HashMap<String, CommandHandler>,
}

/// An editor that keeps its documents in memory.
///
/// Clones share state, so a test (or the headless CLI) can keep one clone to inspect what the
/// session did to the other.
#[derive(Clone)]
pub struct InMemoryEditor {
    state: Arc<Mutex<EditorState>>,
}

impl Default for InMemoryEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEditor {
    #[must_use]
    pub fn new() -> Self {
        let editor = Self {
            state: Arc::new(Mutex::new(EditorState {
                documents: HashMap::new(),
                current_path: None,
                cursor: (1, 1),
                selection: None,
                focused: true,
                terminal_view: false,
                text_sync: true,
                calls: vec![],
                commands: HashMap::new(),
            })),
        };
        editor.register_command("echo", |args| Ok(JSONValue::from(args.join(" "))));
        editor.register_command("ping", |_| Ok(JSONValue::from("pong")));
        editor
    }

    fn state(&self) -> MutexGuard<'_, EditorState> {
        self.state.lock().expect("Editor state lock was poisoned")
    }

    /// Opens `path` with `content` and puts the caret at its start, like a user opening a file.
    pub fn open(&self, path: &str, content: &str) {
        let mut state = self.state();
        state
            .documents
            .insert(path.to_string(), split_lines(content));
        state.current_path = Some(path.to_string());
        state.cursor = (1, 1);
        state.terminal_view = false;
    }

    /// Moves the caret the way a user would, without recording an [`EditorCall`].
    pub fn move_cursor(&self, line: u32, col: u32) {
        self.state().cursor = (line, col);
    }

    pub fn set_focused(&self, focused: bool) {
        self.state().focused = focused;
    }

    pub fn set_terminal_view(&self, terminal_view: bool) {
        self.state().terminal_view = terminal_view;
    }

    pub fn set_text_sync(&self, enabled: bool) {
        self.state().text_sync = enabled;
    }

    pub fn register_command<F>(&self, name: &str, handler: F)
    where
        F: Fn(&[String]) -> Result<JSONValue> + Send + Sync + 'static,
    {
        self.register_async_command(name, move |args| {
            let result = handler(&args);
            async move { result }
        });
    }

    /// Like [`Self::register_command`], for handlers that need to wait for something.
    pub fn register_async_command<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JSONValue>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |args| -> CommandFuture { Box::pin(handler(args)) });
        self.state().commands.insert(name.to_string(), handler);
    }

    #[must_use]
    pub fn cursor(&self) -> (u32, u32) {
        self.state().cursor
    }

    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.state().current_path.clone()
    }

    #[must_use]
    pub fn selection(&self) -> Option<(u32, u32, u32, u32)> {
        self.state().selection
    }

    #[must_use]
    pub fn content(&self, path: &str) -> Option<String> {
        self.state()
            .documents
            .get(path)
            .map(|lines| lines.join("\n"))
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EditorCall> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<EditorCall> {
        std::mem::take(&mut self.state().calls)
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content.split('\n').map(ToString::to_string).collect()
}

impl Editor for InMemoryEditor {
    fn current_path(&self) -> Option<String> {
        self.current()
    }

    fn cursor_line(&self) -> u32 {
        self.state().cursor.0
    }

    fn cursor_col(&self) -> u32 {
        self.state().cursor.1
    }

    fn last_line_index(&self) -> u32 {
        let state = self.state();
        state
            .current_path
            .as_ref()
            .and_then(|path| state.documents.get(path))
            .map_or(0, |lines| lines.len() as u32)
    }

    fn line_length(&self, line: u32) -> u32 {
        let state = self.state();
        state
            .current_path
            .as_ref()
            .and_then(|path| state.documents.get(path))
            .and_then(|lines| lines.get((line as usize).checked_sub(1)?))
            .map_or(0, |text| text.chars().count() as u32)
    }

    fn is_focused(&self) -> bool {
        self.state().focused
    }

    fn is_terminal_view(&self) -> bool {
        self.state().terminal_view
    }

    fn open_document(&mut self, path: &str, new_tab: bool) {
        debug!("Opening {path} (new tab: {new_tab})");
        let mut state = self.state();
        state
            .documents
            .entry(path.to_string())
            .or_insert_with(|| vec![String::new()]);
        state.current_path = Some(path.to_string());
        state.terminal_view = false;
        state.selection = None;
        state.calls.push(EditorCall::Open {
            path: path.to_string(),
            new_tab,
        });
    }

    fn set_cursor_position(&mut self, line: u32, col: u32) {
        let mut state = self.state();
        state.cursor = (line, col);
        state.calls.push(EditorCall::SetCursor { line, col });
    }

    fn select_range(&mut self, start_line: u32, start_col: u32, end_line: u32, end_col: u32) {
        let mut state = self.state();
        state.selection = Some((start_line, start_col, end_line, end_col));
        state.calls.push(EditorCall::SelectRange {
            start_line,
            start_col,
            end_line,
            end_col,
        });
    }

    fn close_document(&mut self, path: &str) {
        let mut state = self.state();
        state.documents.remove(path);
        if state.current_path.as_deref() == Some(path) {
            state.current_path = None;
            state.selection = None;
        }
        state.calls.push(EditorCall::Close {
            path: path.to_string(),
        });
    }

    fn supports_text_sync(&self) -> bool {
        self.state().text_sync
    }

    fn set_text(&mut self, path: &str, text: &str) {
        let mut state = self.state();
        state.documents.insert(path.to_string(), split_lines(text));
        state.calls.push(EditorCall::SetText {
            path: path.to_string(),
        });
    }

    fn command_executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl CommandExecutor for InMemoryEditor {
    async fn execute_command(&self, name: &str, args: &[String]) -> Result<JSONValue> {
        let handler = {
            let mut state = self.state();
            state.calls.push(EditorCall::Execute {
                name: name.to_string(),
                args: args.to_vec(),
            });
            state.commands.get(name).cloned()
        };
        let handler = handler.ok_or_else(|| anyhow!("Unknown command '{name}'"))?;
        handler(args.to_vec()).await
    }
}
