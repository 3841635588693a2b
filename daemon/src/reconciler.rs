// SPDX-FileCopyrightText: 2025 blinry <mail@blinry.org>
// SPDX-FileCopyrightText: 2025 zormit <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Decides which cursor updates cross the link, in both directions.
//!
//! Both editors react to caret moves by reporting them. Without a gate, applying a peer's cursor
//! would be reported straight back to the peer, which would apply it again, and so on. The
//! [`CursorReconciler`] remembers the last position it let through (whichever direction it came
//! from) and drops anything equal to it. The functions here only *compute* what should happen,
//! the session performs it.

use crate::editor::Editor;
use crate::types::{CursorPos, LastPosition, SelectionPos};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTarget {
    /// Switch the active view to the document.
    CurrentView,
    /// The active view can't show files, open the document next to it.
    NewTab,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorDecision {
    Suppress,
    Apply {
        target: LastPosition,
        /// `None` if the target is already the current document.
        open: Option<OpenTarget>,
        /// Whether the incoming position was out of range and got replaced by the local one.
        clamped: bool,
    },
}

#[derive(Debug, Default)]
pub struct CursorReconciler {
    last_position: Option<LastPosition>,
}

impl CursorReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn last_position(&self) -> Option<&LastPosition> {
        self.last_position.as_ref()
    }

    /// Returns the message to send for a local caret move, or `None` if it's a duplicate.
    pub fn prepare_cursor_update(&mut self, path: &str, line: u32, col: u32) -> Option<CursorPos> {
        let position = LastPosition::new(path, line, col);
        if self.last_position.as_ref() == Some(&position) {
            debug!("Suppressing duplicate cursor update {position}");
            return None;
        }
        self.last_position = Some(position.clone());
        Some(position.into())
    }

    /// Decides what to do with a cursor position that arrived from the peer.
    pub fn apply_cursor_update(
        &mut self,
        incoming: &CursorPos,
        editor: &dyn Editor,
    ) -> CursorDecision {
        let current_path = editor.current_path();
        let on_current_document = current_path.as_deref() == Some(incoming.path.as_str());

        // The peer may have sent this before it saw a local edit that shortened the document.
        let clamped = on_current_document && out_of_range(incoming, editor);
        let target = if clamped {
            debug!(
                "Cursor {}:{}:{} is beyond the end of the document, keeping the local position",
                incoming.path, incoming.line, incoming.col
            );
            LastPosition::new(&incoming.path, editor.cursor_line(), editor.cursor_col())
        } else {
            LastPosition::from(incoming)
        };

        if self.last_position.as_ref() == Some(&target) {
            return CursorDecision::Suppress;
        }
        self.last_position = Some(target.clone());

        let open = if on_current_document {
            None
        } else if editor.is_terminal_view() {
            Some(OpenTarget::NewTab)
        } else {
            Some(OpenTarget::CurrentView)
        };

        CursorDecision::Apply {
            target,
            open,
            clamped,
        }
    }
}

fn out_of_range(position: &CursorPos, editor: &dyn Editor) -> bool {
    if position.line > editor.last_line_index() {
        return true;
    }
    // One past the last character is where the caret sits at the end of a line.
    position.col > editor.line_length(position.line) + 1
}

/// Selections aren't deduplicated: they are rare, and reapplying one is harmless.
///
/// Returns whether the selection was applied, which it is only for the current document.
pub fn apply_selection(selection: &SelectionPos, editor: &mut dyn Editor) -> bool {
    if editor.current_path().as_deref() != Some(selection.path.as_str()) {
        debug!("Ignoring selection for {}, which is not open", selection.path);
        return false;
    }
    editor.select_range(
        selection.start_line,
        selection.start_col,
        selection.end_line,
        selection.end_col,
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{EditorCall, InMemoryEditor};
    use crate::types::factories::*;
    use pretty_assertions::assert_eq;

    fn nine_line_editor() -> InMemoryEditor {
        let editor = InMemoryEditor::new();
        let content: Vec<String> = (1..=9).map(|n| format!("line {n}")).collect();
        editor.open("/a", &content.join("\n"));
        editor
    }

    #[test]
    fn outbound_duplicates_are_dropped() {
        let mut reconciler = CursorReconciler::new();
        assert_eq!(
            reconciler.prepare_cursor_update("/a", 3, 4),
            Some(cursor("/a", 3, 4))
        );
        assert_eq!(reconciler.prepare_cursor_update("/a", 3, 4), None);
        assert_eq!(
            reconciler.last_position(),
            Some(&LastPosition::new("/a", 3, 4))
        );
        assert_eq!(
            reconciler.prepare_cursor_update("/b", 3, 4),
            Some(cursor("/b", 3, 4))
        );
    }

    #[test]
    fn applying_remote_position_updates_state() {
        let editor = nine_line_editor();
        let mut reconciler = CursorReconciler::new();

        let decision = reconciler.apply_cursor_update(&cursor("/a", 5, 3), &editor);

        assert_eq!(
            decision,
            CursorDecision::Apply {
                target: LastPosition::new("/a", 5, 3),
                open: None,
                clamped: false
            }
        );
        assert_eq!(
            reconciler.last_position(),
            Some(&LastPosition::new("/a", 5, 3))
        );
    }

    #[test]
    fn echo_of_own_update_is_suppressed() {
        let editor = nine_line_editor();
        let mut reconciler = CursorReconciler::new();
        reconciler.apply_cursor_update(&cursor("/a", 5, 3), &editor);

        // Moving the caret makes our editor report (5, 3), which must not go back out.
        assert_eq!(reconciler.prepare_cursor_update("/a", 5, 3), None);
        // And the same position arriving again is a no-op too.
        assert_eq!(
            reconciler.apply_cursor_update(&cursor("/a", 5, 3), &editor),
            CursorDecision::Suppress
        );
    }

    #[test]
    fn position_past_last_line_is_replaced_by_local_position() {
        let editor = nine_line_editor();
        editor.move_cursor(2, 6);
        let mut reconciler = CursorReconciler::new();

        let decision = reconciler.apply_cursor_update(&cursor("/a", 15, 0), &editor);

        assert_eq!(
            decision,
            CursorDecision::Apply {
                target: LastPosition::new("/a", 2, 6),
                open: None,
                clamped: true
            }
        );
    }

    #[test]
    fn clamped_position_equal_to_last_is_suppressed() {
        let editor = nine_line_editor();
        editor.move_cursor(2, 6);
        let mut reconciler = CursorReconciler::new();
        reconciler.prepare_cursor_update("/a", 2, 6);

        assert_eq!(
            reconciler.apply_cursor_update(&cursor("/a", 11, 1), &editor),
            CursorDecision::Suppress
        );
    }

    #[test]
    fn column_bounds() {
        let editor = nine_line_editor();
        let mut reconciler = CursorReconciler::new();

        // "line 1" has six characters, so column 7 is the end of the line.
        let end_of_line = reconciler.apply_cursor_update(&cursor("/a", 1, 7), &editor);
        assert!(matches!(
            end_of_line,
            CursorDecision::Apply { clamped: false, .. }
        ));

        let beyond = reconciler.apply_cursor_update(&cursor("/a", 1, 8), &editor);
        assert!(matches!(beyond, CursorDecision::Apply { clamped: true, .. }));
    }

    #[test]
    fn other_documents_are_not_clamped() {
        let editor = nine_line_editor();
        let mut reconciler = CursorReconciler::new();

        let decision = reconciler.apply_cursor_update(&cursor("/b", 500, 80), &editor);

        assert_eq!(
            decision,
            CursorDecision::Apply {
                target: LastPosition::new("/b", 500, 80),
                open: Some(OpenTarget::CurrentView),
                clamped: false
            }
        );
    }

    #[test]
    fn terminal_views_get_a_new_tab() {
        let editor = nine_line_editor();
        editor.set_terminal_view(true);
        let mut reconciler = CursorReconciler::new();

        let decision = reconciler.apply_cursor_update(&cursor("/b", 1, 1), &editor);

        assert!(matches!(
            decision,
            CursorDecision::Apply {
                open: Some(OpenTarget::NewTab),
                ..
            }
        ));
    }

    #[test]
    fn selections_apply_every_time() {
        let mut editor = nine_line_editor();
        let selection = selection("/a", (1, 1), (2, 3));

        assert!(apply_selection(&selection, &mut editor));
        assert!(apply_selection(&selection, &mut editor));

        let expected = EditorCall::SelectRange {
            start_line: 1,
            start_col: 1,
            end_line: 2,
            end_col: 3,
        };
        assert_eq!(editor.calls(), vec![expected.clone(), expected]);
    }

    #[test]
    fn selections_for_other_documents_are_ignored() {
        let mut editor = nine_line_editor();
        assert!(!apply_selection(&selection("/z", (1, 1), (1, 2)), &mut editor));
        assert!(editor.calls().is_empty());
    }
}
