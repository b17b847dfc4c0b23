//! The mirrored editor-state snapshot.

use serde::{Deserialize, Serialize};

use crate::protocol::messages::EditorStateSync;

/// The most recently received description of the remote editor.
///
/// Replaced wholesale by every `EditorStateSync` message; there is no
/// merging of partial updates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditorState {
    pub file_path: Option<String>,
    pub cursor_line: u32,
    pub cursor_column: u32,
    pub content_preview: String,
}

impl EditorState {
    /// File name component of `file_path`, for compact display.
    pub fn file_name(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .map(|p| p.rsplit(['/', '\\']).next().unwrap_or(p))
    }

    /// Cursor position formatted as a one-based `line:column`, the way
    /// editors display it.
    pub fn cursor_label(&self) -> String {
        format!(
            "{}:{}",
            u64::from(self.cursor_line) + 1,
            u64::from(self.cursor_column) + 1
        )
    }
}

impl From<EditorStateSync> for EditorState {
    fn from(sync: EditorStateSync) -> Self {
        Self {
            file_path: sync.file_path,
            cursor_line: sync.cursor_line,
            cursor_column: sync.cursor_column,
            content_preview: sync.content_preview,
        }
    }
}
