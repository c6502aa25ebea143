//! Source buffer management.
//!
//! The [`SourceMap`] owns the immutable text of every buffer loaded during
//! one compilation session (the entry file plus each imported file) and
//! answers "which line/column is this byte offset" for diagnostics. Buffers
//! are append-only: a [`FileId`] handed out once stays valid for the whole
//! session.

use std::path::{Path, PathBuf};

use crate::span::{FileId, Span};

/// One immutable source buffer plus its precomputed line starts.
#[derive(Debug)]
pub struct SourceBuffer {
    /// Display name: a path for files, a label like `<stdin>` otherwise.
    pub name: PathBuf,
    pub text: String,
    /// Byte offset of the first character of each line, in order.
    line_starts: Vec<u32>,
}

impl SourceBuffer {
    fn new(name: PathBuf, text: String) -> SourceBuffer {
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        SourceBuffer {
            name,
            text,
            line_starts,
        }
    }

    /// 1-based line and column of a byte offset.
    ///
    /// Offsets past the end of the buffer clamp to the final position, so
    /// an EOF-pointing span still renders on the last line.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let mut offset = offset.min(self.text.len() as u32);
        // The end of a newline-terminated buffer is the start of a phantom
        // line past the last one; step back onto the final newline so the
        // span renders on the last line.
        if offset as usize == self.text.len() && self.text.ends_with('\n') {
            offset -= 1;
        }
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = offset - self.line_starts[line];
        (line as u32 + 1, col + 1)
    }

    /// The full text of the 1-based line `line`, without its newline.
    pub fn line_text(&self, line: u32) -> Option<&str> {
        let i = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(i)? as usize;
        let end = self
            .line_starts
            .get(i + 1)
            .map(|&s| s as usize)
            .unwrap_or(self.text.len());
        Some(self.text[start..end].trim_end_matches(['\n', '\r']))
    }
}

/// Owns all source buffers for one compilation session.
#[derive(Debug, Default)]
pub struct SourceMap {
    buffers: Vec<SourceBuffer>,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap::default()
    }

    /// Register a buffer and return its id.
    pub fn add(&mut self, name: impl Into<PathBuf>, text: String) -> FileId {
        let id = FileId(self.buffers.len() as u32);
        self.buffers.push(SourceBuffer::new(name.into(), text));
        id
    }

    pub fn get(&self, id: FileId) -> &SourceBuffer {
        &self.buffers[id.0 as usize]
    }

    pub fn text(&self, id: FileId) -> &str {
        &self.get(id).text
    }

    pub fn name(&self, id: FileId) -> &Path {
        &self.get(id).name
    }

    /// Resolve a span to `(name, line, column)` for rendering.
    ///
    /// Returns `None` for dummy spans, which carry no buffer.
    pub fn locate(&self, span: Span) -> Option<(&Path, u32, u32)> {
        if span.is_dummy() {
            return None;
        }
        let buffer = self.get(span.file);
        let (line, col) = buffer.line_col(span.start);
        Some((buffer.name.as_path(), line, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_accounts_for_newlines() {
        let mut map = SourceMap::new();
        let id = map.add("test.sbl", "ab\ncde\n\nf".to_string());
        let buffer = map.get(id);
        assert_eq!(buffer.line_col(0), (1, 1));
        assert_eq!(buffer.line_col(1), (1, 2));
        assert_eq!(buffer.line_col(3), (2, 1));
        assert_eq!(buffer.line_col(5), (2, 3));
        assert_eq!(buffer.line_col(7), (3, 1));
        assert_eq!(buffer.line_col(8), (4, 1));
    }

    #[test]
    fn line_col_clamps_past_eof() {
        let mut map = SourceMap::new();
        let id = map.add("test.sbl", "xy".to_string());
        assert_eq!(map.get(id).line_col(99), (1, 3));
    }

    #[test]
    fn line_text_strips_line_endings() {
        let mut map = SourceMap::new();
        let id = map.add("test.sbl", "first\r\nsecond\n".to_string());
        let buffer = map.get(id);
        assert_eq!(buffer.line_text(1), Some("first"));
        assert_eq!(buffer.line_text(2), Some("second"));
        assert_eq!(buffer.line_text(4), None);
    }

    #[test]
    fn locate_skips_dummy_spans() {
        let map = SourceMap::new();
        assert!(map.locate(Span::dummy()).is_none());
    }
}
