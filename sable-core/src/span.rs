//! Source positions and spans.
//!
//! Every token, AST node, and diagnostic carries a [`Span`]: a half-open
//! byte range into one source buffer, identified by [`FileId`]. Spans are
//! plain data; turning an offset back into a line/column pair is the job
//! of the source map in [`crate::source`].

/// Identifies one loaded source buffer within a compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// A half-open byte range `[start, end)` within the file `file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Span {
        Span { file, start, end }
    }

    /// A zero-width span, used for errors that predate any buffer
    /// (for example a missing input file).
    pub fn dummy() -> Span {
        Span::new(FileId(u32::MAX), 0, 0)
    }

    pub fn is_dummy(&self) -> bool {
        self.file == FileId(u32::MAX)
    }

    /// The smallest span covering both `self` and `other`.
    ///
    /// Both spans must refer to the same file; joining across files is a
    /// caller bug and keeps `self`'s file.
    pub fn join(&self, other: Span) -> Span {
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_covers_both_ranges() {
        let file = FileId(0);
        let a = Span::new(file, 4, 9);
        let b = Span::new(file, 7, 12);
        assert_eq!(a.join(b), Span::new(file, 4, 12));
        assert_eq!(b.join(a), Span::new(file, 4, 12));
    }

    #[test]
    fn dummy_span_is_recognizable() {
        assert!(Span::dummy().is_dummy());
        assert!(!Span::new(FileId(0), 0, 0).is_dummy());
    }
}
