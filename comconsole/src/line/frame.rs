//! Line framing over a chunked character stream.
//!
//! Serial data arrives at arbitrary boundaries. `FrameBuffer` scans each
//! chunk for CR and LF, each of which terminates a line on its own: CRLF is
//! two terminators, and the empty line between them is suppressed like any
//! other empty line. Anything left over after the last terminator is kept
//! (already escaped) as the partial line and prefixed to the next line.

use super::escape::escape;

/// Stateful line assembler. Holds at most one partial line.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    partial: Option<String>,
}

fn is_terminator(c: char) -> bool {
    (c == '\r') || (c == '\n')
}

impl FrameBuffer {
    pub fn new() -> FrameBuffer {
        FrameBuffer { partial: None }
    }

    /// Feeds a chunk, returning the display lines it completes, in order.
    /// Empty lines are never returned.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(index) = rest.find(is_terminator) {
            let line = self.take_line(&rest[..index]);
            if !line.is_empty() {
                lines.push(line);
            }
            // Both terminators are a single byte in UTF-8.
            rest = &rest[index + 1..];
        }
        if !rest.is_empty() {
            self.partial
                .get_or_insert_with(String::new)
                .push_str(&escape(rest));
        }
        lines
    }

    /// Completes the current line with `tail`, clearing the partial line.
    fn take_line(&mut self, tail: &str) -> String {
        let mut line = self.partial.take().unwrap_or_default();
        line.push_str(&escape(tail));
        line
    }

    /// Escaped content received since the last terminator, if any.
    pub fn partial(&self) -> Option<&str> {
        self.partial.as_deref()
    }

    /// Discards the partial line without emitting it.
    pub fn reset(&mut self) {
        self.partial = None;
    }
}
