//! Scrollback buffering for terminal sessions.
//!
//! A `Scrollback` holds the captured output of one session as plain text
//! lines. It is append-only and unbounded; only the `clear` built-in empties
//! it. Lines are sanitized on the way in since launched tools are free to
//! emit ANSI escapes that the session does not interpret.

use strip_ansi_escapes::strip;

/// Append-only captured terminal output.
#[derive(Debug, Clone, Default)]
pub struct Scrollback {
    lines: Vec<String>,
}

impl Scrollback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line, sanitized for display.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(sanitize_line(&line.into()));
    }

    /// Empties the buffer. Used by the `clear` built-in only.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The full buffer as one newline-joined string, for clipboard export.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Strips ANSI escape sequences and replaces invalid UTF-8.
pub fn sanitize_line(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
