//! Incremental Server-Sent Events parser.
//!
//! Feeds of `data:`/`event:` lines arrive as arbitrary byte chunks from the
//! provider; [`SseFeed::push`] buffers partial lines and yields complete
//! events at blank-line boundaries. The OpenAI-style `[DONE]` sentinel is
//! exposed via [`SseEvent::is_done`].

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Joined `data:` payload (multi-line data joined with `\n`).
    pub data: String,
}

impl SseEvent {
    /// Whether this event is the `[DONE]` terminator.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE parser with internal line buffering.
#[derive(Debug, Default)]
pub struct SseFeed {
    partial_line: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning any events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for ch in String::from_utf8_lossy(chunk).chars() {
            if ch != '\n' {
                self.partial_line.push(ch);
                continue;
            }
            let line = std::mem::take(&mut self.partial_line);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_owned();
            if let Some(event) = self.take_line(&line) {
                out.push(event);
            }
        }
        out
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.partial_line.is_empty() {
            let line = std::mem::take(&mut self.partial_line);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_owned();
            self.take_line(&line);
        }
        self.emit()
    }

    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.emit();
        }
        // Comment lines start with ':'.
        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest;
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => return None,
        };
        match field {
            "data" => self.data_lines.push(value.to_owned()),
            "event" => self.event_name = Some(value.to_owned()),
            // id/retry and unknown fields are ignored.
            _ => {}
        }
        None
    }

    fn emit(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            self.event_name = None;
            return None;
        }
        Some(SseEvent {
            event: self.event_name.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
        })
    }
}
