//! Incremental `text/event-stream` parser

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// `event:` field, `None` for the default `message` type
    pub event: Option<String>,
    /// Last `id:` field seen
    pub id: Option<String>,
    /// `retry:` field in milliseconds
    pub retry_ms: Option<u64>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Byte-oriented parser; frames may be split across any number of chunks
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry_ms: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut dispatched = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                dispatched.extend(self.dispatch());
            } else {
                self.field(&line);
            }
        }
        dispatched
    }

    /// Drop an event that was never terminated by a blank line.
    ///
    /// Returns whether anything was buffered. Called at end of stream, where
    /// an incomplete event is never dispatched.
    pub fn discard_incomplete(&mut self) -> bool {
        let buffered = !self.line.is_empty() || !self.data.is_empty();
        self.line.clear();
        self.data.clear();
        self.event = None;
        buffered
    }

    fn field(&mut self, line: &[u8]) {
        // comment
        if line.first() == Some(&b':') {
            return;
        }
        let (name, value) = match line.iter().position(|&b| b == b':') {
            Some(at) => {
                let value = &line[at + 1..];
                (&line[..at], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        let value = String::from_utf8_lossy(value).into_owned();
        match name {
            b"data" => self.data.push(value),
            b"event" => self.event = Some(value),
            b"id" if !value.contains('\0') => self.id = Some(value),
            b"retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            // Events without data are not dispatched; the type resets
            self.event = None;
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: self.event.take(),
            id: self.id.clone(),
            retry_ms: self.retry_ms,
            data,
        })
    }
}
