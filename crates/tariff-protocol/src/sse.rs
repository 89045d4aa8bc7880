//! Incremental SSE parsing.
//!
//! The parser is push-based: bytes go in as they arrive off the socket,
//! complete events come out. A partial line is buffered across pushes.
//! Comment lines (`: ...`) are surfaced as their own events because the
//! proxy must recognize and drop vendor keepalive frames rather than
//! forward them.

use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    /// Set when the frame consisted only of comment lines.
    pub comment: Option<String>,
}

impl SseEvent {
    pub fn is_comment(&self) -> bool {
        self.comment.is_some() && self.data.is_empty()
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
    comment_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.flush_event(&mut events);
            } else {
                self.consume_line(&line);
            }
        }

        events
    }

    /// Drain whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.consume_line(&line);
        }
        let mut events = Vec::new();
        self.flush_event(&mut events);
        events
    }

    fn consume_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix(':') {
            self.comment_lines.push(rest.trim_start().to_string());
            return;
        }
        if let Some(value) = strip_field(line, "event") {
            self.event = (!value.is_empty()).then(|| value.to_string());
            return;
        }
        if let Some(value) = strip_field(line, "data") {
            self.data_lines.push(value.to_string());
        }
        // Unknown fields (id:, retry:) are ignored.
    }

    fn flush_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() && self.comment_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            comment: if self.comment_lines.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.comment_lines).join("\n"))
            },
        });
        self.data_lines.clear();
    }
}

fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    if rest.is_empty() {
        return Some("");
    }
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Encode one A-dialect SSE frame. Multi-line data gets one `data:` per line.
pub fn encode_data_frame(data: &str) -> Bytes {
    let mut out = String::new();
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// First-bytes discriminator between an SSE stream and a plain JSON body.
///
/// Modeled as a tiny accumulating state machine so a first chunk that cuts
/// a prefix in half (e.g. just `da`) stays `Undecided` until more bytes
/// arrive.
#[derive(Debug, Default)]
pub struct ShapeDetector {
    prefix: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamShape {
    Undecided,
    Sse,
    Json,
}

impl ShapeDetector {
    const PREFIXES: [&'static [u8]; 3] = [b"data: ", b"event:", b": "];

    pub fn push(&mut self, chunk: &[u8]) -> StreamShape {
        if self.prefix.len() < 8 {
            let take = (8 - self.prefix.len()).min(chunk.len());
            self.prefix.extend_from_slice(&chunk[..take]);
        }
        let seen = trim_leading_whitespace(&self.prefix);
        if seen.is_empty() {
            return StreamShape::Undecided;
        }
        for candidate in Self::PREFIXES {
            if seen.len() >= candidate.len() {
                if seen.starts_with(candidate) {
                    return StreamShape::Sse;
                }
            } else if candidate.starts_with(seen) {
                return StreamShape::Undecided;
            }
        }
        StreamShape::Json
    }
}

fn trim_leading_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_frames_across_pushes() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: {\"a\":").is_empty());
        let events = parser.push_str("1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[1].is_done());
    }

    #[test]
    fn named_events_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.push_str("event: message_start\ndata: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn comment_frames_are_surfaced_separately() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": PROCESSING\n\ndata: x\n\n");
        assert_eq!(events.len(), 2);
        assert!(events[0].is_comment());
        assert_eq!(events[0].comment.as_deref(), Some("PROCESSING"));
        assert_eq!(events[1].data, "x");
    }

    #[test]
    fn finish_drains_trailing_event_without_blank_line() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn shape_detector_handles_split_prefix() {
        let mut detector = ShapeDetector::default();
        assert_eq!(detector.push(b"da"), StreamShape::Undecided);
        assert_eq!(detector.push(b"ta: {"), StreamShape::Sse);

        let mut detector = ShapeDetector::default();
        assert_eq!(detector.push(b"{\"candidates\""), StreamShape::Json);

        let mut detector = ShapeDetector::default();
        assert_eq!(detector.push(b": keep-alive\n"), StreamShape::Sse);
    }
}
