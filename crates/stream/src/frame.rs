//! SSE-style framing: `data: <json>\n\n` records, terminated by `data: [DONE]`.

use tracing::debug;

use crate::event::StreamEvent;

/// Payload of the reserved end-of-stream frame.
pub const DONE_MARKER: &str = "[DONE]";

const RECORD_DELIMITER: &[u8] = b"\n\n";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// The reserved terminal marker.
    End,
}

pub fn encode_event(event: &StreamEvent) -> String {
    // StreamEvent has only string keys and plain values
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", json)
}

pub fn encode_end() -> String {
    format!("data: {}\n\n", DONE_MARKER)
}

/// Incremental parser over arbitrarily split byte chunks.
///
/// Only complete records are decoded; a trailing partial record stays buffered
/// until the next `push` or the final `finish`.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        self.normalize_line_endings();

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let record: Vec<u8> = self.buffer.drain(..pos + RECORD_DELIMITER.len()).collect();
            if let Some(frame) = parse_record(&record[..pos]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Best-effort parse of whatever is left once the transport has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }
        parse_record(&rest).into_iter().collect()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn normalize_line_endings(&mut self) {
        // a '\r' at the very end may pair with a '\n' in the next chunk
        let keep_tail = self.buffer.last() == Some(&b'\r');
        let tail = if keep_tail { self.buffer.pop() } else { None };
        if self.buffer.contains(&b'\r') {
            let mut normalized = Vec::with_capacity(self.buffer.len());
            let mut iter = self.buffer.iter().peekable();
            while let Some(&b) = iter.next() {
                if b == b'\r' {
                    if iter.peek() != Some(&&b'\n') {
                        normalized.push(b'\n');
                    }
                } else {
                    normalized.push(b);
                }
            }
            self.buffer = normalized;
        }
        if let Some(t) = tail {
            self.buffer.push(t);
        }
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RECORD_DELIMITER.len())
        .position(|w| w == RECORD_DELIMITER)
}

/// Decode one record. `None` for comments, keep-alives and malformed payloads.
fn parse_record(record: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(record);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();

    if data.is_empty() {
        return None;
    }

    let payload = data.join("\n");
    if payload.trim() == DONE_MARKER {
        return Some(Frame::End);
    }

    match serde_json::from_str::<StreamEvent>(&payload) {
        Ok(event) => Some(Frame::Event(event)),
        Err(e) => {
            debug!(error = %e, bytes = payload.len(), "Skipping undecodable frame");
            None
        }
    }
}
