//! Server-Sent Events (SSE) line framing for completion streams.
//!
//! SSE lines can span multiple TCP packets, and a packet boundary can fall
//! inside a multi-byte UTF-8 sequence, so raw bytes are buffered until a
//! complete line is available before anything is decoded or parsed.

use std::fmt;

use serde::Deserialize;
use tracing::warn;

use chatgate_core::ProviderError;

/// Terminal sentinel payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A parsed stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next content fragment (`choices[0].delta.content`)
    Delta(String),
    /// `data: [DONE]`
    Done,
}

/// Line-buffering parser for `data:`-framed completion streams.
#[derive(Default)]
pub struct SseLineParser {
    /// Bytes of the current incomplete line
    buffer: Vec<u8>,
    /// Sentinel seen; later lines are ignored
    done: bool,
    /// Lines skipped because their payload was not valid JSON
    malformed: usize,
}

impl SseLineParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and return any events from complete lines.
    ///
    /// A trailing partial line is carried forward to the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.buffer.extend_from_slice(bytes);

        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if self.process_line(&line, &mut events) {
                self.buffer.clear();
                break;
            }
        }

        events
    }

    /// Flush an unterminated final line once the byte source has ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return events;
        }

        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.process_line(&line, &mut events);
        events
    }

    /// Whether the terminal sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of lines skipped as malformed.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Check if there's any buffered data.
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Handle one line. Returns true once the sentinel is reached.
    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> bool {
        match parse_line(line) {
            Ok(Some(StreamEvent::Done)) => {
                self.done = true;
                events.push(StreamEvent::Done);
                true
            }
            Ok(Some(event)) => {
                events.push(event);
                false
            }
            Ok(None) => false,
            Err(e) => {
                self.malformed += 1;
                warn!(error = %e, "Skipping malformed stream event");
                false
            }
        }
    }
}

impl fmt::Debug for SseLineParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseLineParser")
            .field("buffer_len", &self.buffer.len())
            .field("done", &self.done)
            .field("malformed", &self.malformed)
            .finish()
    }
}

/// Parse a single complete line (without its newline).
pub fn parse_line(line: &str) -> Result<Option<StreamEvent>, ProviderError> {
    let line = line.trim_end_matches('\r');

    // Empty lines separate events; lines starting with : are comments
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    // event:, id: and retry: fields carry nothing we use
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data == DONE_SENTINEL {
        return Ok(Some(StreamEvent::Done));
    }

    let chunk: ChunkPayload =
        serde_json::from_str(data).map_err(|e| ProviderError::malformed_event(line, e))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .map(StreamEvent::Delta))
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}
