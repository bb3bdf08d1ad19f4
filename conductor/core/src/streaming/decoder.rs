//! Server-sent event decoder
//!
//! Network reads do not line up with event boundaries, so the decoder keeps
//! the trailing partial line between calls to [`StreamDecoder::feed`]. The
//! buffer holds raw bytes: a multi-byte character split across two reads is
//! only decoded once its line is complete.

use super::types::{ChunkWire, UpstreamEvent};

/// Terminator payload sent by the upstream
const DONE_MARKER: &str = "[DONE]";

/// Field prefix carrying event data
const DATA_PREFIX: &str = "data:";

/// SSE fields other than `data` (never part of a payload)
const OTHER_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Upper bound on a payload held back waiting for more lines
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Turns a chunked byte stream into [`UpstreamEvent`]s
///
/// Feeding the same bytes split at any points yields the same events.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes after the last newline seen
    line_buffer: Vec<u8>,
    /// Data payload that did not parse yet
    pending: Option<String>,
    /// `[DONE]` was seen
    finished: bool,
}

impl StreamDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminator has been decoded
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one physical read
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.line_buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.line_buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.line_buffer[start..end]).into_owned();
            start = end + 1;

            self.process_line(&line, &mut events);
            if self.finished {
                self.line_buffer.clear();
                return events;
            }
        }
        self.line_buffer.drain(..start);

        events
    }

    /// Flush a final line that arrived without a trailing newline
    ///
    /// Call when the transport closes.
    pub fn finish(&mut self) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();
        if !self.finished && !self.line_buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.line_buffer).into_owned();
            self.line_buffer.clear();
            self.process_line(&line, &mut events);
        }
        if let Some(pending) = self.pending.take() {
            tracing::warn!(
                bytes = pending.len(),
                "Upstream closed with an undecodable payload"
            );
        }
        events
    }

    fn process_line(&mut self, raw: &str, events: &mut Vec<UpstreamEvent>) {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with(':') {
            return;
        }
        if OTHER_FIELDS.iter().any(|field| line.starts_with(field)) {
            return;
        }

        let payload = if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            rest.trim()
        } else if self.pending.is_some() {
            // Continuation of a payload that was split over lines
            line.trim()
        } else {
            return;
        };

        if payload == DONE_MARKER {
            if let Some(pending) = self.pending.take() {
                tracing::warn!(
                    bytes = pending.len(),
                    "Dropping undecodable payload at end of stream"
                );
            }
            self.finished = true;
            events.push(UpstreamEvent::StreamEnd);
            return;
        }

        let Some(previous) = self.pending.take() else {
            if !Self::decode(payload, events) {
                self.hold(payload.to_string());
            }
            return;
        };

        let joined = format!("{previous}{payload}");
        if Self::decode(&joined, events) {
            return;
        }
        let joined_newline = format!("{previous}\n{payload}");
        if Self::decode(&joined_newline, events) {
            return;
        }
        if Self::decode(payload, events) {
            tracing::warn!(
                bytes = previous.len(),
                "Dropping undecodable payload superseded by a complete one"
            );
            return;
        }
        self.hold(joined);
    }

    fn hold(&mut self, payload: String) {
        if payload.len() > MAX_PENDING_BYTES {
            tracing::warn!(
                bytes = payload.len(),
                "Undecodable upstream payload exceeds limit, dropping"
            );
            return;
        }
        tracing::trace!(bytes = payload.len(), "Re-buffering partial payload");
        self.pending = Some(payload);
    }

    /// Parse a payload and append its events; false if it is not valid JSON
    fn decode(payload: &str, events: &mut Vec<UpstreamEvent>) -> bool {
        match serde_json::from_str::<ChunkWire>(payload) {
            Ok(chunk) => {
                if let Some(ref error) = chunk.error {
                    tracing::warn!(error = %error, "Upstream sent an error object in the stream");
                }
                chunk.into_events(events);
                true
            }
            Err(_) => false,
        }
    }
}
