//! Event stream codec
//!
//! Turns the byte stream of `GET /tasks/{id}/events` into typed [`EventFrame`]s. Two
//! framings are accepted: Server-Sent Events (one JSON object per `data:` field) and
//! newline-delimited JSON.

use std::collections::VecDeque;

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{self, BoxStream, StreamExt};

use crate::{
    protocol::{error::A2AError, event::EventFrame},
    transport::ByteStream,
};

/// Framing of an event stream body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`
    Sse,

    /// One JSON object per line
    Ndjson,
}

impl Framing {
    /// Pick the framing from a response content type. Anything that is not
    /// `text/event-stream` is read as newline-delimited JSON.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.trim_start().starts_with("text/event-stream") => Framing::Sse,
            _ => Framing::Ndjson,
        }
    }
}

/// Codec for task event streams
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStreamCodec;

impl EventStreamCodec {
    /// Create a new event stream codec
    pub fn new() -> Self {
        Self
    }

    /// Value for the `Accept` header of subscription requests
    pub fn accept(&self) -> &'static str {
        "text/event-stream, application/x-ndjson"
    }

    /// Decode a body into event frames.
    ///
    /// Malformed frames yield [`A2AError::Protocol`]; errors of the underlying body
    /// are passed through unchanged and end the stream.
    pub fn decode(
        &self,
        framing: Framing,
        body: ByteStream,
    ) -> BoxStream<'static, Result<EventFrame, A2AError>> {
        match framing {
            Framing::Sse => decode_sse(body),
            Framing::Ndjson => decode_ndjson(body),
        }
    }
}

fn parse_frame(data: &[u8]) -> Result<EventFrame, A2AError> {
    serde_json::from_slice(data)
        .map_err(|e| A2AError::Protocol(format!("Failed to parse event frame: {}", e)))
}

fn decode_sse(body: ByteStream) -> BoxStream<'static, Result<EventFrame, A2AError>> {
    body.eventsource()
        .filter_map(|result| async move {
            match result {
                Ok(event) => {
                    // keep-alives and comments carry no data
                    if event.data.trim().is_empty() {
                        return None;
                    }
                    let frame = parse_frame(event.data.as_bytes()).map(|mut frame| {
                        if frame.seq.is_none() {
                            frame.seq = event.id.parse().ok();
                        }
                        frame
                    });
                    Some(frame)
                }
                Err(EventStreamError::Transport(e)) => Some(Err(e)),
                Err(e) => Some(Err(A2AError::Protocol(format!("SSE stream error: {}", e)))),
            }
        })
        .boxed()
}

/// Longest NDJSON line accepted before the stream is treated as corrupt
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into lines, keeping any partial line between chunks
#[derive(Debug)]
struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, A2AError> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if end - start > self.max_line {
                return Err(self.overflow());
            }
            lines.push(self.pending[start..end].to_vec());
            start = end + 1;
            self.scanned = start;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
        if self.pending.len() > self.max_line {
            return Err(self.overflow());
        }
        Ok(lines)
    }

    fn overflow(&mut self) -> A2AError {
        self.pending.clear();
        self.scanned = 0;
        A2AError::Protocol(format!(
            "event line exceeds {} bytes without a newline",
            self.max_line
        ))
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

struct NdjsonState {
    body: ByteStream,
    lines: LineBuffer,
    ready: VecDeque<Result<EventFrame, A2AError>>,
    ended: bool,
}

impl NdjsonState {
    fn enqueue(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if !line.is_empty() {
            self.ready.push_back(parse_frame(line));
        }
    }

    fn accept(&mut self, chunk: Bytes) {
        match self.lines.push(&chunk) {
            Ok(lines) => {
                for line in lines {
                    self.enqueue(&line);
                }
            }
            Err(error) => {
                self.ready.push_back(Err(error));
                self.ended = true;
            }
        }
    }
}

fn decode_ndjson(body: ByteStream) -> BoxStream<'static, Result<EventFrame, A2AError>> {
    let state = NdjsonState {
        body,
        lines: LineBuffer::default(),
        ready: VecDeque::new(),
        ended: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.ended {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.accept(chunk),
                Some(Err(e)) => {
                    state.ready.push_back(Err(e));
                    state.ended = true;
                }
                None => {
                    if let Some(rest) = state.lines.finish() {
                        state.enqueue(&rest);
                    }
                    state.ended = true;
                }
            }
        }
    })
    .boxed()
}
