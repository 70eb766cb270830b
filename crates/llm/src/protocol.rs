use bytes::BytesMut;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use snafu::{ResultExt, ensure};

use crate::error::{
    InvalidPayloadSnafu, MalformedEventError, TransportResult, UnrecognizedPayloadSnafu,
};
use crate::transport::ByteStream;

/// Marker that introduces an event-data line.
pub const DATA_PREFIX: &str = "data:";
/// Payload that ends a turn explicitly.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    ContextProvided(bool),
    Terminate,
}

/// Splits an arbitrarily chunked byte stream into complete lines.
///
/// Bytes are buffered rather than text, so a multi-byte character cut by a chunk
/// boundary is reassembled before decoding. One decoder serves exactly one response.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: BytesMut,
    scanned: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = self.scanned + offset;
            let raw = self.buffer.split_to(end + 1);
            self.scanned = 0;

            let mut line = &raw[..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }

        // Only the unterminated fragment remains; skip it on the next scan.
        self.scanned = self.buffer.len();
        lines
    }

    /// Bytes of the unterminated fragment carried to the next chunk.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Ends the stream. A half-delivered line is not an event and is dropped.
    pub fn finish(self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            tracing::debug!(
                discarded_bytes = discarded,
                "dropping unterminated trailing line at end of stream"
            );
        }
        discarded
    }
}

/// Accepted spellings of the context flag, in lookup order.
const CONTEXT_FLAG_KEYS: [&str; 2] = ["context_provided", "contextProvided"];

/// Maps one protocol line to its events.
///
/// Lines without the data prefix yield nothing. Malformed payloads are logged and dropped.
pub fn interpret_line(line: &str) -> Vec<StreamEvent> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Vec::new();
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return vec![StreamEvent::Terminate];
    }

    match parse_payload(payload) {
        Ok(events) => events,
        Err(error) => {
            tracing::debug!(error = %error, payload, "dropping malformed stream event");
            Vec::new()
        }
    }
}

fn parse_payload(payload: &str) -> Result<Vec<StreamEvent>, MalformedEventError> {
    let record: Value = serde_json::from_str(payload).context(InvalidPayloadSnafu {
        stage: "parse-event-payload",
    })?;

    // Fields are read independently; a mistyped sibling never hides a usable one.
    let mut events = Vec::with_capacity(2);
    let flag = CONTEXT_FLAG_KEYS
        .iter()
        .find_map(|key| record.get(key).and_then(Value::as_bool));
    if let Some(flag) = flag {
        events.push(StreamEvent::ContextProvided(flag));
    }
    if let Some(token) = record.get("token").and_then(Value::as_str) {
        events.push(StreamEvent::Token(token.to_string()));
    }

    ensure!(
        !events.is_empty(),
        UnrecognizedPayloadSnafu {
            stage: "interpret-event-payload",
        }
    );
    Ok(events)
}

/// Lazily decodes a response body into protocol events.
///
/// The sequence is finite and ends with the body; a transport error ends it early.
pub fn decode_events(mut body: ByteStream) -> BoxStream<'static, TransportResult<StreamEvent>> {
    let events = async_stream::try_stream! {
        let mut decoder = StreamDecoder::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in decoder.push(&chunk) {
                for event in interpret_line(&line) {
                    yield event;
                }
            }
        }
        decoder.finish();
    };

    Box::pin(events)
}
