//! Incremental reader for the chat endpoint's event stream.
//!
//! The body is UTF-8 text made of records separated by a blank line. Each record
//! carries `data:` lines holding either a JSON object with a `response` field or
//! the `[DONE]` sentinel.

use crate::error::{ClientError, ClientResult};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, warn};

const RECORD_DELIMITER: &str = "\n\n";
const DONE_SENTINEL: &str = "[DONE]";

/// Lazily produced text deltas. Dropping it releases the response body.
pub type DeltaStream = BoxStream<'static, ClientResult<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    // Trailing bytes of a UTF-8 sequence split across chunks.
    partial: Vec<u8>,
    text: String,
    finished: bool,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one chunk and return the events completed by it.
    ///
    /// Nothing is returned once `[DONE]` has been seen.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.decode(chunk);

        while let Some(end) = self.text.find(RECORD_DELIMITER) {
            let record: String = self.text.drain(..end + RECORD_DELIMITER.len()).collect();
            if self.read_record(&record[..end], &mut events) {
                self.finished = true;
                self.text.clear();
                self.partial.clear();
                break;
            }
        }
        events
    }

    /// Called when the body ends. An unterminated trailing record is dropped.
    pub fn finish(&mut self) {
        if !self.finished && (!self.text.trim().is_empty() || !self.partial.is_empty()) {
            debug!(
                "bytes" = self.text.len() + self.partial.len(),
                "event stream ended inside a record"
            );
        }
        self.finished = true;
        self.text.clear();
        self.partial.clear();
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.partial[consumed..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    consumed = self.partial.len();
                    break;
                }
                Err(err) => {
                    let valid_end = consumed + err.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.partial[consumed..valid_end]));
                    match err.error_len() {
                        Some(invalid) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + invalid;
                        }
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.partial.drain(..consumed);
    }

    /// Returns `true` when the record ends the stream.
    fn read_record(&self, record: &str, events: &mut Vec<StreamEvent>) -> bool {
        for line in record.split('\n') {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == DONE_SENTINEL {
                events.push(StreamEvent::Done);
                return true;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(value) => {
                    if let Some(delta) = value.get("response").and_then(Value::as_str) {
                        if !delta.is_empty() {
                            events.push(StreamEvent::Delta(delta.to_owned()));
                        }
                    }
                }
                Err(err) => warn!(%err, "skipping malformed stream record"),
            }
        }
        false
    }
}

struct ReaderState<S> {
    body: Option<Pin<Box<S>>>,
    decoder: EventStreamDecoder,
    ready: VecDeque<String>,
}

/// Turn a chunked body into a pull-based sequence of text deltas.
///
/// The body is read only while the consumer polls, and it is dropped as soon as
/// `[DONE]`, the end of input, or a transport error is reached.
pub fn read_deltas<S, B, E>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    let state = ReaderState {
        body: Some(Box::pin(body)),
        decoder: EventStreamDecoder::new(),
        ready: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.ready.pop_front() {
                return Some((Ok(delta), state));
            }
            let body = state.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    for event in state.decoder.push(chunk.as_ref()) {
                        match event {
                            StreamEvent::Delta(delta) => state.ready.push_back(delta),
                            StreamEvent::Done => state.body = None,
                        }
                    }
                }
                Some(Err(err)) => {
                    state.body = None;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.decoder.finish();
                    state.body = None;
                }
            }
        }
    })
    .boxed()
}
