// ABOUTME: Shared SSE (Server-Sent Events) line-buffering adapter for LLM streaming responses
// ABOUTME: Normalizes data frames into ordered content envelopes plus one terminal metadata record
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # SSE Stream Adapter
//!
//! A shared line-buffering parser for Server-Sent Events used by every HTTP
//! provider. It handles two transport realities:
//!
//! 1. **Multiple events per TCP chunk**: all events in a chunk are emitted.
//! 2. **Partial JSON across TCP boundaries**: incomplete lines are buffered
//!    until their newline arrives.
//!
//! Each provider supplies a `parse_frame` closure turning a `data:` payload
//! into a [`StreamFrame`]. Content deltas are forwarded immediately; the
//! generation id, model and usage seen along the way are folded into a single
//! [`StreamEnvelope::Metadata`] item emitted after `[DONE]` (or at end of
//! body). Nothing is ever emitted after it.
//!
//! Dropping the returned stream drops the underlying byte stream, which
//! releases the upstream connection.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};

use super::wire::StreamFrame;
use super::{ChatStream, GenerationMetadata, StreamEnvelope};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination signal
    Done,
}

/// Line-buffering SSE parser that handles partial lines across TCP chunk boundaries
///
/// Bytes are buffered raw and only complete lines are decoded, so a multibyte
/// character split across two chunks survives intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed raw bytes from a TCP chunk, returning any complete SSE events
    ///
    /// Any trailing partial line stays buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            if let Some(event) = decode_line(&self.buffer[consumed..end]) {
                events.push(event);
            }
            consumed = end + 1;
        }
        self.buffer.drain(..consumed);
        events
    }

    /// Flush any remaining buffered content when the byte stream ends
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        decode_line(&remaining).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<SseEvent> {
    parse_line(&String::from_utf8_lossy(line))
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Non-data fields (event:, id:, retry:, `:` comments) are ignored
    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent::Data(data.to_owned()))
}

/// Running state folded from every frame seen so far
#[derive(Debug, Default)]
struct MetadataAccumulator {
    generation_id: Option<String>,
    model: Option<String>,
    usage: Option<super::TokenUsage>,
    total_cost: Option<f64>,
    first_token_ms: Option<i64>,
    saw_frame: bool,
}

impl MetadataAccumulator {
    fn absorb(&mut self, frame: &StreamFrame) {
        self.saw_frame = true;
        if self.generation_id.is_none() {
            self.generation_id.clone_from(&frame.generation_id);
        }
        if frame.model.is_some() {
            self.model.clone_from(&frame.model);
        }
        if frame.usage.is_some() {
            self.usage = frame.usage;
        }
        if frame.total_cost.is_some() {
            self.total_cost = frame.total_cost;
        }
    }

    fn finish(self) -> Option<GenerationMetadata> {
        if !self.saw_frame {
            return None;
        }
        Some(GenerationMetadata {
            generation_id: self.generation_id,
            model: self.model,
            usage: self.usage,
            total_cost: self.total_cost,
            latency_ms: self.first_token_ms,
            generation_time_ms: None,
        })
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct SseStreamState<F> {
    bytes: ByteStream,
    parser: SseLineBuffer,
    parse_frame: F,
    provider_name: &'static str,
    pending: VecDeque<Result<StreamEnvelope, AppError>>,
    metadata: Option<MetadataAccumulator>,
    started: Instant,
    finished: bool,
}

impl<F> SseStreamState<F>
where
    F: Fn(&str) -> Option<StreamFrame>,
{
    fn handle_events(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Data(json_str) => {
                    let Some(frame) = (self.parse_frame)(&json_str) else {
                        continue;
                    };
                    if let Some(acc) = self.metadata.as_mut() {
                        if frame.content.is_some() && acc.first_token_ms.is_none() {
                            acc.first_token_ms =
                                i64::try_from(self.started.elapsed().as_millis()).ok();
                        }
                        acc.absorb(&frame);
                    }
                    if let Some(delta) = frame.content {
                        self.pending.push_back(Ok(StreamEnvelope::Content { delta }));
                    }
                }
                SseEvent::Done => self.finish(),
            }
        }
    }

    /// Queue the terminal metadata item (at most once) and stop reading
    fn finish(&mut self) {
        self.finished = true;
        if let Some(metadata) = self.metadata.take().and_then(MetadataAccumulator::finish) {
            self.pending.push_back(Ok(StreamEnvelope::Metadata(metadata)));
        }
    }
}

/// Create a properly-buffered SSE envelope stream from a raw byte stream
///
/// `parse_frame` returns `None` for payloads that should be skipped (malformed
/// JSON, keep-alives). Transport errors end the stream with one `Err` item and
/// no metadata.
pub fn create_sse_stream<S, F>(
    byte_stream: S,
    parse_frame: F,
    provider_name: &'static str,
) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<StreamFrame> + Send + 'static,
{
    let state = SseStreamState {
        bytes: Box::pin(byte_stream),
        parser: SseLineBuffer::new(),
        parse_frame,
        provider_name,
        pending: VecDeque::new(),
        metadata: Some(MetadataAccumulator::default()),
        started: Instant::now(),
        finished: false,
    };

    let stream = unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = state.parser.feed(&bytes);
                    state.handle_events(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.metadata = None;
                    let error = AppError::external_service(
                        state.provider_name,
                        format!("Stream read error: {e}"),
                    );
                    return Some((Err(error), state));
                }
                None => {
                    let events = state.parser.flush();
                    state.handle_events(events);
                    state.finish();
                }
            }
        }
    });

    Box::pin(stream)
}
