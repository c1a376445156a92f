//! Streaming response decoder
//!
//! Turns the raw byte chunks of a response body into `ResponseChunk` events,
//! followed by exactly one `ResponseStreamEnded`.

use crate::api::ByteStream;
use crate::history::PromptId;
use crate::state_machine::Event;
use futures::stream::{self, Stream, StreamExt};
use std::str::FromStr;

/// How chunk boundaries are treated when decoding UTF-8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Each chunk is decoded on its own. A character split across two chunks
    /// turns into replacement characters, matching the web client.
    #[default]
    PerChunk,
    /// An incomplete trailing sequence is held back and completed by the next chunk
    Streaming,
}

impl FromStr for DecodeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-chunk" => Ok(Self::PerChunk),
            "streaming" => Ok(Self::Streaming),
            other => Err(format!(
                "unknown decode mode '{other}' (expected 'per-chunk' or 'streaming')"
            )),
        }
    }
}

/// Lossy UTF-8 decoder for one response body
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    mode: DecodeMode,
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            mode,
            pending: Vec::new(),
        }
    }

    /// Decode one chunk into a text fragment
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        match self.mode {
            DecodeMode::PerChunk => String::from_utf8_lossy(chunk).into_owned(),
            DecodeMode::Streaming => self.decode_carrying_tail(chunk),
        }
    }

    /// Flush whatever is still held back at end-of-stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }

    fn decode_carrying_tail(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        // Invalid sequence in the middle of the data
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = after.get(len..).unwrap_or_default();
                        }
                        // Truncated sequence at the end: wait for more bytes
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}

enum DecodeState {
    Reading(ByteStream, ChunkDecoder),
    Finished,
}

fn finish_events(mut decoder: ChunkDecoder, prompt_id: PromptId) -> Vec<Event> {
    let mut events = Vec::with_capacity(2);
    if let Some(text) = decoder.finish() {
        events.push(Event::ResponseChunk { text });
    }
    events.push(Event::ResponseStreamEnded { prompt_id });
    events
}

/// Adapt a response body into state machine events.
///
/// A transport error ends the stream like a normal end-of-body: whatever was
/// received so far becomes the final response.
pub fn decode_stream(
    body: ByteStream,
    mode: DecodeMode,
    prompt_id: PromptId,
) -> impl Stream<Item = Event> + Send {
    let initial = DecodeState::Reading(body, ChunkDecoder::new(mode));

    stream::unfold(initial, move |state| async move {
        match state {
            DecodeState::Reading(mut body, mut decoder) => match body.next().await {
                Some(Ok(chunk)) => {
                    let text = decoder.decode(&chunk);
                    Some((
                        vec![Event::ResponseChunk { text }],
                        DecodeState::Reading(body, decoder),
                    ))
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        prompt_id = %prompt_id,
                        error = %e,
                        "Response stream ended early"
                    );
                    Some((finish_events(decoder, prompt_id), DecodeState::Finished))
                }
                None => Some((finish_events(decoder, prompt_id), DecodeState::Finished)),
            },
            DecodeState::Finished => None,
        }
    })
    .flat_map(stream::iter)
}
