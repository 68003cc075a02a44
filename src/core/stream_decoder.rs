//! Server-sent-event decoding for chat completion streams.
//!
//! [`StreamDecoder`] turns raw body chunks into thinking/answer deltas. Chunk
//! boundaries are arbitrary: an event may be split across several chunks and
//! one chunk may carry several events, so the decoder carries the trailing
//! partial line over to the next call. Payloads that fail to parse are
//! counted and skipped rather than aborting the stream.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream, StreamExt};
use memchr::memchr;
use tracing::{trace, warn};

use crate::api::StreamPayload;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Thinking,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDelta {
    pub kind: DeltaKind,
    pub text: String,
}

impl StreamDelta {
    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Thinking,
            text: text.into(),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Answer,
            text: text.into(),
        }
    }
}

/// How the event stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The `[DONE]` sentinel arrived.
    Done,
    /// The body ran out before any sentinel.
    EndedWithoutDone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Delta(StreamDelta),
    /// The provider reported an error inside the stream.
    ProviderError(String),
    /// Emitted exactly once; nothing follows it.
    Finished { end: StreamEnd, skipped: usize },
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    finished: bool,
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodeEvent> {
        if self.finished {
            return Vec::new();
        }

        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let mut line_end = newline_pos;
            if line_end > 0 && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let line = std::str::from_utf8(&self.buffer[..line_end]).map(str::to_owned);
            self.buffer.drain(..=newline_pos);

            let event = match line {
                Ok(line) => self.process_line(&line),
                Err(err) => {
                    warn!("Skipping stream line with invalid UTF-8: {err}");
                    self.skipped += 1;
                    None
                }
            };

            if let Some(event) = event {
                let is_final = matches!(event, DecodeEvent::Finished { .. });
                events.push(event);
                if is_final {
                    self.buffer.clear();
                    break;
                }
            }
        }

        events
    }

    /// Flush the unterminated tail and report how the stream ended.
    ///
    /// Returns nothing once the `[DONE]` sentinel has already been reported.
    pub fn finish(&mut self) -> Vec<DecodeEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            match std::str::from_utf8(&tail) {
                Ok(line) => {
                    if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                        events.push(event);
                    }
                }
                Err(err) => {
                    warn!("Skipping trailing stream data with invalid UTF-8: {err}");
                    self.skipped += 1;
                }
            }
        }

        if !self.finished {
            self.finished = true;
            events.push(DecodeEvent::Finished {
                end: StreamEnd::EndedWithoutDone,
                skipped: self.skipped,
            });
        }
        events
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of events dropped because they could not be parsed.
    pub fn skipped_events(&self) -> usize {
        self.skipped
    }

    fn process_line(&mut self, line: &str) -> Option<DecodeEvent> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let payload = extract_data_payload(line)?;
        if payload == DONE_SENTINEL {
            self.finished = true;
            return Some(DecodeEvent::Finished {
                end: StreamEnd::Done,
                skipped: self.skipped,
            });
        }

        let parsed = match serde_json::from_str::<StreamPayload>(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Skipping malformed stream event ({err}): {payload}");
                self.skipped += 1;
                return None;
            }
        };

        if let Some(message) = parsed.error_message() {
            return Some(DecodeEvent::ProviderError(message));
        }

        match (parsed.reasoning_text(), parsed.answer_text()) {
            (Some(reasoning), Some(answer)) => {
                warn!(
                    "Stream event carried both reasoning and answer text; keeping reasoning, dropping {} answer bytes",
                    answer.len()
                );
                Some(DecodeEvent::Delta(StreamDelta::thinking(reasoning)))
            }
            (Some(reasoning), None) => Some(DecodeEvent::Delta(StreamDelta::thinking(reasoning))),
            (None, Some(answer)) => Some(DecodeEvent::Delta(StreamDelta::answer(answer))),
            (None, None) => {
                trace!("Ignoring stream event without text: {payload}");
                None
            }
        }
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

struct DecodeState<S> {
    bytes: S,
    decoder: StreamDecoder,
    pending: VecDeque<DecodeEvent>,
    finished: bool,
}

/// Adapt a body byte stream into a stream of decoded events.
///
/// The returned stream ends right after its [`DecodeEvent::Finished`] item,
/// or right after the first transport error.
pub fn decode_stream<S, E>(bytes: S) -> impl Stream<Item = Result<DecodeEvent, E>>
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
{
    let state = DecodeState {
        bytes,
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(event) = state.pending.pop_front() {
                if matches!(event, DecodeEvent::Finished { .. }) {
                    state.finished = true;
                }
                return Some((Ok(event), state));
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err), state));
                }
                None => {
                    let events = state.decoder.finish();
                    if events.is_empty() {
                        return None;
                    }
                    state.pending.extend(events);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(events: &[DecodeEvent]) -> Vec<StreamDelta> {
        events
            .iter()
            .filter_map(|event| match event {
                DecodeEvent::Delta(delta) => Some(delta.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn decodes_reasoning_then_answer_scenario() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        for chunk in [
            "data: {\"reasoning\":\"Hmm\"}\n\n",
            "data: {\"answer\":\"The \"}\n\n",
            "data: {\"answer\":\"answer is 4\"}\n\n",
            "data: [DONE]\n\n",
        ] {
            events.extend(decoder.push(chunk.as_bytes()));
        }
        events.extend(decoder.finish());

        assert_eq!(
            deltas(&events),
            vec![
                StreamDelta::thinking("Hmm"),
                StreamDelta::answer("The "),
                StreamDelta::answer("answer is 4"),
            ]
        );
        let finished: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, DecodeEvent::Finished { .. }))
            .collect();
        assert_eq!(
            finished,
            vec![&DecodeEvent::Finished {
                end: StreamEnd::Done,
                skipped: 0
            }]
        );
    }

    #[test]
    fn malformed_event_is_skipped_between_good_ones() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(
            b"data: {\"answer\":\"one\"}\n\ndata: {not json\n\ndata: {\"answer\":\"two\"}\n\n",
        );

        assert_eq!(
            deltas(&events),
            vec![StreamDelta::answer("one"), StreamDelta::answer("two")]
        );
        assert_eq!(decoder.skipped_events(), 1);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn events_split_across_chunks_are_reassembled() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"data: {\"choices\":[{\"delta\":").is_empty());
        assert!(decoder.push(b"{\"reasoning_content\":\"step").is_empty());
        let events = decoder.push(b" one\"}}]}\r\n\r\ndata: {\"answer\":\"x\"}\n");

        assert_eq!(
            deltas(&events),
            vec![StreamDelta::thinking("step one"), StreamDelta::answer("x")]
        );
    }

    #[test]
    fn multibyte_characters_split_across_chunks_survive() {
        let line = "data: {\"answer\":\"答案是四\"}\n".as_bytes();
        let mut decoder = StreamDecoder::new();
        let split = line.len() - 6;
        assert!(decoder.push(&line[..split]).is_empty());
        let events = decoder.push(&line[split..]);
        assert_eq!(deltas(&events), vec![StreamDelta::answer("答案是四")]);
    }

    #[test]
    fn accepts_data_prefix_without_space() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data:{\"answer\":\"tight\"}\ndata:[DONE]\n");
        assert_eq!(deltas(&events), vec![StreamDelta::answer("tight")]);
        assert!(decoder.is_finished());
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: message\nid: 7\ndata: {\"answer\":\"a\"}\n");
        assert_eq!(deltas(&events), vec![StreamDelta::answer("a")]);
        assert_eq!(decoder.skipped_events(), 0);
    }

    #[test]
    fn nothing_is_decoded_after_done() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: [DONE]\ndata: {\"answer\":\"late\"}\n");
        assert_eq!(events.len(), 1);
        assert!(decoder.push(b"data: {\"answer\":\"later\"}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn early_close_is_reported_distinctly() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.push(b"data: {\"answer\":\"partial\"}\n\ndata: {\"answer\":\"tail\"}");
        events.extend(decoder.finish());

        assert_eq!(
            deltas(&events),
            vec![StreamDelta::answer("partial"), StreamDelta::answer("tail")]
        );
        assert_eq!(
            events.last(),
            Some(&DecodeEvent::Finished {
                end: StreamEnd::EndedWithoutDone,
                skipped: 0
            })
        );
    }

    #[test]
    fn in_band_errors_are_reported() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: {\"error\":{\"message\":\"quota exceeded\"}}\n");
        assert_eq!(
            events,
            vec![DecodeEvent::ProviderError("quota exceeded".to_string())]
        );
    }

    #[test]
    fn reasoning_wins_when_both_fields_arrive_together() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: {\"reasoning\":\"think\",\"answer\":\"say\"}\n");
        assert_eq!(deltas(&events), vec![StreamDelta::thinking("think")]);
    }

    #[test]
    fn textless_events_are_not_counted_as_corruption() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":\"stop\"}]}\n",
        );
        assert!(events.is_empty());
        assert_eq!(decoder.skipped_events(), 0);
    }

    #[tokio::test]
    async fn decode_stream_ends_after_finished_event() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"reasoning\":\"Hmm\"}\n\ndata: {\"ans".to_vec()),
            Ok(b"wer\":\"4\"}\n\ndata: [DONE]\n\n".to_vec()),
            Ok(b"data: {\"answer\":\"ignored\"}\n\n".to_vec()),
        ];
        let events: Vec<_> = decode_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                Ok(DecodeEvent::Delta(StreamDelta::thinking("Hmm"))),
                Ok(DecodeEvent::Delta(StreamDelta::answer("4"))),
                Ok(DecodeEvent::Finished {
                    end: StreamEnd::Done,
                    skipped: 0
                }),
            ]
        );
    }

    #[tokio::test]
    async fn decode_stream_surfaces_transport_errors() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"answer\":\"a\"}\n".to_vec()),
            Err("connection reset".to_string()),
        ];
        let events: Vec<_> = decode_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                Ok(DecodeEvent::Delta(StreamDelta::answer("a"))),
                Err("connection reset".to_string()),
            ]
        );
    }
}
