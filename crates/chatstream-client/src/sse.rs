//! Incremental Server-Sent-Events decoder for completion streams.
//!
//! Wire format, one frame per line:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Network chunks may split a frame anywhere, including inside a UTF-8
//! sequence, so bytes are buffered until a full line is available. Frames
//! that fail to parse or carry no content are skipped; only a transport
//! failure ends the stream with an error.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::error::ClientError;

/// Prefix of a data line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that marks the end of the completion.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded, meaningful SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A non-empty content fragment.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    /// Flattened `{"content": ...}` frames relayed by a chat proxy.
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract `choices[0].delta.content` from a frame payload.
///
/// A proxy-relayed `{"content": ...}` frame is accepted as well. Returns
/// `None` for malformed JSON, a different shape, or empty content.
#[must_use]
pub fn parse_delta(payload: &str) -> Option<String> {
    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => {
            let content = match chunk.choices.into_iter().next() {
                Some(choice) => choice.delta.and_then(|delta| delta.content),
                None => chunk.content,
            };
            content.filter(|content| !content.is_empty())
        }
        Err(e) => {
            tracing::debug!(error = %e, payload = %payload, "Skipping malformed SSE frame");
            None
        }
    }
}

fn parse_line(raw: &[u8]) -> Option<SseFrame> {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    parse_delta(payload).map(SseFrame::Delta)
}

/// Line-buffering SSE decoder.
///
/// Feed it raw chunks with [`SseDecoder::push`]; it returns the frames that
/// became complete. After `[DONE]` it ignores further input.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let frame = parse_line(&self.buffer[start..end]);
            start = end + 1;

            match frame {
                Some(SseFrame::Done) => {
                    self.finished = true;
                    frames.push(SseFrame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }

        if self.finished {
            self.buffer.clear();
        } else {
            self.buffer.drain(..start);
        }
        frames
    }

    /// Whether `[DONE]` has been seen.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes of the trailing incomplete line.
    #[must_use]
    pub fn residue_len(&self) -> usize {
        self.buffer.len()
    }
}

struct DeltaState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ClientError>>,
    finished: bool,
}

/// Turn a response body into a stream of content deltas.
///
/// The stream ends after `[DONE]` or when the body ends; an incomplete last
/// line is discarded. A body error is yielded once, after any deltas decoded
/// before it, and ends the stream.
pub fn delta_stream<S>(bytes: S) -> impl Stream<Item = Result<String, ClientError>>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    let state = DeltaState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(&chunk) {
                        match frame {
                            SseFrame::Delta(delta) => state.pending.push_back(Ok(delta)),
                            SseFrame::Done => {
                                tracing::debug!("Completion stream signalled [DONE]");
                                state.finished = true;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Completion stream failed");
                    state.pending.push_back(Err(e));
                    state.finished = true;
                }
                None => {
                    let residue = state.decoder.residue_len();
                    if residue > 0 {
                        tracing::debug!(residue, "Discarding incomplete trailing SSE line");
                    }
                    state.finished = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn body(chunks: Vec<&[u8]>) -> impl Stream<Item = Result<Bytes, ClientError>> + Unpin {
        let owned: Vec<Result<Bytes, ClientError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(owned)
    }

    async fn collect(chunks: Vec<&[u8]>) -> Vec<String> {
        delta_stream(body(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[test]
    fn parse_delta_extracts_content() {
        let payload = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_delta(payload), Some("Hi".to_string()));
    }

    #[test]
    fn parse_delta_ignores_other_shapes() {
        assert_eq!(parse_delta(r#"{"choices":[]}"#), None);
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"content":""}}]}"#), None);
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"content":null}}]}"#), None);
        assert_eq!(parse_delta(r#"{"choices":"nope"}"#), None);
        assert_eq!(parse_delta("{not json"), None);
    }

    #[test]
    fn parse_delta_accepts_proxy_frames() {
        assert_eq!(parse_delta(r#"{"content":"relayed"}"#), Some("relayed".to_string()));
        assert_eq!(parse_delta(r#"{"content":""}"#), None);
    }

    #[test]
    fn content_passes_through_verbatim() {
        let payload = r#"{"choices":[{"delta":{"content":"  two spaces\n"}}]}"#;
        assert_eq!(parse_delta(payload), Some("  two spaces\n".to_string()));
    }

    #[test]
    fn decoder_holds_back_partial_lines() {
        let mut decoder = SseDecoder::new();
        let wire = frame("Hello");
        let (head, tail) = wire.split_at(20);

        assert!(decoder.push(head.as_bytes()).is_empty());
        assert_eq!(decoder.residue_len(), 20);
        assert_eq!(
            decoder.push(tail.as_bytes()),
            vec![SseFrame::Delta("Hello".to_string())]
        );
        assert_eq!(decoder.residue_len(), 0);
    }

    #[test]
    fn decoder_reassembles_split_utf8() {
        let wire = frame("héllo");
        let bytes = wire.as_bytes();
        let split = wire.find('é').unwrap() + 1; // inside the two-byte sequence

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(
            decoder.push(&bytes[split..]),
            vec![SseFrame::Delta("héllo".to_string())]
        );
    }

    #[test]
    fn decoder_stops_at_done() {
        let mut decoder = SseDecoder::new();
        let wire = format!("{}data: [DONE]\n\n{}", frame("a"), frame("b"));

        let frames = decoder.push(wire.as_bytes());

        assert_eq!(frames, vec![SseFrame::Delta("a".to_string()), SseFrame::Done]);
        assert!(decoder.is_finished());
        assert!(decoder.push(frame("c").as_bytes()).is_empty());
    }

    #[test]
    fn decoder_accepts_crlf_and_ignores_non_data_lines() {
        let mut decoder = SseDecoder::new();
        let wire = ": keep-alive\r\nevent: message\r\ndata:{\"x\":1}\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\n\r\n";
        assert_eq!(
            decoder.push(wire.as_bytes()),
            vec![SseFrame::Delta("ok".to_string())]
        );
    }

    #[tokio::test]
    async fn single_frame_then_close() {
        let wire = br#"data: {"choices":[{"delta":{"content":"Hi"}}]}

"#;
        assert_eq!(collect(vec![&wire[..]]).await, vec!["Hi"]);
    }

    #[tokio::test]
    async fn malformed_frame_between_valid_frames_is_skipped() {
        let first = frame("one");
        let second = frame("two");
        let wire = format!("{first}data: {{\"choices\": [oops\n\n{second}");

        assert_eq!(collect(vec![wire.as_bytes()]).await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn byte_at_a_time_delivery() {
        let wire = format!("{}{}data: [DONE]\n\n", frame("Hel"), frame("lo"));
        let chunks: Vec<&[u8]> = wire.as_bytes().chunks(1).collect();
        assert_eq!(collect(chunks).await, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn done_stops_reading_further_chunks() {
        let a = frame("a");
        let done = "data: [DONE]\n\n".to_string();
        let b = frame("b");
        let deltas = collect(vec![a.as_bytes(), done.as_bytes(), b.as_bytes()]).await;
        assert_eq!(deltas, vec!["a"]);
    }

    #[tokio::test]
    async fn trailing_partial_line_is_discarded() {
        let a = frame("a");
        let deltas = collect(vec![a.as_bytes(), &b"data: {\"choices\":[{\"delta\":{\"content\":\"lost"[..]]).await;
        assert_eq!(deltas, vec!["a"]);
    }

    #[tokio::test]
    async fn transport_error_follows_decoded_deltas() {
        let a = frame("partial");
        let items: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from(a)),
            Err(ClientError::Transport("connection reset".to_string())),
            Ok(Bytes::from(frame("never"))),
        ];

        let results: Vec<_> = delta_stream(stream::iter(items)).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "partial");
        assert!(matches!(results[1], Err(ClientError::Transport(_))));
    }
}
