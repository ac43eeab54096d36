//! Incremental decoding of streaming chat bodies
//!
//! Bytes are split into lines by [`LineDecoder`]; each line is then handed to
//! a [`FrameDecoder`] which knows the framing of the backend family and pulls
//! the content fragment out of it. [`decode_body`] wires both together over a
//! byte stream and turns the result into [`StreamEvent`]s.

use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::protocol::Framing;
use crate::chat::event::{StreamEnd, StreamEvent};

const SSE_DATA_PREFIX: &str = "data: ";
const SSE_DONE: &str = "[DONE]";

/// Longest line accepted from a body, terminator included
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Body read failures that are not plain transport errors
#[derive(Debug, Error)]
enum BodyError {
    #[error("no data for {0:?}")]
    Idle(Duration),
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
}

/// Splits a byte stream into lines.
///
/// Handles `\n` and `\r\n` endings, lines split across chunks, and a final
/// line without a terminator. Invalid UTF-8 is replaced rather than rejected.
/// A line longer than the maximum length is an error.
#[derive(Debug)]
pub struct LineDecoder {
    /// Bytes already scanned for a newline
    scanned: usize,
    max_length: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            scanned: 0,
            max_length,
        }
    }

    fn too_long(&self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, BodyError::LineTooLong(self.max_length))
    }

    fn into_line(mut bytes: BytesMut) -> String {
        if bytes.ends_with(b"\n") {
            bytes.truncate(bytes.len() - 1);
        }
        if bytes.ends_with(b"\r") {
            bytes.truncate(bytes.len() - 1);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Decoder for LineDecoder {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        let start = self.scanned.min(src.len());
        match src[start..].iter().position(|b| *b == b'\n') {
            Some(offset) if start + offset + 1 > self.max_length => Err(self.too_long()),
            Some(offset) => {
                let line = src.split_to(start + offset + 1);
                self.scanned = 0;
                Ok(Some(Self::into_line(line)))
            }
            None if src.len() > self.max_length => Err(self.too_long()),
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        self.scanned = 0;
        let rest = src.split_to(src.len());
        Ok(Some(Self::into_line(rest)))
    }
}

/// What a single line contributed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineOutcome {
    /// Non-empty content fragment carried by the line
    pub content: Option<String>,
    /// The line marks the end of the stream
    pub terminal: bool,
}

impl LineOutcome {
    fn skip() -> Self {
        Self::default()
    }

    fn finish() -> Self {
        Self {
            content: None,
            terminal: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NdJsonMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NdJsonChunk {
    #[serde(default)]
    message: Option<NdJsonMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
}

#[derive(Debug, Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
}

/// Extracts content from the lines of one backend family
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    framing: Framing,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Decode one line. Malformed lines are logged and skipped.
    pub fn decode_line(&self, line: &str) -> LineOutcome {
        let line = line.trim();
        match self.framing {
            Framing::NdJson => Self::decode_ndjson(line),
            Framing::ServerSentEvents => Self::decode_sse(line),
        }
    }

    fn decode_ndjson(line: &str) -> LineOutcome {
        if line.is_empty() {
            return LineOutcome::skip();
        }

        match serde_json::from_str::<NdJsonChunk>(line) {
            Ok(chunk) => LineOutcome {
                content: chunk
                    .message
                    .and_then(|m| m.content)
                    .filter(|c| !c.is_empty()),
                terminal: chunk.done,
            },
            Err(e) => {
                warn!(error = %e, line = %line, "Could not decode NDJSON line");
                LineOutcome::skip()
            }
        }
    }

    fn decode_sse(line: &str) -> LineOutcome {
        let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
            return LineOutcome::skip();
        };

        let data = data.trim();
        if data == SSE_DONE {
            return LineOutcome::finish();
        }
        if data.is_empty() {
            return LineOutcome::skip();
        }

        match serde_json::from_str::<SseChunk>(data) {
            Ok(chunk) => LineOutcome {
                content: chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta)
                    .and_then(|d| d.content)
                    .filter(|c| !c.is_empty()),
                terminal: false,
            },
            Err(e) => {
                warn!(error = %e, data = %data, "Could not decode SSE data");
                LineOutcome::skip()
            }
        }
    }
}

/// Runtime limits applied while reading a body
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Longest wait for the next body chunk before giving up
    pub idle_timeout: Option<Duration>,
    pub max_line_length: usize,
    pub cancel: CancellationToken,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            cancel: CancellationToken::new(),
        }
    }
}

enum Read {
    Line(String),
    Eof,
    Failed(io::Error),
    Cancelled,
}

/// Pass body chunks through, failing with [`BodyError::Idle`] when the next
/// chunk takes longer than `idle`. Nothing is read after the first error.
fn idle_guarded<S, B, E>(body: S, idle: Option<Duration>) -> impl Stream<Item = io::Result<B>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: Send + 'static,
    E: Into<io::Error> + 'static,
{
    async_stream::stream! {
        tokio::pin!(body);
        loop {
            let next = match idle {
                Some(idle) => match tokio::time::timeout(idle, body.next()).await {
                    Ok(item) => item.map(|chunk| chunk.map_err(Into::into)),
                    Err(_) => Some(Err(io::Error::new(io::ErrorKind::TimedOut, BodyError::Idle(idle)))),
                },
                None => body.next().await.map(|chunk| chunk.map_err(Into::into)),
            };

            match next {
                Some(Ok(chunk)) => yield Ok(chunk),
                Some(Err(e)) => {
                    yield Err(e);
                    break;
                }
                None => break,
            }
        }
    }
}

/// Terminal status for a failed body read
fn read_failure(e: io::Error) -> StreamEnd {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<BodyError>()) {
        Some(BodyError::Idle(idle)) => StreamEnd::Timeout { idle: *idle },
        Some(BodyError::LineTooLong(_)) => StreamEnd::Unexpected(e.to_string()),
        None => StreamEnd::Network(e.to_string()),
    }
}

/// Decode a streaming body into events.
///
/// The returned stream yields every content fragment in arrival order, then
/// exactly one [`StreamEvent::End`]. Reading stops at the first terminal
/// marker; remaining bytes are never read.
pub fn decode_body<S, B, E>(body: S, framing: Framing, options: DecodeOptions) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: Buf + Send + 'static,
    E: Into<io::Error> + 'static,
{
    let decoder = FrameDecoder::new(framing);
    let body = idle_guarded(body, options.idle_timeout);
    let lines = FramedRead::new(
        StreamReader::new(body),
        LineDecoder::with_max_length(options.max_line_length),
    );

    async_stream::stream! {
        tokio::pin!(lines);

        let mut lines_read = 0usize;
        let mut fragments = 0usize;

        let end = loop {
            let read = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => Read::Cancelled,
                line = lines.next() => match line {
                    Some(Ok(line)) => Read::Line(line),
                    Some(Err(e)) => Read::Failed(e),
                    None => Read::Eof,
                },
            };

            match read {
                Read::Line(line) => {
                    lines_read += 1;
                    trace!(line = %line, "Stream line");
                    let outcome = decoder.decode_line(&line);
                    if let Some(content) = outcome.content {
                        fragments += 1;
                        yield StreamEvent::Delta(content);
                    }
                    if outcome.terminal {
                        debug!(?framing, "Completion marker received");
                        break StreamEnd::Done;
                    }
                }
                Read::Eof if fragments == 0 => break StreamEnd::Empty,
                Read::Eof => break StreamEnd::Done,
                Read::Failed(e) => break read_failure(e),
                Read::Cancelled => break StreamEnd::Cancelled,
            }
        };

        info!(lines = lines_read, fragments, end = ?end, "Finished reading stream");
        yield StreamEvent::End(end);
    }
}
