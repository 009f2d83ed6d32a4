//! Feed transport: newline-delimited relay envelopes from TCP or stdin.
//!
//! Lines are handed out as raw bytes; deciding whether they are text is the
//! arbiter's job, so one bad envelope never ends the session.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

use crate::config::FeedSource;

/// Longest envelope accepted by default. Relay envelopes are a few KiB.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One unit read off the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator.
    Line(Vec<u8>),
    /// A line longer than the limit; its bytes were dropped as they arrived.
    Oversized { length: usize },
}

/// Splits a byte stream into bounded lines.
///
/// Partial lines live in the reader, not in the future returned by
/// [`next_frame`](Self::next_frame), so dropping that future (a timeout or a
/// shutdown select) loses nothing.
pub struct EnvelopeReader {
    inner: Box<dyn AsyncBufRead + Send + Unpin>,
    max_line_bytes: usize,
    buf: Vec<u8>,
    /// Bytes thrown away from the current line once it went over the limit.
    discarded: usize,
}

impl EnvelopeReader {
    pub fn new<R>(reader: R, max_line_bytes: usize) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            inner: Box::new(reader),
            max_line_bytes,
            buf: Vec::new(),
            discarded: 0,
        }
    }

    /// Next line, or `None` once the source is exhausted.
    ///
    /// A trailing line without a newline is still returned. Only I/O
    /// failures are errors.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(self.take_pending());
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let chunk = newline.map_or(available, |at| &available[..at]);
            let used = newline.map_or(available.len(), |at| at + 1);

            if self.discarded > 0 || self.buf.len() + chunk.len() > self.max_line_bytes {
                self.discarded += self.buf.len() + chunk.len();
                self.buf.clear();
            } else {
                self.buf.extend_from_slice(chunk);
            }
            self.inner.consume(used);

            if newline.is_some() {
                if let Some(frame) = self.take_pending() {
                    return Ok(Some(frame));
                }
                // Empty line.
                return Ok(Some(Frame::Line(Vec::new())));
            }
        }
    }

    fn take_pending(&mut self) -> Option<Frame> {
        if self.discarded > 0 {
            let length = std::mem::take(&mut self.discarded);
            return Some(Frame::Oversized { length });
        }
        if self.buf.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(Frame::Line(line))
    }
}

/// Open the configured source.
pub async fn connect(source: &FeedSource, max_line_bytes: usize) -> io::Result<EnvelopeReader> {
    match source {
        FeedSource::Stdin => Ok(EnvelopeReader::new(
            BufReader::new(tokio::io::stdin()),
            max_line_bytes,
        )),
        FeedSource::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await?;
            tracing::info!("Connected to relay at {}", addr);
            Ok(EnvelopeReader::new(BufReader::new(stream), max_line_bytes))
        }
    }
}

/// Wrap any buffered reader with the default limit, e.g. a fixture in tests.
pub fn from_reader<R>(reader: R) -> EnvelopeReader
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    EnvelopeReader::new(reader, MAX_LINE_BYTES)
}
