//! Newline-delimited framing.
//!
//! Stream transports may split or coalesce writes arbitrarily, so every
//! logical field is terminated by `\n` and read back line by line.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Default upper bound for a single line, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8192;

/// Replace line terminators so that `text` fits in one frame.
pub fn sanitize(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Write `line` as one frame and flush.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = sanitize(line).into_bytes();
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Reads newline-terminated frames from a byte stream.
///
/// `read_line` is cancel safe: bytes of a partially received line are kept
/// in the reader and the next call resumes from there, so it can sit in a
/// `select!` or under `tokio::time::timeout`.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new reader that rejects lines longer than `max_line_bytes`.
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
            max_line_bytes,
        }
    }

    /// Change the line length cap for subsequent reads.
    pub fn set_max_line_bytes(&mut self, max_line_bytes: usize) {
        self.max_line_bytes = max_line_bytes;
    }

    /// Read the next line without its terminator.
    ///
    /// Returns `Ok(None)` on a clean end of stream.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed in the middle of a line",
                ));
            }

            let (consumed, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.pending.extend_from_slice(&available[..pos]);
                    (pos + 1, true)
                }
                None => {
                    self.pending.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.inner.consume(consumed);

            if self.pending.len() > self.max_line_bytes {
                self.pending.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line exceeds {} bytes", self.max_line_bytes),
                ));
            }

            if complete {
                return self.take_line().map(Some);
            }
        }
    }

    fn take_line(&mut self) -> io::Result<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "line is not valid UTF-8"))
    }
}
