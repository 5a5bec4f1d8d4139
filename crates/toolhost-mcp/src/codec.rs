//! Wire codec for the stdio protocol.
//!
//! Inbound, a server may use `Content-Length` header blocks (LSP style) or
//! bare newline-delimited JSON objects, and may mix in diagnostic noise on
//! stdout. Outbound framing is chosen per server.

use crate::error::McpError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const CONTENT_LENGTH: &str = "content-length:";

/// Upper bound on a single framed body; larger headers are treated as corrupt.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Outbound framing style for one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Compact JSON followed by a single `\n`.
    #[default]
    Newline,
    /// `Content-Length: n` header block, blank line, body.
    ContentLength,
}

/// Serialize a message into the bytes for exactly one write call.
pub fn encode<T: Serialize>(message: &T, framing: Framing) -> Result<Vec<u8>, McpError> {
    let body = serde_json::to_vec(message)?;
    let mut out = match framing {
        Framing::Newline => Vec::with_capacity(body.len() + 1),
        Framing::ContentLength => {
            let mut out = Vec::with_capacity(body.len() + 32);
            out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            out
        }
    };
    out.extend_from_slice(&body);
    out.push(b'\n');
    Ok(out)
}

/// Decode one non-header line.
///
/// Returns `Ok(None)` for blank lines and non-JSON diagnostic noise.
pub fn decode_line(line: &str) -> Result<Option<serde_json::Value>, McpError> {
    let candidate = line.trim();
    if candidate.is_empty() {
        return Ok(None);
    }
    if !candidate.starts_with('{') {
        tracing::debug!("Ignoring non-protocol output: {candidate}");
        return Ok(None);
    }
    serde_json::from_str(candidate)
        .map(Some)
        .map_err(|e| McpError::MalformedFrame(format!("invalid JSON line: {e}")))
}

/// Incremental frame decoder over a server's stdout.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    /// A line read while scanning headers that belongs to the next frame.
    pending: Option<String>,
    max_line: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            pending: None,
            max_line: MAX_FRAME_BYTES,
        }
    }

    #[cfg(test)]
    fn with_line_limit(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Read the next decoded message, or `Ok(None)` at end of stream.
    ///
    /// Malformed frames are logged and skipped; only I/O errors end the stream.
    pub async fn next_message(&mut self) -> std::io::Result<Option<serde_json::Value>> {
        loop {
            let outcome = match self.read_line().await? {
                None => return Ok(None),
                Some(Err(e)) => Err(e),
                Some(Ok(line)) => match strip_header(&line, CONTENT_LENGTH) {
                    Some(value) => self.read_framed_body(value).await?,
                    None => decode_line(&line),
                },
            };

            match outcome {
                Ok(Some(message)) => return Ok(Some(message)),
                Ok(None) => continue,
                Err(e) => tracing::debug!("Dropping frame: {e}"),
            }
        }
    }

    /// Next line without its terminator. Lines longer than the limit are
    /// consumed up to their newline and reported as malformed.
    async fn read_line(&mut self) -> std::io::Result<Option<Result<String, McpError>>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(Ok(line)));
        }

        self.buf.clear();
        let limit = self.max_line as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if n as u64 == limit && self.buf.last() != Some(&b'\n') {
            self.skip_rest_of_line().await?;
            return Ok(Some(Err(McpError::MalformedFrame(format!(
                "line exceeds {} bytes",
                self.max_line
            )))));
        }

        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(Ok(line.trim_end_matches(['\r', '\n']).to_string())))
    }

    async fn skip_rest_of_line(&mut self) -> std::io::Result<()> {
        loop {
            self.buf.clear();
            let n = (&mut self.reader)
                .take(8 * 1024)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 || self.buf.last() == Some(&b'\n') {
                return Ok(());
            }
        }
    }

    async fn read_framed_body(
        &mut self,
        length: &str,
    ) -> std::io::Result<Result<Option<serde_json::Value>, McpError>> {
        let length: usize = match length.trim().parse() {
            Ok(n) if n <= MAX_FRAME_BYTES => n,
            Ok(n) => {
                return Ok(Err(McpError::MalformedFrame(format!(
                    "frame of {n} bytes exceeds limit"
                ))));
            }
            Err(_) => {
                return Ok(Err(McpError::MalformedFrame(format!(
                    "bad Content-Length value {length:?}"
                ))));
            }
        };

        // Remaining header lines up to the blank separator.
        loop {
            let line = match self.read_line().await? {
                None => {
                    return Ok(Err(McpError::MalformedFrame(
                        "stream ended inside header block".into(),
                    )));
                }
                Some(Err(e)) => return Ok(Err(e)),
                Some(Ok(line)) => line,
            };
            if line.trim().is_empty() {
                break;
            }
            if !is_header_line(&line) {
                // Not part of this frame; decode it on the next pass.
                self.pending = Some(line);
                return Ok(Err(McpError::MalformedFrame(
                    "header block not terminated by a blank line".into(),
                )));
            }
        }

        let mut body = vec![0u8; length];
        match self.reader.read_exact(&mut body).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(Err(McpError::MalformedFrame(format!(
                    "truncated body, expected {length} bytes"
                ))));
            }
            Err(e) => return Err(e),
        }

        let parsed = serde_json::from_slice::<serde_json::Value>(body.trim_ascii())
            .map(Some)
            .map_err(|e| McpError::MalformedFrame(format!("invalid JSON body: {e}")));
        Ok(parsed)
    }
}

/// `Name: value` with a token-shaped name.
fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        }
        None => false,
    }
}

/// Case-insensitive header prefix match; returns the value part.
fn strip_header<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let head = line.get(..name.len())?;
    head.eq_ignore_ascii_case(name).then(|| &line[name.len()..])
}
