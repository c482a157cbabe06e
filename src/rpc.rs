//! JSON-RPC framing for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout. The
//! server side is handled by tower-lsp; this module provides the same framing
//! for clients: [`encode_message`] and [`decode_message`] for whole buffers,
//! and [`FrameReader`] / [`FrameWriter`] for async streams.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no header separator found")]
    MissingSeparator,

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    TooLarge(usize),

    #[error("frame body truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded frame borrowed from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// The `method` field, present on requests and notifications.
    pub method: Option<String>,
    /// Exactly `Content-Length` bytes of JSON.
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Total encoded size of this frame, header included.
    pub fn encoded_len(&self) -> usize {
        format!("Content-Length: {}", self.payload.len()).len()
            + HEADER_SEPARATOR.len()
            + self.payload.len()
    }
}

/// Serialize `message` and prepend its `Content-Length` header.
///
/// The length counts bytes, not characters.
pub fn encode_message<T: Serialize>(message: &T) -> Result<String, RpcError> {
    let body = serde_json::to_string(message)?;
    Ok(format!("Content-Length: {}\r\n\r\n{body}", body.len()))
}

/// Decode the first frame in `bytes`.
///
/// Bytes after the frame are ignored, so a buffer holding several frames can
/// be walked with [`Frame::encoded_len`].
pub fn decode_message(bytes: &[u8]) -> Result<Frame<'_>, RpcError> {
    let separator = bytes
        .windows(HEADER_SEPARATOR.len())
        .position(|window| window == HEADER_SEPARATOR)
        .ok_or(RpcError::MissingSeparator)?;

    let headers = String::from_utf8_lossy(&bytes[..separator]);
    let mut content_length = None;
    for line in headers.split("\r\n") {
        if let Some(len) = parse_content_length(line)? {
            content_length = Some(len);
        }
    }
    let content_length = content_length.ok_or(RpcError::MissingContentLength)?;
    if content_length > MAX_FRAME_BYTES {
        return Err(RpcError::TooLarge(content_length));
    }

    let body = &bytes[separator + HEADER_SEPARATOR.len()..];
    if body.len() < content_length {
        return Err(RpcError::Truncated {
            expected: content_length,
            actual: body.len(),
        });
    }
    let payload = &body[..content_length];

    #[derive(Deserialize)]
    struct Envelope {
        method: Option<String>,
    }
    let envelope: Envelope = serde_json::from_slice(payload)?;

    Ok(Frame {
        method: envelope.method,
        payload,
    })
}

/// Parse one header line. Returns `Ok(None)` for headers other than
/// `Content-Length`, which is matched case-insensitively.
fn parse_content_length(line: &str) -> Result<Option<usize>, RpcError> {
    let Some((key, value)) = line.trim().split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| RpcError::InvalidContentLength(value.to_string()))
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on EOF (clean shutdown).
    /// Returns `Err` on malformed headers or oversized frames.
    pub async fn read_frame(&mut self) -> anyhow::Result<Option<serde_json::Value>> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(RpcError::TooLarge(content_length).into());
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> anyhow::Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                // EOF is clean only between frames.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }
            saw_any_header_bytes = true;

            if line.trim().is_empty() {
                break;
            }

            if let Some(len) = parse_content_length(&line)? {
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(RpcError::MissingContentLength.into()),
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header.
    pub async fn write_frame<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let frame = encode_message(msg)?;
        self.writer
            .write_all(frame.as_bytes())
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
