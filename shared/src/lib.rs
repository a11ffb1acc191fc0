//! Wire framing shared by the chat server and client
//!
//! Every unit on the wire is a frame: a fixed-width ASCII header holding the
//! payload length in decimal, followed by exactly that many payload bytes.
//!
//! ```text
//! +----------------------+---------------------------+
//! | "5         " (10 B)  | "alice"                   |
//! +----------------------+---------------------------+
//! ```
//!
//! Clients send one frame for their username and one frame per message. The
//! server relays each message as `username frame || message frame` in a
//! single write, reusing the raw header bytes it received.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default header width in bytes
pub const HEADER_LENGTH: usize = 10;

/// Widest header whose value still fits in a `u64`
const MAX_HEADER_WIDTH: usize = 20;

/// Largest length a header of `width` decimal digits can express
fn header_capacity(width: usize) -> u64 {
    10u64
        .checked_pow(width as u32)
        .map_or(u64::MAX, |bound| bound - 1)
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error while reading frame: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid frame header {header:?}")]
    InvalidHeader { header: String },

    #[error("connection closed mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    #[error("payload of {len} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: u64 },

    #[error("unsupported header width {0}")]
    UnsupportedHeaderWidth(usize),
}

/// A length-prefixed message unit
///
/// The header is kept exactly as received so relaying a frame never has to
/// re-encode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: Vec<u8>,
    payload: Vec<u8>,
}

impl Frame {
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Payload as text, replacing invalid UTF-8 (for logging and display)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Appends header and payload to `buf`
    pub fn write_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.payload);
    }

    /// Header followed by payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header.len() + self.payload.len());
        self.write_into(&mut buf);
        buf
    }
}

/// Builds the single write the server pushes to each recipient of a message
pub fn encode_broadcast(username: &Frame, message: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        username.header.len() + username.payload.len() + message.header.len() + message.payload.len(),
    );
    username.write_into(&mut buf);
    message.write_into(&mut buf);
    buf
}

/// Encoder/decoder for a given header width and optional payload limit
///
/// Without an explicit limit, any length the header can express is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_width: usize,
    max_payload: Option<usize>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            header_width: HEADER_LENGTH,
            max_payload: None,
        }
    }
}

impl FrameCodec {
    pub fn new(header_width: usize, max_payload: Option<usize>) -> Result<Self, FrameError> {
        if header_width == 0 || header_width > MAX_HEADER_WIDTH {
            return Err(FrameError::UnsupportedHeaderWidth(header_width));
        }
        Ok(Self {
            header_width,
            max_payload,
        })
    }

    pub fn header_width(&self) -> usize {
        self.header_width
    }

    pub fn max_payload(&self) -> Option<usize> {
        self.max_payload
    }

    /// Largest payload length this codec encodes or accepts
    pub fn limit(&self) -> u64 {
        let capacity = header_capacity(self.header_width);
        match self.max_payload {
            Some(max) => capacity.min(max as u64),
            None => capacity,
        }
    }

    /// Wraps `payload` in a frame with a left-aligned, space-padded header
    pub fn encode(&self, payload: &[u8]) -> Result<Frame, FrameError> {
        let len = payload.len() as u64;
        if len > self.limit() {
            return Err(FrameError::PayloadTooLarge {
                len,
                max: self.limit(),
            });
        }

        let header = format!("{:<width$}", len, width = self.header_width).into_bytes();
        Ok(Frame {
            header,
            payload: payload.to_vec(),
        })
    }

    /// Parses a raw header into a payload length
    ///
    /// Surrounding whitespace is ignored, so both left- and right-aligned
    /// headers are accepted.
    pub fn decode_header(&self, header: &[u8]) -> Result<usize, FrameError> {
        let invalid = || FrameError::InvalidHeader {
            header: String::from_utf8_lossy(header).into_owned(),
        };

        if header.len() != self.header_width {
            return Err(invalid());
        }

        let len: u64 = std::str::from_utf8(header)
            .map_err(|_| invalid())?
            .trim()
            .parse()
            .map_err(|_| invalid())?;

        let too_large = || FrameError::PayloadTooLarge {
            len,
            max: self.limit(),
        };
        if len > self.limit() {
            return Err(too_large());
        }

        usize::try_from(len).map_err(|_| too_large())
    }

    /// Reads one frame from `reader`
    ///
    /// Returns `Ok(None)` when the peer closed the stream before sending any
    /// header byte. Short reads are retried until the header and the whole
    /// payload have arrived. The payload buffer grows with the bytes that
    /// actually arrive, not with the length the header claims.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = vec![0u8; self.header_width];
        let received = fill(reader, &mut header).await?;
        if received == 0 {
            return Ok(None);
        }
        if received < header.len() {
            return Err(FrameError::Truncated {
                expected: header.len(),
                received,
            });
        }

        let len = self.decode_header(&header)?;

        let mut payload = Vec::new();
        let received = (&mut *reader)
            .take(len as u64)
            .read_to_end(&mut payload)
            .await?;
        if received < len {
            return Err(FrameError::Truncated {
                expected: len,
                received,
            });
        }

        Ok(Some(Frame { header, payload }))
    }
}

/// Reads until `buf` is full or the stream ends, returning bytes read
async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
