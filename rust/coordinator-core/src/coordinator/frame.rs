//! Length-prefixed JSON framing.
//!
//! A frame is the payload's UTF-8 byte length rendered as eight uppercase
//! hexadecimal digits, immediately followed by the JSON payload:
//!
//! ```text
//! 00000012{"response":"ack"}
//! ```
//!
//! Exactly one frame flows in each direction per connection.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Width of the hexadecimal length header.
pub const HEADER_LEN: usize = 8;

/// Largest length the header can express.
pub const MAX_FRAME_LENGTH: u32 = u32::MAX;

/// Errors raised while reading or writing a frame.
///
/// Any of these leaves the stream in an untrusted state: the connection is
/// closed without a reply.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid length header {0:?}")]
    InvalidHeader(String),
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("connection closed after {received} of {expected} bytes")]
    Truncated { received: usize, expected: usize },
    #[error("timed out waiting for a frame")]
    Timeout,
}

/// Codec for coordinator frames.
///
/// Decoding yields the raw JSON value; interpreting it as a request is left
/// to the dispatcher so that a well-formed frame with unexpected fields can
/// still be answered.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: u64,
    /// Payload length announced by a header that has already been consumed.
    pending: Option<usize>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_bytes: u64::from(MAX_FRAME_LENGTH),
            pending: None,
        }
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_bytes(max_frame_bytes: u64) -> Self {
        Self {
            max_frame_bytes: max_frame_bytes.min(u64::from(MAX_FRAME_LENGTH)),
            pending: None,
        }
    }
}

fn parse_header(header: &[u8]) -> Result<u64, FrameError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| FrameError::InvalidHeader(String::from_utf8_lossy(header).into_owned()))?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FrameError::InvalidHeader(text.to_string()));
    }
    u64::from_str_radix(text, 16).map_err(|_| FrameError::InvalidHeader(text.to_string()))
}

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.pending {
            Some(len) => len,
            None => {
                if src.len() < HEADER_LEN {
                    src.reserve(HEADER_LEN - src.len());
                    return Ok(None);
                }

                let declared = parse_header(&src[..HEADER_LEN])?;
                if declared > self.max_frame_bytes {
                    return Err(FrameError::TooLarge {
                        size: declared,
                        max: self.max_frame_bytes,
                    });
                }

                src.advance(HEADER_LEN);
                let len = usize::try_from(declared).map_err(|_| FrameError::TooLarge {
                    size: declared,
                    max: self.max_frame_bytes,
                })?;
                self.pending = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(len);
        let value = serde_json::from_slice(&payload).map_err(FrameError::InvalidJson)?;
        Ok(Some(value))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(FrameError::Truncated {
                received: buf.len(),
                expected: self.pending.unwrap_or(HEADER_LEN),
            }),
        }
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item).map_err(FrameError::InvalidJson)?;
        let size = payload.len() as u64;
        if size > u64::from(MAX_FRAME_LENGTH) {
            return Err(FrameError::TooLarge {
                size,
                max: u64::from(MAX_FRAME_LENGTH),
            });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(format!("{size:08X}").as_bytes());
        dst.put_slice(&payload);
        Ok(())
    }
}

/// Encode a single value as a complete frame.
pub fn encode_frame<T: Serialize>(item: &T) -> Result<BytesMut, FrameError> {
    let mut dst = BytesMut::new();
    FrameCodec::new().encode(item, &mut dst)?;
    Ok(dst)
}

/// Decode one frame from the front of `bytes`.
///
/// Returns `Ok(None)` while the frame is incomplete. Bytes past the declared
/// length are ignored.
pub fn decode_frame(bytes: &[u8]) -> Result<Option<Value>, FrameError> {
    let mut src = BytesMut::from(bytes);
    FrameCodec::new().decode(&mut src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_is_uppercase_zero_padded_hex() {
        let payload = json!({"response": "wait", "pad": "x".repeat(200)});
        let frame = encode_frame(&payload).unwrap();

        let body = serde_json::to_vec(&payload).unwrap();
        let expected = format!("{:08X}", body.len());
        assert_eq!(&frame[..HEADER_LEN], expected.as_bytes());
        assert!(expected.chars().all(|c| !c.is_ascii_lowercase()));
        assert_eq!(&frame[HEADER_LEN..], &body[..]);
    }

    #[test]
    fn test_header_counts_utf8_bytes() {
        let frame = encode_frame(&json!("é")).unwrap();
        // "\"é\"" is four bytes: two quotes and a two-byte code point
        assert_eq!(&frame[..HEADER_LEN], b"00000004");
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let frame = encode_frame(&json!({"request": "group_data"})).unwrap();
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[5..12]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[12..]);
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, json!({"request": "group_data"}));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = encode_frame(&json!({"a": 1})).unwrap().to_vec();
        bytes.extend_from_slice(b"garbage after the frame");

        let value = decode_frame(&bytes).unwrap().unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_decode_accepts_lowercase_header() {
        let body = br#"{"padding":"0123456789ab"}"#;
        let mut bytes = format!("{:08x}", body.len()).into_bytes();
        bytes.extend_from_slice(body);
        assert!(decode_frame(&bytes).unwrap().is_some());
    }

    #[test]
    fn test_decode_rejects_non_hex_header() {
        let result = decode_frame(b"hello!!!{}");
        assert!(matches!(result, Err(FrameError::InvalidHeader(_))));

        let result = decode_frame(b"+0000002{}");
        assert!(matches!(result, Err(FrameError::InvalidHeader(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let result = decode_frame(b"00000005{oops");
        assert!(matches!(result, Err(FrameError::InvalidJson(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_declaration() {
        let mut codec = FrameCodec::with_max_frame_bytes(16);
        let mut buf = BytesMut::from(&b"00000011{}"[..]);
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(FrameError::TooLarge { size: 17, max: 16 })));
    }

    #[test]
    fn test_decode_eof_reports_truncation() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"00000010{\"a\""[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let result = codec.decode_eof(&mut buf);
        assert!(matches!(
            result,
            Err(FrameError::Truncated { received: 4, expected: 16 })
        ));
    }

    #[test]
    fn test_decode_eof_on_empty_stream() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }
}
