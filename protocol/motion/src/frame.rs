//! Length-prefixed framing shared by the stream and datagram transports.
//!
//! Every framed message is `[header][body]` where the header is a
//! little-endian `u16` holding the body length. Stream messages may carry up
//! to [`MAX_MESSAGE_SIZE`] bytes of body; a telemetry datagram carries at
//! most [`MAX_DATA_FRAME_MESSAGE_SIZE`] so the whole packet stays under a
//! conservative MTU. Oversized dataframes are never fragmented - the caller
//! drops them.

use bytes::BufMut;

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 2;

/// Largest body accepted on the stream transport.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Largest body accepted in a single telemetry datagram.
///
/// Header plus body stays well under the common 1500-byte path MTU.
pub const MAX_DATA_FRAME_MESSAGE_SIZE: usize = 1024;

/// Framing error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer than [`HEADER_SIZE`] bytes were available.
    #[error("frame header truncated")]
    Truncated,
    /// The declared or actual body length exceeds the transport limit.
    #[error("body length {len} exceeds limit {limit}")]
    Oversized { len: usize, limit: usize },
}

/// Decode a stream frame header, returning the body length.
///
/// Lengths above [`MAX_MESSAGE_SIZE`] are rejected; the session treats that
/// as fatal.
pub fn decode_header(header: &[u8]) -> Result<usize, FrameError> {
    if header.len() < HEADER_SIZE {
        return Err(FrameError::Truncated);
    }
    let len = u16::from_le_bytes([header[0], header[1]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::Oversized {
            len,
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(len)
}

/// Frame a message body for the stream transport.
pub fn pack_message(body: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    pack(body, MAX_MESSAGE_SIZE, out)
}

/// Frame a message body for a single telemetry datagram.
pub fn pack_datagram(body: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
    pack(body, MAX_DATA_FRAME_MESSAGE_SIZE, out)
}

fn pack(body: &[u8], limit: usize, out: &mut Vec<u8>) -> Result<(), FrameError> {
    if body.len() > limit {
        return Err(FrameError::Oversized {
            len: body.len(),
            limit,
        });
    }
    out.reserve(HEADER_SIZE + body.len());
    out.put_u16_le(body.len() as u16);
    out.extend_from_slice(body);
    Ok(())
}

/// Split a complete frame into its body slice.
///
/// The buffer must hold the header and the full declared body.
pub fn unpack(buf: &[u8]) -> Result<&[u8], FrameError> {
    let len = decode_header(buf)?;
    if buf.len() < HEADER_SIZE + len {
        return Err(FrameError::Truncated);
    }
    Ok(&buf[HEADER_SIZE..HEADER_SIZE + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_unpack() {
        let mut buf = Vec::new();
        pack_message(b"hello", &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[5, 0]);
        assert_eq!(unpack(&buf).unwrap(), b"hello");
    }

    #[test]
    fn test_pack_empty_body() {
        let mut buf = Vec::new();
        pack_message(b"", &mut buf).unwrap();
        assert_eq!(buf, vec![0, 0]);
        assert_eq!(decode_header(&buf).unwrap(), 0);
    }

    #[test]
    fn test_decode_header_truncated() {
        assert_eq!(decode_header(&[]), Err(FrameError::Truncated));
        assert_eq!(decode_header(&[1]), Err(FrameError::Truncated));
    }

    #[test]
    fn test_decode_header_oversized() {
        let header = (MAX_MESSAGE_SIZE as u16 + 1).to_le_bytes();
        assert_eq!(
            decode_header(&header),
            Err(FrameError::Oversized {
                len: MAX_MESSAGE_SIZE + 1,
                limit: MAX_MESSAGE_SIZE,
            })
        );
    }

    #[test]
    fn test_decode_header_at_limit() {
        let header = (MAX_MESSAGE_SIZE as u16).to_le_bytes();
        assert_eq!(decode_header(&header).unwrap(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_pack_datagram_at_limit() {
        let body = vec![0xAB; MAX_DATA_FRAME_MESSAGE_SIZE];
        let mut buf = Vec::new();
        pack_datagram(&body, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + MAX_DATA_FRAME_MESSAGE_SIZE);
    }

    #[test]
    fn test_pack_datagram_one_over_limit() {
        let body = vec![0xAB; MAX_DATA_FRAME_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();
        assert_eq!(
            pack_datagram(&body, &mut buf),
            Err(FrameError::Oversized {
                len: MAX_DATA_FRAME_MESSAGE_SIZE + 1,
                limit: MAX_DATA_FRAME_MESSAGE_SIZE,
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unpack_incomplete_body() {
        let mut buf = Vec::new();
        pack_message(b"hello", &mut buf).unwrap();
        buf.pop();
        assert_eq!(unpack(&buf), Err(FrameError::Truncated));
    }
}
