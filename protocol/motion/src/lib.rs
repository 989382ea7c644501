//! Wire messages for the motiond telemetry protocol.
//!
//! Three message families travel between client and server:
//!
//! - [`Request`] — client-to-server RPC over the TCP stream
//! - [`Response`] — server-to-client reply or notification over the TCP stream
//! - [`ControllerDataFrame`] — server-to-client telemetry over UDP
//!
//! All fields are little-endian fixed-width values with a single leading tag
//! byte for enum payloads. Messages encode into a caller-provided buffer and
//! parse from a complete body slice (framing is handled by [`frame`]).
//!
//! # Example
//!
//! ```
//! use protocol_motion::{Request, RequestBody};
//!
//! let request = Request {
//!     request_id: 7,
//!     body: RequestBody::GetControllerCount,
//! };
//!
//! let mut buf = Vec::new();
//! request.encode(&mut buf);
//!
//! let parsed = Request::parse(&buf).unwrap();
//! assert_eq!(parsed, request);
//! ```

pub mod frame;

use bytes::{Buf, BufMut};

/// The `request_id` value that marks a [`Response`] as a server-initiated
/// notification rather than a reply to a client request.
pub const NOTIFICATION_REQUEST_ID: i32 = -1;

/// Parse error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The body ended before the message was complete.
    #[error("truncated message body")]
    Truncated,
    /// An unrecognized tag byte.
    #[error("unknown tag: {0}")]
    UnknownTag(u8),
    /// Bytes remained after a complete message.
    #[error("trailing bytes after message body")]
    TrailingBytes,
}

/// A client request carried on the TCP stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Client-chosen correlation id, echoed back in the response.
    pub request_id: i32,
    /// The operation being requested.
    pub body: RequestBody,
}

/// The operation carried by a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBody {
    /// How many controllers is the server tracking?
    GetControllerCount,
    /// Begin streaming telemetry for a controller to this connection.
    StartControllerDataStream { controller_id: i32 },
    /// Stop streaming telemetry to this connection.
    StopControllerDataStream { controller_id: i32 },
    /// Set the rumble intensity on a controller.
    SetControllerRumble { controller_id: i32, rumble: u8 },
    /// Re-zero the pose estimate for a controller.
    ResetControllerPose { controller_id: i32 },
}

mod request_tag {
    pub const GET_CONTROLLER_COUNT: u8 = 0;
    pub const START_CONTROLLER_DATA_STREAM: u8 = 1;
    pub const STOP_CONTROLLER_DATA_STREAM: u8 = 2;
    pub const SET_CONTROLLER_RUMBLE: u8 = 3;
    pub const RESET_CONTROLLER_POSE: u8 = 4;
}

impl Request {
    /// Returns the encoded length of this request.
    pub fn encoded_len(&self) -> usize {
        4 + 1
            + match self.body {
                RequestBody::GetControllerCount => 0,
                RequestBody::StartControllerDataStream { .. } => 4,
                RequestBody::StopControllerDataStream { .. } => 4,
                RequestBody::SetControllerRumble { .. } => 5,
                RequestBody::ResetControllerPose { .. } => 4,
            }
    }

    /// Append the encoded request to the buffer.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.request_id);
        match self.body {
            RequestBody::GetControllerCount => {
                buf.put_u8(request_tag::GET_CONTROLLER_COUNT);
            }
            RequestBody::StartControllerDataStream { controller_id } => {
                buf.put_u8(request_tag::START_CONTROLLER_DATA_STREAM);
                buf.put_i32_le(controller_id);
            }
            RequestBody::StopControllerDataStream { controller_id } => {
                buf.put_u8(request_tag::STOP_CONTROLLER_DATA_STREAM);
                buf.put_i32_le(controller_id);
            }
            RequestBody::SetControllerRumble {
                controller_id,
                rumble,
            } => {
                buf.put_u8(request_tag::SET_CONTROLLER_RUMBLE);
                buf.put_i32_le(controller_id);
                buf.put_u8(rumble);
            }
            RequestBody::ResetControllerPose { controller_id } => {
                buf.put_u8(request_tag::RESET_CONTROLLER_POSE);
                buf.put_i32_le(controller_id);
            }
        }
    }

    /// Parse a request from a complete body slice.
    pub fn parse(mut body: &[u8]) -> Result<Self, ParseError> {
        if body.remaining() < 5 {
            return Err(ParseError::Truncated);
        }
        let request_id = body.get_i32_le();
        let tag = body.get_u8();

        let parsed = match tag {
            request_tag::GET_CONTROLLER_COUNT => RequestBody::GetControllerCount,
            request_tag::START_CONTROLLER_DATA_STREAM => RequestBody::StartControllerDataStream {
                controller_id: get_i32(&mut body)?,
            },
            request_tag::STOP_CONTROLLER_DATA_STREAM => RequestBody::StopControllerDataStream {
                controller_id: get_i32(&mut body)?,
            },
            request_tag::SET_CONTROLLER_RUMBLE => RequestBody::SetControllerRumble {
                controller_id: get_i32(&mut body)?,
                rumble: get_u8(&mut body)?,
            },
            request_tag::RESET_CONTROLLER_POSE => RequestBody::ResetControllerPose {
                controller_id: get_i32(&mut body)?,
            },
            other => return Err(ParseError::UnknownTag(other)),
        };

        if body.has_remaining() {
            return Err(ParseError::TrailingBytes);
        }

        Ok(Self {
            request_id,
            body: parsed,
        })
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    /// The request succeeded.
    Ok = 0,
    /// The request failed.
    Error = 1,
    /// The request was superseded before it completed.
    Canceled = 2,
}

impl ResultCode {
    fn from_u8(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(ResultCode::Ok),
            1 => Ok(ResultCode::Error),
            2 => Ok(ResultCode::Canceled),
            other => Err(ParseError::UnknownTag(other)),
        }
    }
}

/// A server reply or notification carried on the TCP stream.
///
/// A `request_id` of [`NOTIFICATION_REQUEST_ID`] marks a notification:
/// a message the server initiated with no correlated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub request_id: i32,
    pub result: ResultCode,
    pub body: ResponseBody,
}

/// The payload carried by a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseBody {
    /// Bare acknowledgement, no payload.
    Ack,
    /// First message on every stream: the id the client must echo over
    /// UDP to pair its datagram endpoint with this session.
    ConnectionInfo { tcp_connection_id: i32 },
    /// Reply to `GetControllerCount`.
    ControllerCount { count: u32 },
}

mod response_tag {
    pub const ACK: u8 = 0;
    pub const CONNECTION_INFO: u8 = 1;
    pub const CONTROLLER_COUNT: u8 = 2;
}

impl Response {
    /// The unsolicited first message of a stream session.
    pub fn connection_info(tcp_connection_id: i32) -> Self {
        Self {
            request_id: NOTIFICATION_REQUEST_ID,
            result: ResultCode::Ok,
            body: ResponseBody::ConnectionInfo { tcp_connection_id },
        }
    }

    /// A successful acknowledgement for the given request.
    pub fn ack(request_id: i32) -> Self {
        Self {
            request_id,
            result: ResultCode::Ok,
            body: ResponseBody::Ack,
        }
    }

    /// A failure acknowledgement for the given request.
    pub fn error(request_id: i32) -> Self {
        Self {
            request_id,
            result: ResultCode::Error,
            body: ResponseBody::Ack,
        }
    }

    /// Returns true if this response is a server-initiated notification.
    pub fn is_notification(&self) -> bool {
        self.request_id == NOTIFICATION_REQUEST_ID
    }

    /// Returns the encoded length of this response.
    pub fn encoded_len(&self) -> usize {
        4 + 1
            + 1
            + match self.body {
                ResponseBody::Ack => 0,
                ResponseBody::ConnectionInfo { .. } => 4,
                ResponseBody::ControllerCount { .. } => 4,
            }
    }

    /// Append the encoded response to the buffer.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.request_id);
        buf.put_u8(self.result as u8);
        match self.body {
            ResponseBody::Ack => {
                buf.put_u8(response_tag::ACK);
            }
            ResponseBody::ConnectionInfo { tcp_connection_id } => {
                buf.put_u8(response_tag::CONNECTION_INFO);
                buf.put_i32_le(tcp_connection_id);
            }
            ResponseBody::ControllerCount { count } => {
                buf.put_u8(response_tag::CONTROLLER_COUNT);
                buf.put_u32_le(count);
            }
        }
    }

    /// Parse a response from a complete body slice.
    pub fn parse(mut body: &[u8]) -> Result<Self, ParseError> {
        if body.remaining() < 6 {
            return Err(ParseError::Truncated);
        }
        let request_id = body.get_i32_le();
        let result = ResultCode::from_u8(body.get_u8())?;
        let tag = body.get_u8();

        let parsed = match tag {
            response_tag::ACK => ResponseBody::Ack,
            response_tag::CONNECTION_INFO => ResponseBody::ConnectionInfo {
                tcp_connection_id: get_i32(&mut body)?,
            },
            response_tag::CONTROLLER_COUNT => ResponseBody::ControllerCount {
                count: get_u32(&mut body)?,
            },
            other => return Err(ParseError::UnknownTag(other)),
        };

        if body.has_remaining() {
            return Err(ParseError::TrailingBytes);
        }

        Ok(Self {
            request_id,
            result,
            body: parsed,
        })
    }
}

/// One telemetry sample for a single controller, carried over UDP.
///
/// `extension` is an opaque trailing blob for forward-compatible payload
/// growth; the server never interprets it.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerDataFrame {
    pub controller_id: i32,
    pub sequence_num: u32,
    /// Button state bitfield.
    pub buttons: u32,
    /// Analog trigger position, 0-255.
    pub trigger: u8,
    /// Position in meters, tracker space.
    pub position: [f32; 3],
    /// Orientation quaternion (w, x, y, z).
    pub orientation: [f32; 4],
    pub extension: Vec<u8>,
}

/// Encoded size of the fixed portion of a dataframe.
const DATA_FRAME_FIXED_LEN: usize = 4 + 4 + 4 + 1 + 12 + 16;

impl ControllerDataFrame {
    /// Returns the encoded length of this frame.
    pub fn encoded_len(&self) -> usize {
        DATA_FRAME_FIXED_LEN + self.extension.len()
    }

    /// Append the encoded frame to the buffer.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.controller_id);
        buf.put_u32_le(self.sequence_num);
        buf.put_u32_le(self.buttons);
        buf.put_u8(self.trigger);
        for v in self.position {
            buf.put_f32_le(v);
        }
        for v in self.orientation {
            buf.put_f32_le(v);
        }
        buf.extend_from_slice(&self.extension);
    }

    /// Parse a frame from a complete body slice.
    ///
    /// Everything past the fixed portion is taken as the extension blob.
    pub fn parse(mut body: &[u8]) -> Result<Self, ParseError> {
        if body.remaining() < DATA_FRAME_FIXED_LEN {
            return Err(ParseError::Truncated);
        }
        let controller_id = body.get_i32_le();
        let sequence_num = body.get_u32_le();
        let buttons = body.get_u32_le();
        let trigger = body.get_u8();
        let mut position = [0.0; 3];
        for v in &mut position {
            *v = body.get_f32_le();
        }
        let mut orientation = [0.0; 4];
        for v in &mut orientation {
            *v = body.get_f32_le();
        }
        Ok(Self {
            controller_id,
            sequence_num,
            buttons,
            trigger,
            position,
            orientation,
            extension: body.to_vec(),
        })
    }
}

fn get_i32(body: &mut &[u8]) -> Result<i32, ParseError> {
    if body.remaining() < 4 {
        return Err(ParseError::Truncated);
    }
    Ok(body.get_i32_le())
}

fn get_u32(body: &mut &[u8]) -> Result<u32, ParseError> {
    if body.remaining() < 4 {
        return Err(ParseError::Truncated);
    }
    Ok(body.get_u32_le())
}

fn get_u8(body: &mut &[u8]) -> Result<u8, ParseError> {
    if body.remaining() < 1 {
        return Err(ParseError::Truncated);
    }
    Ok(body.get_u8())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> ControllerDataFrame {
        ControllerDataFrame {
            controller_id: 2,
            sequence_num: 41,
            buttons: 0b1010,
            trigger: 200,
            position: [0.1, -0.5, 1.25],
            orientation: [1.0, 0.0, 0.0, 0.0],
            extension: Vec::new(),
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let requests = [
            Request {
                request_id: 0,
                body: RequestBody::GetControllerCount,
            },
            Request {
                request_id: 12,
                body: RequestBody::StartControllerDataStream { controller_id: 3 },
            },
            Request {
                request_id: 13,
                body: RequestBody::StopControllerDataStream { controller_id: 3 },
            },
            Request {
                request_id: 14,
                body: RequestBody::SetControllerRumble {
                    controller_id: 1,
                    rumble: 255,
                },
            },
            Request {
                request_id: 15,
                body: RequestBody::ResetControllerPose { controller_id: 0 },
            },
        ];

        for request in requests {
            let mut buf = Vec::new();
            request.encode(&mut buf);
            assert_eq!(buf.len(), request.encoded_len());
            assert_eq!(Request::parse(&buf).unwrap(), request);
        }
    }

    #[test]
    fn test_request_parse_empty_body() {
        assert_eq!(Request::parse(&[]), Err(ParseError::Truncated));
    }

    #[test]
    fn test_request_parse_truncated_field() {
        // StartControllerDataStream with a missing controller_id
        let mut buf = Vec::new();
        buf.put_i32_le(1);
        buf.put_u8(request_tag::START_CONTROLLER_DATA_STREAM);
        buf.put_u8(0xAA);
        assert_eq!(Request::parse(&buf), Err(ParseError::Truncated));
    }

    #[test]
    fn test_request_parse_unknown_tag() {
        let mut buf = Vec::new();
        buf.put_i32_le(1);
        buf.put_u8(0x7F);
        assert_eq!(Request::parse(&buf), Err(ParseError::UnknownTag(0x7F)));
    }

    #[test]
    fn test_request_parse_trailing_bytes() {
        let mut buf = Vec::new();
        Request {
            request_id: 1,
            body: RequestBody::GetControllerCount,
        }
        .encode(&mut buf);
        buf.push(0);
        assert_eq!(Request::parse(&buf), Err(ParseError::TrailingBytes));
    }

    #[test]
    fn test_connection_info_is_notification() {
        let response = Response::connection_info(5);
        assert!(response.is_notification());
        assert_eq!(response.request_id, NOTIFICATION_REQUEST_ID);
        assert_eq!(response.result, ResultCode::Ok);
        assert_eq!(
            response.body,
            ResponseBody::ConnectionInfo {
                tcp_connection_id: 5
            }
        );
    }

    #[test]
    fn test_response_roundtrip() {
        let responses = [
            Response::ack(9),
            Response::error(10),
            Response::connection_info(0),
            Response {
                request_id: 4,
                result: ResultCode::Ok,
                body: ResponseBody::ControllerCount { count: 2 },
            },
            Response {
                request_id: 4,
                result: ResultCode::Canceled,
                body: ResponseBody::Ack,
            },
        ];

        for response in responses {
            let mut buf = Vec::new();
            response.encode(&mut buf);
            assert_eq!(buf.len(), response.encoded_len());
            assert_eq!(Response::parse(&buf).unwrap(), response);
        }
    }

    #[test]
    fn test_response_parse_bad_result_code() {
        let mut buf = Vec::new();
        buf.put_i32_le(1);
        buf.put_u8(99);
        buf.put_u8(response_tag::ACK);
        assert_eq!(Response::parse(&buf), Err(ParseError::UnknownTag(99)));
    }

    #[test]
    fn test_dataframe_roundtrip() {
        let frame = sample_frame();
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), frame.encoded_len());
        assert_eq!(ControllerDataFrame::parse(&buf).unwrap(), frame);
    }

    #[test]
    fn test_dataframe_extension_preserved() {
        let mut frame = sample_frame();
        frame.extension = vec![1, 2, 3, 4, 5];
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        let parsed = ControllerDataFrame::parse(&buf).unwrap();
        assert_eq!(parsed.extension, frame.extension);
    }

    #[test]
    fn test_dataframe_parse_truncated() {
        let mut buf = Vec::new();
        sample_frame().encode(&mut buf);
        buf.truncate(DATA_FRAME_FIXED_LEN - 1);
        assert_eq!(
            ControllerDataFrame::parse(&buf),
            Err(ParseError::Truncated)
        );
    }
}
