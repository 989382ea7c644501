//! The request handler seam and the built-in motion service.

use crate::session::ConnectionId;
use protocol_motion::{
    ControllerDataFrame, Request, RequestBody, Response, ResponseBody, ResultCode,
};
use std::collections::HashMap;

/// Maps client requests to responses.
///
/// Invoked synchronously on the event-loop thread; implementations must not
/// block on unbounded I/O.
pub trait RequestHandler {
    /// Handle one request from the given connection.
    fn handle_request(&mut self, connection_id: ConnectionId, request: &Request) -> Response;

    /// Called after a session stops, so per-connection state can be dropped.
    fn handle_connection_stopped(&mut self, _connection_id: ConnectionId) {}
}

impl<F> RequestHandler for F
where
    F: FnMut(ConnectionId, &Request) -> Response,
{
    fn handle_request(&mut self, connection_id: ConnectionId, request: &Request) -> Response {
        self(connection_id, request)
    }
}

struct StreamState {
    controller_id: i32,
    sequence_num: u32,
    rumble: u8,
}

/// Built-in request handler backed by synthetic controller state.
///
/// Stands in for a physical device layer: sessions that start a data stream
/// get generated telemetry from [`pump`](MotionService::pump), which the
/// server binary feeds through `send_controller_data_frame` every tick.
pub struct MotionService {
    controller_count: u32,
    streams: HashMap<ConnectionId, StreamState>,
}

impl MotionService {
    pub fn new(controller_count: u32) -> Self {
        Self {
            controller_count,
            streams: HashMap::new(),
        }
    }

    /// Number of sessions with an active data stream.
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Produce the next telemetry frame for every active stream.
    pub fn pump(&mut self) -> Vec<(ConnectionId, ControllerDataFrame)> {
        let mut frames: Vec<_> = self
            .streams
            .iter_mut()
            .map(|(&connection_id, state)| {
                state.sequence_num += 1;
                let t = state.sequence_num as f32 * 0.01;
                (
                    connection_id,
                    ControllerDataFrame {
                        controller_id: state.controller_id,
                        sequence_num: state.sequence_num,
                        buttons: 0,
                        trigger: state.rumble,
                        position: [t.sin() * 0.25, 1.0, t.cos() * 0.25],
                        orientation: [1.0, 0.0, 0.0, 0.0],
                        extension: Vec::new(),
                    },
                )
            })
            .collect();
        frames.sort_by_key(|(connection_id, _)| *connection_id);
        frames
    }

    fn valid_controller(&self, controller_id: i32) -> bool {
        controller_id >= 0 && (controller_id as u32) < self.controller_count
    }
}

impl RequestHandler for MotionService {
    fn handle_request(&mut self, connection_id: ConnectionId, request: &Request) -> Response {
        match request.body {
            RequestBody::GetControllerCount => Response {
                request_id: request.request_id,
                result: ResultCode::Ok,
                body: ResponseBody::ControllerCount {
                    count: self.controller_count,
                },
            },
            RequestBody::StartControllerDataStream { controller_id } => {
                if !self.valid_controller(controller_id) {
                    return Response::error(request.request_id);
                }
                self.streams.insert(
                    connection_id,
                    StreamState {
                        controller_id,
                        sequence_num: 0,
                        rumble: 0,
                    },
                );
                Response::ack(request.request_id)
            }
            RequestBody::StopControllerDataStream { controller_id } => {
                if !self.valid_controller(controller_id) {
                    return Response::error(request.request_id);
                }
                self.streams.remove(&connection_id);
                Response::ack(request.request_id)
            }
            RequestBody::SetControllerRumble {
                controller_id,
                rumble,
            } => {
                if !self.valid_controller(controller_id) {
                    return Response::error(request.request_id);
                }
                if let Some(state) = self.streams.get_mut(&connection_id)
                    && state.controller_id == controller_id
                {
                    state.rumble = rumble;
                }
                Response::ack(request.request_id)
            }
            RequestBody::ResetControllerPose { controller_id } => {
                if !self.valid_controller(controller_id) {
                    return Response::error(request.request_id);
                }
                // Synthetic state carries no persistent pose to reset
                Response::ack(request.request_id)
            }
        }
    }

    fn handle_connection_stopped(&mut self, connection_id: ConnectionId) {
        self.streams.remove(&connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_count() {
        let mut service = MotionService::new(3);
        let response = service.handle_request(
            0,
            &Request {
                request_id: 5,
                body: RequestBody::GetControllerCount,
            },
        );
        assert_eq!(response.request_id, 5);
        assert_eq!(response.result, ResultCode::Ok);
        assert_eq!(response.body, ResponseBody::ControllerCount { count: 3 });
    }

    #[test]
    fn test_start_stream_and_pump() {
        let mut service = MotionService::new(1);
        let response = service.handle_request(
            7,
            &Request {
                request_id: 1,
                body: RequestBody::StartControllerDataStream { controller_id: 0 },
            },
        );
        assert_eq!(response.result, ResultCode::Ok);
        assert_eq!(service.active_streams(), 1);

        let frames = service.pump();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 7);
        assert_eq!(frames[0].1.sequence_num, 1);

        let frames = service.pump();
        assert_eq!(frames[0].1.sequence_num, 2);
    }

    #[test]
    fn test_unknown_controller_rejected() {
        let mut service = MotionService::new(1);
        let response = service.handle_request(
            0,
            &Request {
                request_id: 2,
                body: RequestBody::StartControllerDataStream { controller_id: 9 },
            },
        );
        assert_eq!(response.result, ResultCode::Error);
        assert_eq!(service.active_streams(), 0);
    }

    #[test]
    fn test_connection_stopped_clears_stream() {
        let mut service = MotionService::new(1);
        service.handle_request(
            3,
            &Request {
                request_id: 1,
                body: RequestBody::StartControllerDataStream { controller_id: 0 },
            },
        );
        assert_eq!(service.active_streams(), 1);

        service.handle_connection_stopped(3);
        assert_eq!(service.active_streams(), 0);
    }

    #[test]
    fn test_closure_handler() {
        let mut handler = |_: ConnectionId, request: &Request| Response::ack(request.request_id);
        let response = handler.handle_request(
            0,
            &Request {
                request_id: 9,
                body: RequestBody::GetControllerCount,
            },
        );
        assert_eq!(response, Response::ack(9));
    }
}
