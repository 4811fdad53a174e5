//! Transport seam for the renderer connection.
//!
//! A transport moves abstract request/response messages; the wire
//! encoding (if any) is its own business. Two implementations ship with
//! the crate:
//!
//! - [`MoveBufferTransport`]: an in-process pair over a shared buffer.
//!   Entity payloads cross by reference, so `is_move_buffer` transports
//!   skip serialization entirely.
//! - [`RecordingTransport`]: records every request and answers from a
//!   script (or auto-acknowledges), for tests and headless runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use parking_lot::Mutex;

use crate::error::{ExecResult, RuntimeError};

use super::{RdrRequest, RdrResponse, ServerCaps};

/// A renderer connection.
pub trait Transport {
    /// Open the connection and read the server's advertised
    /// capabilities.
    fn handshake(&mut self) -> ExecResult<ServerCaps>;

    /// In-process transports transfer entity ownership by reference.
    fn is_move_buffer(&self) -> bool {
        false
    }

    fn send(&mut self, req: &RdrRequest) -> ExecResult<()>;

    /// Receive the response matching `request_id`. The server guarantees
    /// one response per non-noreturn id.
    fn recv_response(&mut self, request_id: &str, timeout: Duration) -> ExecResult<RdrResponse>;
}

// =============================================================================
// Move-buffer transport
// =============================================================================

struct MoveBufferShared {
    requests: VecDeque<RdrRequest>,
    responses: VecDeque<RdrResponse>,
    /// When set, the buffer acknowledges blocking requests on its own;
    /// otherwise a peer on another thread answers.
    auto_ack: bool,
    next_handle: u64,
    closed: bool,
}

/// Client endpoint of an in-process buffer pair.
pub struct MoveBufferTransport {
    shared: Arc<Mutex<MoveBufferShared>>,
    protocol_version: u32,
}

/// Receiver endpoint: drains requests, pushes responses.
pub struct MoveBufferPeer {
    shared: Arc<Mutex<MoveBufferShared>>,
}

/// Create a connected pair. With `auto_ack`, the client side never
/// blocks on a silent peer (single-threaded tests drive it this way).
pub fn move_buffer_pair(
    protocol_version: u32,
    auto_ack: bool,
) -> (MoveBufferTransport, MoveBufferPeer) {
    let shared = Arc::new(Mutex::new(MoveBufferShared {
        requests: VecDeque::new(),
        responses: VecDeque::new(),
        auto_ack,
        next_handle: 1,
        closed: false,
    }));
    (
        MoveBufferTransport { shared: shared.clone(), protocol_version },
        MoveBufferPeer { shared },
    )
}

impl Transport for MoveBufferTransport {
    fn handshake(&mut self) -> ExecResult<ServerCaps> {
        Ok(ServerCaps {
            protocol_name: "PURCMC".to_string(),
            protocol_version: self.protocol_version,
            session_handle: 0,
        })
    }

    fn is_move_buffer(&self) -> bool {
        true
    }

    fn send(&mut self, req: &RdrRequest) -> ExecResult<()> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(RuntimeError::ConnectionAborted("move buffer closed".into()));
        }
        shared.requests.push_back(req.clone());
        if shared.auto_ack {
            if let Some(id) = &req.request_id {
                let handle = shared.next_handle;
                shared.next_handle += 1;
                let response = RdrResponse::ok(id.clone(), handle);
                shared.responses.push_back(response);
            }
        }
        Ok(())
    }

    fn recv_response(&mut self, request_id: &str, _timeout: Duration) -> ExecResult<RdrResponse> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(RuntimeError::ConnectionAborted("move buffer closed".into()));
        }
        let pos = shared.responses.iter().position(|r| r.request_id == request_id);
        match pos {
            Some(pos) => Ok(shared.responses.remove(pos).expect("position valid")),
            None => Err(RuntimeError::ConnectionAborted(format!(
                "no response for request '{request_id}'"
            ))),
        }
    }
}

impl MoveBufferPeer {
    /// Drain the requests received so far.
    pub fn take_requests(&self) -> Vec<RdrRequest> {
        self.shared.lock().requests.drain(..).collect()
    }

    pub fn push_response(&self, response: RdrResponse) {
        self.shared.lock().responses.push_back(response);
    }

    pub fn close(&self) {
        self.shared.lock().closed = true;
    }
}

// =============================================================================
// Recording transport
// =============================================================================

/// Records requests; blocking requests are answered from the script, or
/// auto-acknowledged with fresh handles once the script runs dry.
pub struct RecordingTransport {
    requests: Vec<RdrRequest>,
    scripted: VecDeque<RdrResponse>,
    protocol_version: u32,
    next_handle: u64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_version(super::client::PROTOCOL_VERSION)
    }

    pub fn with_version(protocol_version: u32) -> Self {
        Self { requests: Vec::new(), scripted: VecDeque::new(), protocol_version, next_handle: 1 }
    }

    /// Queue a response for the next blocking request. The request id is
    /// filled in at receive time.
    pub fn script_response(&mut self, response: RdrResponse) {
        self.scripted.push_back(response);
    }

    pub fn requests(&self) -> &[RdrRequest] {
        &self.requests
    }

    pub fn requests_with_op(&self, op: super::RdrOp) -> Vec<&RdrRequest> {
        self.requests.iter().filter(|r| r.operation == op).collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for RecordingTransport {
    fn handshake(&mut self) -> ExecResult<ServerCaps> {
        Ok(ServerCaps {
            protocol_name: "PURCMC".to_string(),
            protocol_version: self.protocol_version,
            session_handle: 0,
        })
    }

    fn send(&mut self, req: &RdrRequest) -> ExecResult<()> {
        self.requests.push(req.clone());
        Ok(())
    }

    fn recv_response(&mut self, request_id: &str, _timeout: Duration) -> ExecResult<RdrResponse> {
        if let Some(mut scripted) = self.scripted.pop_front() {
            scripted.request_id = CompactString::new(request_id);
            return Ok(scripted);
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        Ok(RdrResponse::ok(CompactString::new(request_id), handle))
    }
}

/// A recording transport that stays inspectable after being boxed into a
/// session: clone the handle, hand one clone to the session, and read
/// the requests through the other.
#[derive(Clone, Default)]
pub struct SharedRecording(pub std::rc::Rc<std::cell::RefCell<RecordingTransport>>);

impl SharedRecording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RdrRequest> {
        self.0.borrow().requests().to_vec()
    }

    pub fn requests_with_op(&self, op: super::RdrOp) -> Vec<RdrRequest> {
        self.0.borrow().requests_with_op(op).into_iter().cloned().collect()
    }

    pub fn script_response(&self, response: RdrResponse) {
        self.0.borrow_mut().script_response(response);
    }
}

impl Transport for SharedRecording {
    fn handshake(&mut self) -> ExecResult<ServerCaps> {
        self.0.borrow_mut().handshake()
    }

    fn send(&mut self, req: &RdrRequest) -> ExecResult<()> {
        self.0.borrow_mut().send(req)
    }

    fn recv_response(&mut self, request_id: &str, timeout: Duration) -> ExecResult<RdrResponse> {
        self.0.borrow_mut().recv_response(request_id, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdr::{RdrOp, RdrTarget};

    #[test]
    fn test_recording_auto_ack() {
        let mut transport = RecordingTransport::new();
        let mut req = RdrRequest::new(RdrTarget::Session, 0, RdrOp::CreateWorkspace);
        req.request_id = Some("r1".into());
        transport.send(&req).unwrap();
        let resp = transport.recv_response("r1", Duration::from_secs(5)).unwrap();
        assert_eq!(resp.ret_code, super::super::RET_CODE_OK);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_move_buffer_pair_roundtrip() {
        let (mut client, peer) = move_buffer_pair(170, true);
        assert!(client.is_move_buffer());

        let mut req = RdrRequest::new(RdrTarget::Session, 0, RdrOp::CreatePlainWindow);
        req.request_id = Some("q1".into());
        client.send(&req).unwrap();

        let resp = client.recv_response("q1", Duration::from_secs(5)).unwrap();
        assert_ne!(resp.result_value, 0);
        assert_eq!(peer.take_requests().len(), 1);
    }

    #[test]
    fn test_closed_buffer_aborts() {
        let (mut client, peer) = move_buffer_pair(170, true);
        peer.close();
        let req = RdrRequest::new(RdrTarget::Session, 0, RdrOp::EndSession);
        let err = client.send(&req).unwrap_err();
        assert_eq!(err.kind(), "connection-aborted");
    }
}
