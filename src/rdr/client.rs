//! Session, page, and DOM mirroring over a renderer transport.
//!
//! One session per instance; the connection is shared by every
//! coroutine of the instance and requests are serialized on it. Blocking
//! requests carry a fresh request id and wait for the matching response;
//! fire-and-forget requests carry none.

use std::time::Duration;

use compact_str::CompactString;
use tracing::debug;

use crate::document::TargetDoc;
use crate::error::{ExecResult, RuntimeError};
use crate::variant::{VObject, Variant};

use super::transport::Transport;
use super::{
    DataType, ElementType, PageType, RdrData, RdrOp, RdrRequest, RdrResponse, RdrTarget,
    ServerCaps, RET_CODE_OK,
};

pub const PROTOCOL_NAME: &str = "PURCMC";
pub const PROTOCOL_VERSION: u32 = 170;

/// Streamed page loads are cut into chunks of at most this many bytes,
/// always at a UTF-8 code-point boundary.
pub const DEF_LEN_ONE_WRITE: usize = 10 * 1024;

/// Default page name when the program names none.
pub const DEF_PAGE_NAME: &str = "main";

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct RdrConfig {
    pub protocol_version: u32,
    /// Sessions below this server version are rejected with
    /// `wrong-version`.
    pub minimal_protocol_version: u32,
    pub one_write_limit: usize,
    /// Default expected response time; individual requests may override.
    pub timeout: Duration,
}

impl Default for RdrConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            minimal_protocol_version: PROTOCOL_VERSION,
            one_write_limit: DEF_LEN_ONE_WRITE,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Identity sent with `startSession`.
#[derive(Debug, Clone)]
pub struct SessionIdent {
    pub host_name: String,
    pub app_name: String,
    pub runner_name: String,
}

/// Result of a page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// Handle used for all subsequent DOM requests on this page.
    pub dom_handle: u64,
    /// Set when the renderer suppressed our document in favor of an
    /// incumbent; recorded so the page reloads when the suppressor
    /// revokes.
    pub suppressed_by: Option<u64>,
}

/// One renderer session over a transport.
pub struct RendererSession {
    conn: Box<dyn Transport>,
    caps: ServerCaps,
    config: RdrConfig,
    next_req: u64,
}

impl std::fmt::Debug for RendererSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererSession")
            .field("caps", &self.caps)
            .field("config", &self.config)
            .field("next_req", &self.next_req)
            .finish()
    }
}

impl RendererSession {
    /// Open the transport, negotiate capabilities, and start the
    /// session.
    pub fn connect(
        mut conn: Box<dyn Transport>,
        config: RdrConfig,
        ident: &SessionIdent,
    ) -> ExecResult<Self> {
        let mut caps = conn.handshake()?;
        if caps.protocol_version < config.minimal_protocol_version {
            return Err(RuntimeError::WrongVersion {
                server: caps.protocol_version,
                minimal: config.minimal_protocol_version,
            });
        }

        let mut session = Self { conn, caps: caps.clone(), config, next_req: 0 };

        let info = VObject::new();
        info.set("protocolName", Variant::string(PROTOCOL_NAME))?;
        info.set("protocolVersion", Variant::ulongint(session.config.protocol_version as u64))?;
        info.set("hostName", Variant::string(&ident.host_name))?;
        info.set("appName", Variant::string(&ident.app_name))?;
        info.set("runnerName", Variant::string(&ident.runner_name))?;

        let mut req = RdrRequest::new(RdrTarget::Session, 0, RdrOp::StartSession);
        req.data = RdrData::Json(Variant::Object(info));
        let resp = session.roundtrip(req)?;

        caps.session_handle = resp.result_value;
        session.caps = caps;
        debug!(session = session.caps.session_handle, "renderer session started");
        Ok(session)
    }

    #[inline]
    pub fn session_handle(&self) -> u64 {
        self.caps.session_handle
    }

    #[inline]
    pub fn caps(&self) -> &ServerCaps {
        &self.caps
    }

    #[inline]
    pub fn is_move_buffer(&self) -> bool {
        self.conn.is_move_buffer()
    }

    fn fresh_request_id(&mut self) -> CompactString {
        self.next_req += 1;
        CompactString::from(format!("req-{}", self.next_req))
    }

    /// Send a blocking request and wait for its response with the
    /// default expected response time; a non-OK return code is
    /// `server-refused`.
    pub fn roundtrip(&mut self, req: RdrRequest) -> ExecResult<RdrResponse> {
        let timeout = self.config.timeout;
        self.roundtrip_with_timeout(req, timeout)
    }

    /// Same, with a per-request timeout override.
    pub fn roundtrip_with_timeout(
        &mut self,
        mut req: RdrRequest,
        timeout: Duration,
    ) -> ExecResult<RdrResponse> {
        let id = self.fresh_request_id();
        req.request_id = Some(id.clone());
        self.conn.send(&req)?;
        let resp = self.conn.recv_response(&id, timeout)?;
        if resp.ret_code != RET_CODE_OK {
            return Err(RuntimeError::ServerRefused(resp.ret_code));
        }
        Ok(resp)
    }

    /// Send a fire-and-forget request (request-id `-`).
    pub fn send_noreturn(&mut self, mut req: RdrRequest) -> ExecResult<()> {
        req.request_id = None;
        self.conn.send(&req)
    }

    pub fn end_session(&mut self) -> ExecResult<()> {
        let req =
            RdrRequest::new(RdrTarget::Session, self.caps.session_handle, RdrOp::EndSession);
        self.send_noreturn(req)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Workspaces and pages
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_workspace(&mut self, name: &str) -> ExecResult<u64> {
        let mut req =
            RdrRequest::new(RdrTarget::Session, self.caps.session_handle, RdrOp::CreateWorkspace);
        req.element_type = ElementType::Id;
        req.element = CompactString::new(name);
        Ok(self.roundtrip(req)?.result_value)
    }

    pub fn destroy_workspace(&mut self, workspace: u64) -> ExecResult<()> {
        let mut req =
            RdrRequest::new(RdrTarget::Session, self.caps.session_handle, RdrOp::DestroyWorkspace);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{workspace}"));
        self.roundtrip(req).map(|_| ())
    }

    /// Create a page in `workspace`. The element value is
    /// `"pageName"` or `"pageName@groupName"`.
    pub fn create_page(
        &mut self,
        page_type: PageType,
        workspace: u64,
        name: &str,
        group: Option<&str>,
    ) -> ExecResult<u64> {
        let mut req = RdrRequest::new(RdrTarget::Workspace, workspace, page_type.create_op());
        req.element_type = ElementType::Id;
        req.element = match group {
            Some(group) => CompactString::from(format!("{name}@{group}")),
            None => CompactString::new(name),
        };
        Ok(self.roundtrip(req)?.result_value)
    }

    pub fn destroy_page(
        &mut self,
        page_type: PageType,
        workspace: u64,
        page: u64,
    ) -> ExecResult<()> {
        let mut req = RdrRequest::new(RdrTarget::Workspace, workspace, page_type.destroy_op());
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{page}"));
        self.roundtrip(req).map(|_| ())
    }

    pub fn set_page_groups(&mut self, workspace: u64, markup: &str) -> ExecResult<()> {
        let mut req = RdrRequest::new(RdrTarget::Workspace, workspace, RdrOp::SetPageGroups);
        req.data = RdrData::Text { ty: DataType::Html, content: markup.to_string() };
        self.roundtrip(req).map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Page content
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the materialized document into a page.
    ///
    /// Move-buffer transports receive the document entity by reference.
    /// Otherwise the serialization goes in one `load` when it fits the
    /// one-write limit, or as a `writeBegin`/`writeMore`*/`writeEnd`
    /// stream of UTF-8-aligned chunks.
    pub fn load_document(
        &mut self,
        page_type: PageType,
        page: u64,
        doc: &TargetDoc,
    ) -> ExecResult<LoadResult> {
        let target = page_type.target();
        let data_type = DataType::from_content_type(doc.class().content_type);

        if self.is_move_buffer() {
            let mut req = RdrRequest::new(target, page, RdrOp::Load);
            req.data = RdrData::EntityRef(doc.root().handle());
            let resp = self.roundtrip(req)?;
            return Ok(LoadResult {
                dom_handle: resp.result_value,
                suppressed_by: resp.suppressed_crtn(),
            });
        }

        let text = doc.serialize(Default::default());
        if text.len() <= self.config.one_write_limit {
            let mut req = RdrRequest::new(target, page, RdrOp::Load);
            req.data = RdrData::Text { ty: data_type, content: text };
            let resp = self.roundtrip(req)?;
            return Ok(LoadResult {
                dom_handle: resp.result_value,
                suppressed_by: resp.suppressed_crtn(),
            });
        }

        let chunks = chunk_utf8(&text, self.config.one_write_limit);
        debug!(len = text.len(), chunks = chunks.len(), "streaming page load");
        let last = chunks.len() - 1;
        let mut final_resp: Option<RdrResponse> = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let op = if i == 0 {
                RdrOp::WriteBegin
            } else if i == last {
                RdrOp::WriteEnd
            } else {
                RdrOp::WriteMore
            };
            let mut req = RdrRequest::new(target, page, op);
            req.data = RdrData::Text { ty: data_type, content: (*chunk).to_string() };
            final_resp = Some(self.roundtrip(req)?);
        }
        let resp = final_resp.expect("at least two chunks streamed");
        Ok(LoadResult { dom_handle: resp.result_value, suppressed_by: resp.suppressed_crtn() })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // DOM mirroring
    // ─────────────────────────────────────────────────────────────────────────

    /// Mirror one document mutation onto the renderer's DOM target.
    /// Blocking requests return the response; fire-and-forget returns
    /// `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn dom_request(
        &mut self,
        dom_handle: u64,
        op: RdrOp,
        element: u64,
        property: Option<&str>,
        data: RdrData,
        blocking: bool,
    ) -> ExecResult<Option<RdrResponse>> {
        let mut req = RdrRequest::new(RdrTarget::Dom, dom_handle, op);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{element}"));
        req.property = property.map(CompactString::new);
        req.data = data;
        if blocking {
            self.roundtrip(req).map(Some)
        } else {
            self.send_noreturn(req).map(|_| None)
        }
    }

    pub fn call_method(
        &mut self,
        dom_handle: u64,
        element: u64,
        method: &str,
        arg: Variant,
    ) -> ExecResult<RdrResponse> {
        let mut req = RdrRequest::new(RdrTarget::Dom, dom_handle, RdrOp::CallMethod);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{element}"));
        req.property = Some(CompactString::new(method));
        req.data = RdrData::Json(arg);
        self.roundtrip(req)
    }

    pub fn get_property(
        &mut self,
        dom_handle: u64,
        element: u64,
        property: &str,
    ) -> ExecResult<RdrResponse> {
        let mut req = RdrRequest::new(RdrTarget::Dom, dom_handle, RdrOp::GetProperty);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{element}"));
        req.property = Some(CompactString::new(property));
        self.roundtrip(req)
    }

    pub fn set_property(
        &mut self,
        dom_handle: u64,
        element: u64,
        property: &str,
        value: Variant,
    ) -> ExecResult<RdrResponse> {
        let mut req = RdrRequest::new(RdrTarget::Dom, dom_handle, RdrOp::SetProperty);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{element}"));
        req.property = Some(CompactString::new(property));
        req.data = RdrData::Json(value);
        self.roundtrip(req)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Page ownership
    // ─────────────────────────────────────────────────────────────────────────

    /// Take ownership of a page.
    pub fn register_page(&mut self, page_type: PageType, page: u64, crtn: u64) -> ExecResult<()> {
        let mut req = RdrRequest::new(page_type.target(), page, RdrOp::Register);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{crtn}"));
        self.roundtrip(req).map(|_| ())
    }

    /// Release ownership. A non-zero result value names the coroutine
    /// whose document must now be reloaded.
    pub fn revoke_page(
        &mut self,
        page_type: PageType,
        page: u64,
        crtn: u64,
    ) -> ExecResult<Option<u64>> {
        let mut req = RdrRequest::new(page_type.target(), page, RdrOp::Revoke);
        req.element_type = ElementType::Handle;
        req.element = CompactString::from(format!("{crtn}"));
        let resp = self.roundtrip(req)?;
        Ok((resp.result_value != 0).then_some(resp.result_value))
    }
}

// =============================================================================
// Chunking
// =============================================================================

/// Split `text` into chunks of at most `max` bytes, never cutting a
/// UTF-8 code point.
pub fn chunk_utf8(text: &str, max: usize) -> Vec<&str> {
    assert!(max >= 4, "chunk limit below the longest UTF-8 sequence");
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let mut end = max;
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocOp, DocType};
    use crate::rdr::transport::RecordingTransport;

    fn ident() -> SessionIdent {
        SessionIdent {
            host_name: "localhost".into(),
            app_name: "test.app".into(),
            runner_name: "runner".into(),
        }
    }

    fn connect_recording() -> RendererSession {
        RendererSession::connect(
            Box::new(RecordingTransport::new()),
            RdrConfig::default(),
            &ident(),
        )
        .unwrap()
    }

    #[test]
    fn test_connect_starts_session() {
        let session = connect_recording();
        assert_ne!(session.session_handle(), 0);
    }

    #[test]
    fn test_connect_rejects_old_server() {
        let err = RendererSession::connect(
            Box::new(RecordingTransport::with_version(100)),
            RdrConfig::default(),
            &ident(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "wrong-version");
    }

    #[test]
    fn test_chunk_utf8_boundaries() {
        // 3-byte code points; a 10-byte limit cannot hold 4 of them.
        let text = "€€€€€€€"; // 7 × 3 = 21 bytes
        let chunks = chunk_utf8(text, 10);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.len() <= 10);
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_small_document_loads_in_one_request() {
        let mut session = connect_recording();
        let doc = TargetDoc::new(DocType::Html);
        let result = session.load_document(PageType::PlainWindow, 7, &doc).unwrap();
        assert_ne!(result.dom_handle, 0);
        assert_eq!(result.suppressed_by, None);
    }

    #[test]
    fn test_dom_request_shape() {
        let mut session = connect_recording();
        let resp = session
            .dom_request(
                11,
                RdrOp::from_doc_op(DocOp::Update).unwrap(),
                42,
                Some("class"),
                RdrData::Text { ty: DataType::Plain, content: "hi".into() },
                true,
            )
            .unwrap();
        assert!(resp.is_some());
    }
}
