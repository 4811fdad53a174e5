//! The renderer protocol client.
//!
//! Document mutations and page-lifecycle changes are mirrored to an
//! external renderer as request/response messages. This module defines
//! the abstract message envelope (the wire encoding is the transport's
//! concern), the closed operation set, and the session/page client.
//!
//! ## Modules
//! - `transport`: the connection seam, with an in-process move-buffer
//!   pair and a recording transport for tests
//! - `client`: session lifecycle, page loading (single-shot or
//!   streamed), and DOM mutation mirroring

pub mod client;
pub mod transport;

pub use client::{chunk_utf8, LoadResult, RdrConfig, RendererSession, SessionIdent};
pub use transport::{
    move_buffer_pair, MoveBufferPeer, MoveBufferTransport, RecordingTransport, SharedRecording,
    Transport,
};

use compact_str::CompactString;

use crate::variant::Variant;

// =============================================================================
// Envelope enums
// =============================================================================

/// Request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdrTarget {
    Session,
    Workspace,
    PlainWindow,
    Widget,
    Dom,
}

impl RdrTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Workspace => "workspace",
            Self::PlainWindow => "plainWindow",
            Self::Widget => "widget",
            Self::Dom => "dom",
        }
    }
}

/// The closed operation set, in stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdrOp {
    StartSession,
    EndSession,
    CreateWorkspace,
    UpdateWorkspace,
    DestroyWorkspace,
    CreatePlainWindow,
    UpdatePlainWindow,
    DestroyPlainWindow,
    SetPageGroups,
    AddPageGroups,
    RemovePageGroup,
    CreateWidget,
    UpdateWidget,
    DestroyWidget,
    Load,
    WriteBegin,
    WriteMore,
    WriteEnd,
    Register,
    Revoke,
    Append,
    Prepend,
    InsertBefore,
    InsertAfter,
    Displace,
    Update,
    Erase,
    Clear,
    CallMethod,
    GetProperty,
    SetProperty,
}

impl RdrOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSession => "startSession",
            Self::EndSession => "endSession",
            Self::CreateWorkspace => "createWorkspace",
            Self::UpdateWorkspace => "updateWorkspace",
            Self::DestroyWorkspace => "destroyWorkspace",
            Self::CreatePlainWindow => "createPlainWindow",
            Self::UpdatePlainWindow => "updatePlainWindow",
            Self::DestroyPlainWindow => "destroyPlainWindow",
            Self::SetPageGroups => "setPageGroups",
            Self::AddPageGroups => "addPageGroups",
            Self::RemovePageGroup => "removePageGroup",
            Self::CreateWidget => "createWidget",
            Self::UpdateWidget => "updateWidget",
            Self::DestroyWidget => "destroyWidget",
            Self::Load => "load",
            Self::WriteBegin => "writeBegin",
            Self::WriteMore => "writeMore",
            Self::WriteEnd => "writeEnd",
            Self::Register => "register",
            Self::Revoke => "revoke",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::InsertBefore => "insertBefore",
            Self::InsertAfter => "insertAfter",
            Self::Displace => "displace",
            Self::Update => "update",
            Self::Erase => "erase",
            Self::Clear => "clear",
            Self::CallMethod => "callMethod",
            Self::GetProperty => "getProperty",
            Self::SetProperty => "setProperty",
        }
    }

    /// Map a document operation onto its DOM request.
    pub fn from_doc_op(op: crate::document::DocOp) -> Option<Self> {
        use crate::document::DocOp;
        Some(match op {
            DocOp::Append => Self::Append,
            DocOp::Prepend => Self::Prepend,
            DocOp::InsertBefore => Self::InsertBefore,
            DocOp::InsertAfter => Self::InsertAfter,
            DocOp::Displace => Self::Displace,
            DocOp::Update => Self::Update,
            DocOp::Erase => Self::Erase,
            DocOp::Clear => Self::Clear,
            DocOp::Unknown => return None,
        })
    }
}

/// How the `element` field locates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementType {
    #[default]
    Void,
    /// `element` is an `id` attribute value.
    Id,
    /// `element` is a decimal node handle.
    Handle,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Id => "id",
            Self::Handle => "handle",
        }
    }
}

/// Payload kinds carried by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Void,
    Json,
    Plain,
    Html,
    Svg,
    MathMl,
    Xgml,
    Xml,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Json => "json",
            Self::Plain => "plain",
            Self::Html => "html",
            Self::Svg => "svg",
            Self::MathMl => "mathml",
            Self::Xgml => "xgml",
            Self::Xml => "xml",
        }
    }

    pub fn from_content_type(s: &str) -> Self {
        match s {
            "json" => Self::Json,
            "plain" => Self::Plain,
            "html" => Self::Html,
            "svg" => Self::Svg,
            "mathml" => Self::MathMl,
            "xgml" => Self::Xgml,
            "xml" => Self::Xml,
            _ => Self::Void,
        }
    }
}

/// Request/response payload. `EntityRef` is the move-buffer fast path:
/// the receiver reads the entity by reference, no serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum RdrData {
    Void,
    Json(Variant),
    Text { ty: DataType, content: String },
    EntityRef(u64),
}

impl RdrData {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Void => DataType::Void,
            Self::Json(_) => DataType::Json,
            Self::Text { ty, .. } => *ty,
            Self::EntityRef(_) => DataType::Void,
        }
    }

    pub fn text_len(&self) -> u64 {
        match self {
            Self::Text { content, .. } => content.len() as u64,
            _ => 0,
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Fire-and-forget request-id marker.
pub const REQUEST_ID_NORETURN: &str = "-";

/// A request message. `request_id: None` marks fire-and-forget; all
/// other requests block the issuing coroutine until the response.
#[derive(Debug, Clone)]
pub struct RdrRequest {
    pub target: RdrTarget,
    pub target_value: u64,
    pub operation: RdrOp,
    pub request_id: Option<CompactString>,
    pub source_uri: Option<String>,
    pub element_type: ElementType,
    pub element: CompactString,
    pub property: Option<CompactString>,
    pub data: RdrData,
}

impl RdrRequest {
    pub fn new(target: RdrTarget, target_value: u64, operation: RdrOp) -> Self {
        Self {
            target,
            target_value,
            operation,
            request_id: None,
            source_uri: None,
            element_type: ElementType::Void,
            element: CompactString::default(),
            property: None,
            data: RdrData::Void,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }
}

/// Success return code.
pub const RET_CODE_OK: u32 = 200;

/// A response message, matched to its request by id.
#[derive(Debug, Clone)]
pub struct RdrResponse {
    pub request_id: CompactString,
    pub ret_code: u32,
    pub result_value: u64,
    pub data: RdrData,
}

impl RdrResponse {
    pub fn ok(request_id: CompactString, result_value: u64) -> Self {
        Self { request_id, ret_code: RET_CODE_OK, result_value, data: RdrData::Void }
    }

    /// The suppressor's coroutine handle, when the renderer kept an
    /// incumbent page instead of showing ours.
    pub fn suppressed_crtn(&self) -> Option<u64> {
        match &self.data {
            RdrData::Json(Variant::Object(obj)) => {
                obj.get("suppressedCrtn").map(|v| v.cast_to_u64()).filter(|&h| h != 0)
            }
            _ => None,
        }
    }
}

/// Capabilities the server advertises at handshake.
#[derive(Debug, Clone)]
pub struct ServerCaps {
    pub protocol_name: String,
    pub protocol_version: u32,
    pub session_handle: u64,
}

/// Page window classes a coroutine can render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    PlainWindow,
    Widget,
}

impl PageType {
    pub fn create_op(&self) -> RdrOp {
        match self {
            Self::PlainWindow => RdrOp::CreatePlainWindow,
            Self::Widget => RdrOp::CreateWidget,
        }
    }

    pub fn destroy_op(&self) -> RdrOp {
        match self {
            Self::PlainWindow => RdrOp::DestroyPlainWindow,
            Self::Widget => RdrOp::DestroyWidget,
        }
    }

    pub fn target(&self) -> RdrTarget {
        match self {
            Self::PlainWindow => RdrTarget::PlainWindow,
            Self::Widget => RdrTarget::Widget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_names_stable() {
        assert_eq!(RdrOp::StartSession.as_str(), "startSession");
        assert_eq!(RdrOp::WriteBegin.as_str(), "writeBegin");
        assert_eq!(RdrOp::InsertAfter.as_str(), "insertAfter");
        assert_eq!(RdrOp::SetProperty.as_str(), "setProperty");
    }

    #[test]
    fn test_doc_op_mapping() {
        use crate::document::DocOp;
        assert_eq!(RdrOp::from_doc_op(DocOp::Displace), Some(RdrOp::Displace));
        assert_eq!(RdrOp::from_doc_op(DocOp::Unknown), None);
    }

    #[test]
    fn test_suppressed_crtn_extraction() {
        let obj = crate::variant::VObject::new();
        obj.set("suppressedCrtn", Variant::ulongint(9)).unwrap();
        let resp = RdrResponse {
            request_id: "r1".into(),
            ret_code: RET_CODE_OK,
            result_value: 1,
            data: RdrData::Json(Variant::Object(obj)),
        };
        assert_eq!(resp.suppressed_crtn(), Some(9));
        assert_eq!(RdrResponse::ok("r2".into(), 1).suppressed_crtn(), None);
    }
}
