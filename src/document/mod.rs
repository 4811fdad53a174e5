//! The target document: the markup tree materialized by program verbs
//! and mirrored to the renderer.
//!
//! Documents are polymorphic over [`DocType`]. Rather than a table of
//! function pointers per type, each type resolves to a static
//! [`DocClass`] descriptor carrying a capability set; an operation the
//! class lacks yields `not-implemented` instead of a null-function crash.
//!
//! ## Modules
//! - `node`: the slab-backed node tree and its mutation/query API
//! - `serialize`: option-driven serialization to markup text

pub mod node;
pub mod serialize;

pub use node::{NodeId, NodeKind, TargetDoc};
pub use serialize::SerializeOpts;

use bitflags::bitflags;

use crate::error::{ExecResult, RuntimeError};

// =============================================================================
// Document types and namespaces
// =============================================================================

/// Discriminator for the document implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocType {
    Void,
    Plain,
    Html,
    Xml,
    Xgml,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Plain => "plain",
            Self::Html => "html",
            Self::Xml => "xml",
            Self::Xgml => "xgml",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "void" => Some(Self::Void),
            "plain" => Some(Self::Plain),
            "html" => Some(Self::Html),
            "xml" => Some(Self::Xml),
            "xgml" => Some(Self::Xgml),
            _ => None,
        }
    }

    /// The static class descriptor for this document type.
    pub fn class(&self) -> &'static DocClass {
        match self {
            Self::Void => &VOID_CLASS,
            Self::Plain => &PLAIN_CLASS,
            Self::Html => &HTML_CLASS,
            Self::Xml => &XML_CLASS,
            Self::Xgml => &XGML_CLASS,
        }
    }
}

/// Markup namespaces recognized on elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Namespace {
    #[default]
    Undef,
    Html,
    MathMl,
    Svg,
    Xgml,
    Xlink,
    Xml,
    Xmlns,
}

impl Namespace {
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Undef => None,
            Self::Html => Some("html"),
            Self::MathMl => Some("mathml"),
            Self::Svg => Some("svg"),
            Self::Xgml => Some("xgml"),
            Self::Xlink => Some("xlink"),
            Self::Xml => Some("xml"),
            Self::Xmlns => Some("xmlns"),
        }
    }
}

// =============================================================================
// Class capabilities
// =============================================================================

bitflags! {
    /// What a document class can hold and do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassCaps: u32 {
        const ELEMENTS       = 1 << 0;
        const TEXT_CONTENT   = 1 << 1;
        /// Typed data-content nodes carrying a variant directly (XGML).
        const DATA_CONTENT   = 1 << 2;
        const ATTRIBUTES     = 1 << 3;
        const COMMENTS       = 1 << 4;
        const CDATA          = 1 << 5;
        /// `head`/`body` special elements exist (HTML).
        const HEAD_BODY      = 1 << 6;
    }
}

/// Static descriptor of one document implementation.
#[derive(Debug)]
pub struct DocClass {
    pub doc_type: DocType,
    pub caps: ClassCaps,
    /// Tag of the root element created with a new document; `None` for
    /// classes without an element tree.
    pub root_tag: Option<&'static str>,
    /// The renderer data-type name for serialized content of this class.
    pub content_type: &'static str,
}

impl DocClass {
    /// Check a capability; absence is `not-implemented` (the class has
    /// no slot for the operation).
    pub fn require(&self, cap: ClassCaps, what: &str) -> ExecResult<()> {
        if self.caps.contains(cap) {
            Ok(())
        } else {
            Err(RuntimeError::not_implemented(format!(
                "{} documents: {what}",
                self.doc_type.as_str()
            )))
        }
    }
}

static VOID_CLASS: DocClass = DocClass {
    doc_type: DocType::Void,
    caps: ClassCaps::empty(),
    root_tag: None,
    content_type: "void",
};

static PLAIN_CLASS: DocClass = DocClass {
    doc_type: DocType::Plain,
    caps: ClassCaps::TEXT_CONTENT,
    root_tag: None,
    content_type: "plain",
};

static HTML_CLASS: DocClass = DocClass {
    doc_type: DocType::Html,
    caps: ClassCaps::ELEMENTS
        .union(ClassCaps::TEXT_CONTENT)
        .union(ClassCaps::ATTRIBUTES)
        .union(ClassCaps::COMMENTS)
        .union(ClassCaps::HEAD_BODY),
    root_tag: Some("html"),
    content_type: "html",
};

static XML_CLASS: DocClass = DocClass {
    doc_type: DocType::Xml,
    caps: ClassCaps::ELEMENTS
        .union(ClassCaps::TEXT_CONTENT)
        .union(ClassCaps::ATTRIBUTES)
        .union(ClassCaps::COMMENTS)
        .union(ClassCaps::CDATA),
    root_tag: Some("root"),
    content_type: "xml",
};

static XGML_CLASS: DocClass = DocClass {
    doc_type: DocType::Xgml,
    caps: ClassCaps::ELEMENTS
        .union(ClassCaps::TEXT_CONTENT)
        .union(ClassCaps::DATA_CONTENT)
        .union(ClassCaps::ATTRIBUTES)
        .union(ClassCaps::COMMENTS),
    root_tag: Some("xgml"),
    content_type: "xgml",
};

// =============================================================================
// Operations
// =============================================================================

/// Element-level operations, shared with the renderer protocol's DOM
/// request set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocOp {
    Append,
    Prepend,
    InsertBefore,
    InsertAfter,
    Displace,
    Update,
    Erase,
    Clear,
    Unknown,
}

impl DocOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::InsertBefore => "insertBefore",
            Self::InsertAfter => "insertAfter",
            Self::Displace => "displace",
            Self::Update => "update",
            Self::Erase => "erase",
            Self::Clear => "clear",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "append" => Self::Append,
            "prepend" => Self::Prepend,
            "insertBefore" => Self::InsertBefore,
            "insertAfter" => Self::InsertAfter,
            "displace" => Self::Displace,
            "update" => Self::Update,
            "erase" => Self::Erase,
            "clear" => Self::Clear,
            _ => Self::Unknown,
        }
    }
}

/// Attribute-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOp {
    Update,
    Erase,
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_type_roundtrip() {
        for ty in [DocType::Void, DocType::Plain, DocType::Html, DocType::Xml, DocType::Xgml] {
            assert_eq!(DocType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(DocType::from_str("pdf"), None);
    }

    #[test]
    fn test_class_capability_check() {
        assert!(DocType::Html.class().require(ClassCaps::ELEMENTS, "elements").is_ok());
        let err = DocType::Plain
            .class()
            .require(ClassCaps::ELEMENTS, "operate_element")
            .unwrap_err();
        assert_eq!(err.kind(), "not-implemented");
        let err = DocType::Html
            .class()
            .require(ClassCaps::DATA_CONTENT, "new_data_content")
            .unwrap_err();
        assert_eq!(err.kind(), "not-implemented");
    }

    #[test]
    fn test_doc_op_names() {
        assert_eq!(DocOp::InsertBefore.as_str(), "insertBefore");
        assert_eq!(DocOp::from_str("displace"), DocOp::Displace);
        assert_eq!(DocOp::from_str("mystery"), DocOp::Unknown);
    }
}
