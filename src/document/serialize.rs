//! Document serialization.
//!
//! Serialization is deterministic for a given option set: same tree,
//! same options, same bytes. The renderer client relies on this when it
//! streams a serialized page in UTF-8-aligned chunks.

use bitflags::bitflags;

use super::node::{DocNode, NodeId, NodeKind, TargetDoc};
use super::DocType;

bitflags! {
    /// Serialization options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SerializeOpts: u32 {
        /// Skip whitespace-only text nodes.
        const SKIP_WS_NODES       = 1 << 0;
        /// Skip comment nodes.
        const SKIP_COMMENT        = 1 << 1;
        /// Emit text verbatim, no entity escaping.
        const RAW                 = 1 << 2;
        /// Do not emit closing tags.
        const WITHOUT_CLOSING     = 1 << 3;
        /// Prefix tags with their namespace.
        const TAG_WITH_NS         = 1 << 4;
        /// Do not indent text content when pretty-printing.
        const WITHOUT_TEXT_INDENT = 1 << 5;
        /// Emit the long-form doctype.
        const FULL_DOCTYPE        = 1 << 6;
        /// Emit each element's user-data slot as a hidden attribute so a
        /// move-buffer peer can correlate elements without re-parsing.
        const WITH_HVML_HANDLE    = 1 << 7;
    }
}

/// HTML elements serialized without a closing tag.
const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Serialize one node and its subtree (markup chunks for incremental
/// renderer updates).
pub fn serialize_node(doc: &TargetDoc, id: NodeId, opts: SerializeOpts) -> String {
    let mut out = String::new();
    write_node(doc, id, 0, opts, &mut out);
    out
}

/// Serialize a whole document.
pub fn serialize(doc: &TargetDoc, opts: SerializeOpts) -> String {
    let mut out = String::new();
    match doc.doc_type() {
        DocType::Void => {}
        DocType::Plain => {
            out.push_str(&doc.text_content(doc.root()));
        }
        DocType::Html => {
            if opts.contains(SerializeOpts::FULL_DOCTYPE) {
                out.push_str(
                    "<!DOCTYPE html PUBLIC \"-//W3C//DTD HTML 4.01//EN\" \
                     \"http://www.w3.org/TR/html4/strict.dtd\">\n",
                );
            } else {
                out.push_str("<!DOCTYPE html>\n");
            }
            write_node(doc, doc.root(), 0, opts, &mut out);
        }
        DocType::Xml | DocType::Xgml => {
            out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
            write_node(doc, doc.root(), 0, opts, &mut out);
        }
    }
    out
}

fn write_node(doc: &TargetDoc, id: NodeId, depth: usize, opts: SerializeOpts, out: &mut String) {
    let Some(node) = doc.node(id) else { return };
    match node.kind {
        NodeKind::Element => write_element(doc, id, node, depth, opts, out),
        NodeKind::Text => {
            if opts.contains(SerializeOpts::SKIP_WS_NODES) && node.text.trim().is_empty() {
                return;
            }
            if !opts.contains(SerializeOpts::WITHOUT_TEXT_INDENT) {
                indent(depth, out);
            }
            if opts.contains(SerializeOpts::RAW) {
                out.push_str(&node.text);
            } else {
                escape_text(&node.text, out);
            }
            if !opts.contains(SerializeOpts::WITHOUT_TEXT_INDENT) {
                out.push('\n');
            }
        }
        NodeKind::Data => {
            // XGML data content renders its variant payload.
            indent(depth, out);
            if let Some(data) = &node.data {
                out.push_str(&data.stringify());
            }
            out.push('\n');
        }
        NodeKind::Cdata => {
            indent(depth, out);
            out.push_str("<![CDATA[");
            out.push_str(&node.text);
            out.push_str("]]>\n");
        }
        NodeKind::Others => {
            if node.tag == "!comment" {
                if opts.contains(SerializeOpts::SKIP_COMMENT) {
                    return;
                }
                indent(depth, out);
                out.push_str("<!--");
                out.push_str(&node.text);
                out.push_str("-->\n");
            } else {
                // Raw markup chunk, kept verbatim.
                indent(depth, out);
                out.push_str(&node.text);
                out.push('\n');
            }
        }
        NodeKind::Void => {}
    }
}

fn write_element(
    doc: &TargetDoc,
    id: NodeId,
    node: &DocNode,
    depth: usize,
    opts: SerializeOpts,
    out: &mut String,
) {
    indent(depth, out);
    out.push('<');
    if opts.contains(SerializeOpts::TAG_WITH_NS) {
        if let Some(prefix) = node.ns.prefix() {
            out.push_str(prefix);
            out.push(':');
        }
    }
    out.push_str(&node.tag);

    for (k, v) in &node.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        escape_attr(v, out);
        out.push('"');
    }
    if opts.contains(SerializeOpts::WITH_HVML_HANDLE) && node.user_data != 0 {
        out.push_str(&format!(" hvml-handle=\"{}\"", node.user_data));
    }

    let self_closing = node.children.is_empty()
        && (doc.doc_type() != DocType::Html || HTML_VOID_ELEMENTS.contains(&node.tag.as_str()));

    if self_closing && doc.doc_type() != DocType::Html {
        out.push_str("/>\n");
        return;
    }
    out.push('>');

    if node.children.is_empty() {
        if !self_closing && !opts.contains(SerializeOpts::WITHOUT_CLOSING) {
            out.push_str("</");
            out.push_str(&node.tag);
            out.push('>');
        }
        out.push('\n');
        return;
    }
    out.push('\n');

    for &child in &node.children {
        write_node(doc, child, depth + 1, opts, out);
    }

    if !opts.contains(SerializeOpts::WITHOUT_CLOSING) {
        indent(depth, out);
        out.push_str("</");
        out.push_str(&node.tag);
        out.push_str(">\n");
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AttrOp, DocOp};

    fn sample_doc() -> TargetDoc {
        let mut doc = TargetDoc::new(DocType::Html);
        let body = doc.body().unwrap();
        let div = doc.operate_element(body, DocOp::Append, "div").unwrap();
        doc.set_attribute(div, AttrOp::Update, "id", Some("x")).unwrap();
        doc.append_text(div, "a < b").unwrap();
        doc.append_comment(div, "note").unwrap();
        doc
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let doc = sample_doc();
        let a = doc.serialize(SerializeOpts::default());
        let b = doc.serialize(SerializeOpts::default());
        assert_eq!(a, b);
        assert!(a.starts_with("<!DOCTYPE html>\n<html>"));
        assert!(a.contains("<div id=\"x\">"));
        assert!(a.contains("a &lt; b"));
        assert!(a.contains("<!--note-->"));
    }

    #[test]
    fn test_skip_comment_and_raw() {
        let doc = sample_doc();
        let text = doc.serialize(SerializeOpts::SKIP_COMMENT | SerializeOpts::RAW);
        assert!(!text.contains("<!--"));
        assert!(text.contains("a < b"));
    }

    #[test]
    fn test_without_closing() {
        let doc = sample_doc();
        let text = doc.serialize(SerializeOpts::WITHOUT_CLOSING);
        assert!(!text.contains("</div>"));
        assert!(!text.contains("</html>"));
    }

    #[test]
    fn test_hvml_handle_attribute() {
        let mut doc = sample_doc();
        let div = doc.elem_by_id("x").unwrap();
        doc.set_user_data(div, 42);
        let text = doc.serialize(SerializeOpts::WITH_HVML_HANDLE);
        assert!(text.contains("hvml-handle=\"42\""));
        let bare = doc.serialize(SerializeOpts::default());
        assert!(!bare.contains("hvml-handle"));
    }

    #[test]
    fn test_plain_document() {
        let mut doc = TargetDoc::new(DocType::Plain);
        let root = doc.root();
        doc.set_text_content(root, "just text").unwrap();
        assert_eq!(doc.serialize(SerializeOpts::default()), "just text");
    }
}
