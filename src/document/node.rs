//! The slab-backed document tree.
//!
//! Nodes live in one [`Slab`] per document; a [`NodeId`] is the slab key
//! and widens to the `u64` handle exchanged with the renderer. `id` and
//! `class` attributes maintain side indexes for O(1) lookup. Removal
//! unlinks a subtree and frees it in the same call — iterators borrow
//! the document, so no freed node can be observed through one.

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use slab::Slab;
use smallvec::SmallVec;

use crate::error::{ExecResult, RuntimeError};
use crate::variant::Variant;

use super::{AttrOp, ClassCaps, DocClass, DocOp, DocType, Namespace, SerializeOpts};

// =============================================================================
// Nodes
// =============================================================================

/// Key of a node within its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Renderer-facing handle; offset by one so 0 stays a null handle.
    pub fn handle(&self) -> u64 {
        self.0 as u64 + 1
    }

    pub fn from_handle(handle: u64) -> Option<Self> {
        handle.checked_sub(1).map(|k| Self(k as usize))
    }
}

/// Node kinds of the target tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text,
    /// Typed data content carrying a variant (XGML).
    Data,
    Cdata,
    /// Comments and raw markup chunks.
    Others,
    /// Denotes *absent*.
    Void,
}

type Attrs = SmallVec<[(CompactString, CompactString); 8]>;

/// One node of the target document.
#[derive(Debug, Clone)]
pub struct DocNode {
    pub kind: NodeKind,
    pub tag: CompactString,
    pub ns: Namespace,
    /// Ordered within the element.
    pub attrs: Attrs,
    /// Content for text/cdata/others nodes (raw markup for chunks).
    pub text: CompactString,
    /// Payload of data nodes.
    pub data: Option<Variant>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Opaque slot owned by the document consumer; correlates DOM nodes
    /// with program scopes and renderer-side entities.
    pub user_data: u64,
}

impl DocNode {
    fn element(tag: &str, ns: Namespace) -> Self {
        Self {
            kind: NodeKind::Element,
            tag: CompactString::new(tag),
            ns,
            attrs: SmallVec::new(),
            text: CompactString::default(),
            data: None,
            parent: None,
            children: Vec::new(),
            user_data: 0,
        }
    }

    fn leaf(kind: NodeKind, text: &str) -> Self {
        Self {
            kind,
            tag: CompactString::default(),
            ns: Namespace::Undef,
            attrs: SmallVec::new(),
            text: CompactString::new(text),
            data: None,
            parent: None,
            children: Vec::new(),
            user_data: 0,
        }
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }
}

// =============================================================================
// TargetDoc
// =============================================================================

/// A target document of one [`DocType`].
pub struct TargetDoc {
    doc_type: DocType,
    nodes: Slab<DocNode>,
    root: NodeId,
    head: Option<NodeId>,
    body: Option<NodeId>,
    by_id: FxHashMap<CompactString, NodeId>,
    by_class: FxHashMap<CompactString, Vec<NodeId>>,
}

impl TargetDoc {
    /// Create a document with the skeleton its class prescribes: HTML
    /// gets `html`/`head`/`body`, XML and XGML a bare root element,
    /// plain a text root, void a void root.
    pub fn new(doc_type: DocType) -> Self {
        let mut nodes = Slab::new();
        let class = doc_type.class();

        let root = match class.root_tag {
            Some(tag) => NodeId(nodes.insert(DocNode::element(tag, Namespace::Undef))),
            None if doc_type == DocType::Plain => {
                NodeId(nodes.insert(DocNode::leaf(NodeKind::Text, "")))
            }
            None => NodeId(nodes.insert(DocNode::leaf(NodeKind::Void, ""))),
        };

        let mut doc = Self {
            doc_type,
            nodes,
            root,
            head: None,
            body: None,
            by_id: FxHashMap::default(),
            by_class: FxHashMap::default(),
        };

        if class.caps.contains(ClassCaps::HEAD_BODY) {
            let head = doc.insert_linked(root, DocNode::element("head", Namespace::Html));
            let body = doc.insert_linked(root, DocNode::element("body", Namespace::Html));
            doc.head = Some(head);
            doc.body = Some(body);
        }
        doc
    }

    #[inline]
    pub fn doc_type(&self) -> DocType {
        self.doc_type
    }

    #[inline]
    pub fn class(&self) -> &'static DocClass {
        self.doc_type.class()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Special elements and lookup
    // ─────────────────────────────────────────────────────────────────────────

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn body(&self) -> Option<NodeId> {
        self.body
    }

    /// The element verbs attach content to by default: `body` for HTML,
    /// the root otherwise.
    pub fn content_root(&self) -> NodeId {
        self.body.unwrap_or(self.root)
    }

    pub fn node(&self, id: NodeId) -> Option<&DocNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut DocNode> {
        self.nodes.get_mut(id.0)
    }

    fn expect_node(&self, id: NodeId) -> ExecResult<&DocNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| RuntimeError::not_exists(format!("document node {}", id.0)))
    }

    /// O(1) lookup by `id` attribute.
    pub fn elem_by_id(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    /// O(1) lookup of the elements carrying `class`.
    pub fn elems_by_class(&self, class: &str) -> &[NodeId] {
        self.by_class.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn user_data(&self, id: NodeId) -> u64 {
        self.nodes.get(id.0).map(|n| n.user_data).unwrap_or(0)
    }

    pub fn set_user_data(&mut self, id: NodeId, data: u64) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.user_data = data;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Structure edits
    // ─────────────────────────────────────────────────────────────────────────

    fn insert_linked(&mut self, parent: NodeId, node: DocNode) -> NodeId {
        let id = NodeId(self.nodes.insert(node));
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
        id
    }

    fn insert_at(&mut self, parent: NodeId, pos: usize, node: DocNode) -> NodeId {
        let id = NodeId(self.nodes.insert(node));
        self.nodes[id.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        let pos = pos.min(children.len());
        children.insert(pos, id);
        id
    }

    fn parent_and_pos(&self, id: NodeId) -> ExecResult<(NodeId, usize)> {
        let parent = self
            .expect_node(id)?
            .parent
            .ok_or_else(|| RuntimeError::invalid_value("node has no parent"))?;
        let pos = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == id)
            .expect("child listed under its parent");
        Ok((parent, pos))
    }

    /// Create a new element positioned relative to `elem` according to
    /// `op`. `erase`/`clear` take no tag and return the affected element.
    pub fn operate_element(&mut self, elem: NodeId, op: DocOp, tag: &str) -> ExecResult<NodeId> {
        self.class().require(ClassCaps::ELEMENTS, "operate_element")?;
        self.expect_node(elem)?;
        match op {
            DocOp::Append => Ok(self.insert_linked(elem, DocNode::element(tag, Namespace::Undef))),
            DocOp::Prepend => Ok(self.insert_at(elem, 0, DocNode::element(tag, Namespace::Undef))),
            DocOp::InsertBefore => {
                let (parent, pos) = self.parent_and_pos(elem)?;
                Ok(self.insert_at(parent, pos, DocNode::element(tag, Namespace::Undef)))
            }
            DocOp::InsertAfter => {
                let (parent, pos) = self.parent_and_pos(elem)?;
                Ok(self.insert_at(parent, pos + 1, DocNode::element(tag, Namespace::Undef)))
            }
            DocOp::Displace => {
                self.clear_element(elem)?;
                Ok(self.insert_linked(elem, DocNode::element(tag, Namespace::Undef)))
            }
            DocOp::Erase => {
                self.erase_element(elem)?;
                Ok(elem)
            }
            DocOp::Clear => {
                self.clear_element(elem)?;
                Ok(elem)
            }
            DocOp::Update | DocOp::Unknown => Err(RuntimeError::not_implemented(format!(
                "operate_element with op '{}'",
                op.as_str()
            ))),
        }
    }

    /// Append a text node under `elem`.
    pub fn append_text(&mut self, elem: NodeId, text: &str) -> ExecResult<NodeId> {
        self.class().require(ClassCaps::TEXT_CONTENT, "text content")?;
        self.expect_node(elem)?;
        Ok(self.insert_linked(elem, DocNode::leaf(NodeKind::Text, text)))
    }

    /// Displace the content of `elem` with a single text node.
    pub fn set_text_content(&mut self, elem: NodeId, text: &str) -> ExecResult<NodeId> {
        self.class().require(ClassCaps::TEXT_CONTENT, "text content")?;
        if self.doc_type == DocType::Plain && elem == self.root {
            self.nodes[elem.0].text = CompactString::new(text);
            return Ok(elem);
        }
        self.clear_element(elem)?;
        Ok(self.insert_linked(elem, DocNode::leaf(NodeKind::Text, text)))
    }

    /// Append a typed data-content node (XGML only).
    pub fn new_data_content(&mut self, elem: NodeId, data: Variant) -> ExecResult<NodeId> {
        self.class().require(ClassCaps::DATA_CONTENT, "new_data_content")?;
        self.expect_node(elem)?;
        let mut node = DocNode::leaf(NodeKind::Data, "");
        node.data = Some(data);
        Ok(self.insert_linked(elem, node))
    }

    /// Append a raw markup chunk. The chunk is kept verbatim (tokenizing
    /// markup is the source tokenizer's contract, not the runtime's) and
    /// serialized as-is.
    pub fn new_content(&mut self, elem: NodeId, markup: &str) -> ExecResult<NodeId> {
        self.class().require(ClassCaps::TEXT_CONTENT, "content")?;
        self.expect_node(elem)?;
        Ok(self.insert_linked(elem, DocNode::leaf(NodeKind::Others, markup)))
    }

    pub fn append_comment(&mut self, elem: NodeId, text: &str) -> ExecResult<NodeId> {
        self.class().require(ClassCaps::COMMENTS, "comments")?;
        self.expect_node(elem)?;
        let mut node = DocNode::leaf(NodeKind::Others, text);
        node.tag = CompactString::new("!comment");
        Ok(self.insert_linked(elem, node))
    }

    /// Unlink and free `elem` and its subtree. The root cannot be erased.
    pub fn erase_element(&mut self, elem: NodeId) -> ExecResult<()> {
        if elem == self.root {
            return Err(RuntimeError::NotSupported("erasing the document root".into()));
        }
        let (parent, pos) = self.parent_and_pos(elem)?;
        self.nodes[parent.0].children.remove(pos);
        self.free_subtree(elem);
        Ok(())
    }

    /// Remove all children of `elem`.
    pub fn clear_element(&mut self, elem: NodeId) -> ExecResult<()> {
        self.expect_node(elem)?;
        let children = std::mem::take(&mut self.nodes[elem.0].children);
        for child in children {
            self.free_subtree(child);
        }
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) {
        let node = self.nodes.remove(id.0);
        self.unindex(id, &node);
        for child in node.children {
            self.free_subtree(child);
        }
        if self.head == Some(id) {
            self.head = None;
        }
        if self.body == Some(id) {
            self.body = None;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attributes
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply an attribute operation: `update` sets (ordered append for a
    /// new name), `erase` removes one attribute, `clear` removes all.
    pub fn set_attribute(
        &mut self,
        elem: NodeId,
        op: AttrOp,
        name: &str,
        value: Option<&str>,
    ) -> ExecResult<()> {
        self.class().require(ClassCaps::ATTRIBUTES, "attributes")?;
        let node = self.expect_node(elem)?;
        if !node.is_element() {
            return Err(RuntimeError::invalid_value("attributes only apply to elements"));
        }

        match op {
            AttrOp::Update => {
                let value = value.ok_or_else(|| RuntimeError::argument_missed("value"))?;
                self.unindex_attr(elem, name);
                let node = &mut self.nodes[elem.0];
                if let Some(slot) = node.attrs.iter_mut().find(|(k, _)| k == name) {
                    slot.1 = CompactString::new(value);
                } else {
                    node.attrs.push((CompactString::new(name), CompactString::new(value)));
                }
                self.index_attr(elem, name, value);
            }
            AttrOp::Erase => {
                self.unindex_attr(elem, name);
                let node = &mut self.nodes[elem.0];
                node.attrs.retain(|(k, _)| k != name);
            }
            AttrOp::Clear => {
                let names: Vec<CompactString> =
                    self.nodes[elem.0].attrs.iter().map(|(k, _)| k.clone()).collect();
                for n in &names {
                    self.unindex_attr(elem, n);
                }
                self.nodes[elem.0].attrs.clear();
            }
        }
        Ok(())
    }

    pub fn attribute(&self, elem: NodeId, name: &str) -> Option<CompactString> {
        self.nodes
            .get(elem.0)?
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn attributes(&self, elem: NodeId) -> &[(CompactString, CompactString)] {
        self.nodes.get(elem.0).map(|n| n.attrs.as_slice()).unwrap_or(&[])
    }

    fn index_attr(&mut self, elem: NodeId, name: &str, value: &str) {
        match name {
            "id" => {
                self.by_id.insert(CompactString::new(value), elem);
            }
            "class" => {
                for class in value.split_whitespace() {
                    self.by_class.entry(CompactString::new(class)).or_default().push(elem);
                }
            }
            _ => {}
        }
    }

    fn unindex_attr(&mut self, elem: NodeId, name: &str) {
        match name {
            "id" => {
                if let Some(old) = self.attribute(elem, "id") {
                    if self.by_id.get(old.as_str()) == Some(&elem) {
                        self.by_id.remove(old.as_str());
                    }
                }
            }
            "class" => {
                if let Some(old) = self.attribute(elem, "class") {
                    for class in old.split_whitespace() {
                        if let Some(list) = self.by_class.get_mut(class) {
                            list.retain(|&n| n != elem);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn unindex(&mut self, id: NodeId, node: &DocNode) {
        for (k, v) in &node.attrs {
            if k == "id" {
                if self.by_id.get(v.as_str()) == Some(&id) {
                    self.by_id.remove(v.as_str());
                }
            } else if k == "class" {
                for class in v.split_whitespace() {
                    if let Some(list) = self.by_class.get_mut(class) {
                        list.retain(|&n| n != id);
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Traversal
    // ─────────────────────────────────────────────────────────────────────────

    pub fn children(&self, elem: NodeId) -> &[NodeId] {
        self.nodes.get(elem.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Child counts partitioned by kind: `(elements, texts, others)`.
    /// Interleaving is preserved in `children`; this is just the tally.
    pub fn children_counts(&self, elem: NodeId) -> (usize, usize, usize) {
        let mut counts = (0usize, 0usize, 0usize);
        for &child in self.children(elem) {
            match self.nodes[child.0].kind {
                NodeKind::Element => counts.0 += 1,
                NodeKind::Text => counts.1 += 1,
                _ => counts.2 += 1,
            }
        }
        counts
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, pos) = self.parent_and_pos(id).ok()?;
        self.nodes[parent.0].children.get(pos + 1).copied()
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, pos) = self.parent_and_pos(id).ok()?;
        pos.checked_sub(1).and_then(|p| self.nodes[parent.0].children.get(p)).copied()
    }

    /// Depth-first descendants of `elem`, excluding `elem` itself.
    pub fn descendants(&self, elem: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(elem).to_vec();
        stack.reverse();
        Descendants { doc: self, stack }
    }

    /// Concatenated text of all text nodes under `elem`.
    pub fn text_content(&self, elem: NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.nodes.get(elem.0) {
            if node.kind == NodeKind::Text {
                out.push_str(&node.text);
            }
        }
        for id in self.descendants(elem) {
            let node = &self.nodes[id.0];
            if node.kind == NodeKind::Text {
                out.push_str(&node.text);
            }
        }
        out
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Serialize with the given option set.
    pub fn serialize(&self, opts: SerializeOpts) -> String {
        super::serialize::serialize(self, opts)
    }

    /// Serialize one subtree as a markup chunk.
    pub fn serialize_node(&self, id: NodeId, opts: SerializeOpts) -> String {
        super::serialize::serialize_node(self, id, opts)
    }
}

/// Depth-first iterator over descendants.
pub struct Descendants<'a> {
    doc: &'a TargetDoc,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        for &child in self.doc.children(id).iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_skeleton() {
        let doc = TargetDoc::new(DocType::Html);
        assert!(doc.head().is_some());
        assert!(doc.body().is_some());
        assert_eq!(doc.node(doc.root()).unwrap().tag, "html");
        assert_eq!(doc.content_root(), doc.body().unwrap());
    }

    #[test]
    fn test_operate_element_positions() {
        let mut doc = TargetDoc::new(DocType::Html);
        let body = doc.body().unwrap();
        let a = doc.operate_element(body, DocOp::Append, "div").unwrap();
        let b = doc.operate_element(body, DocOp::Append, "p").unwrap();
        let c = doc.operate_element(b, DocOp::InsertBefore, "hr").unwrap();
        let d = doc.operate_element(a, DocOp::InsertAfter, "span").unwrap();
        assert_eq!(doc.children(body), &[a, d, c, b]);
    }

    #[test]
    fn test_displace_replaces_children() {
        let mut doc = TargetDoc::new(DocType::Html);
        let body = doc.body().unwrap();
        doc.operate_element(body, DocOp::Append, "div").unwrap();
        doc.operate_element(body, DocOp::Append, "div").unwrap();
        let fresh = doc.operate_element(body, DocOp::Displace, "main").unwrap();
        assert_eq!(doc.children(body), &[fresh]);
    }

    #[test]
    fn test_clear_empties_counts() {
        let mut doc = TargetDoc::new(DocType::Html);
        let body = doc.body().unwrap();
        let div = doc.operate_element(body, DocOp::Append, "div").unwrap();
        doc.append_text(div, "hi").unwrap();
        doc.operate_element(div, DocOp::Append, "b").unwrap();
        doc.clear_element(div).unwrap();
        assert_eq!(doc.children_counts(div), (0, 0, 0));
    }

    #[test]
    fn test_id_class_indexes() {
        let mut doc = TargetDoc::new(DocType::Html);
        let body = doc.body().unwrap();
        let div = doc.operate_element(body, DocOp::Append, "div").unwrap();
        doc.set_attribute(div, AttrOp::Update, "id", Some("x")).unwrap();
        doc.set_attribute(div, AttrOp::Update, "class", Some("hot cold")).unwrap();
        assert_eq!(doc.elem_by_id("x"), Some(div));
        assert_eq!(doc.elems_by_class("cold"), &[div]);

        doc.set_attribute(div, AttrOp::Update, "id", Some("y")).unwrap();
        assert_eq!(doc.elem_by_id("x"), None);
        assert_eq!(doc.elem_by_id("y"), Some(div));

        doc.erase_element(div).unwrap();
        assert_eq!(doc.elem_by_id("y"), None);
        assert!(doc.elems_by_class("hot").is_empty());
    }

    #[test]
    fn test_plain_doc_rejects_elements() {
        let mut doc = TargetDoc::new(DocType::Plain);
        let root = doc.root();
        let err = doc.operate_element(root, DocOp::Append, "div").unwrap_err();
        assert_eq!(err.kind(), "not-implemented");
        doc.set_text_content(root, "hello").unwrap();
        assert_eq!(doc.text_content(root), "hello");
    }

    #[test]
    fn test_xgml_data_content() {
        let mut doc = TargetDoc::new(DocType::Xgml);
        let root = doc.root();
        let node = doc.new_data_content(root, Variant::number(7.0)).unwrap();
        assert_eq!(doc.node(node).unwrap().data, Some(Variant::number(7.0)));

        let mut html = TargetDoc::new(DocType::Html);
        let body = html.body().unwrap();
        let err = html.new_data_content(body, Variant::Null).unwrap_err();
        assert_eq!(err.kind(), "not-implemented");
    }

    #[test]
    fn test_text_content_concatenation() {
        let mut doc = TargetDoc::new(DocType::Html);
        let body = doc.body().unwrap();
        let div = doc.operate_element(body, DocOp::Append, "div").unwrap();
        doc.append_text(div, "a").unwrap();
        let span = doc.operate_element(div, DocOp::Append, "span").unwrap();
        doc.append_text(span, "b").unwrap();
        doc.append_text(div, "c").unwrap();
        assert_eq!(doc.text_content(div), "abc");
    }
}
